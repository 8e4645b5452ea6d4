//! The 128-byte request record: the wire format exchanged between a producer
//! and the proxy loop over the request ring.

use bytemuck::{ Pod, Zeroable };

/// Operation codes. Carries the full op space from the reference rather than
/// a trimmed subset, since the host dispatch table is only meaningfully
/// testable against the complete set of shapes it must handle.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Nop = 0,
    NopNoReturn = 1,
    Put = 2,
    Get = 3,
    Iput = 4,
    Iget = 5,
    P = 6,
    G = 7,
    PutNbi = 8,
    GetNbi = 9,
    AmoFetch = 10,
    AmoSet = 11,
    AmoSwap = 12,
    AmoFetchAdd = 13,
    AmoAdd = 14,
    AmoFetchAnd = 15,
    AmoAnd = 16,
    AmoFetchOr = 17,
    AmoOr = 18,
    AmoFetchXor = 19,
    AmoXor = 20,
    AmoFetchCswap = 21,
    AmoCswap = 22,
    PutSignal = 23,
    PutSignalNbi = 24,
    SignalFetch = 25,
    Test = 26,
    WaitUntil = 27,
    Fence = 28,
    Quiet = 29,
    BarrierAll = 30,
    SyncAll = 31,
    Alltoall = 32,
    Broadcast = 33,
    Collect = 34,
    Fcollect = 35,
    AndReduce = 36,
    OrReduce = 37,
    XorReduce = 38,
    MaxReduce = 39,
    MinReduce = 40,
    SumReduce = 41,
    ProdReduce = 42,
    Kill = 43,
    Timestamp = 44,
    Print = 45,
    DebugTest = 46,
    /// Work-group leader variants of the RMA/collective/reduce ops above;
    /// data movement is cooperative, see `crate::workgroup`.
    PutWorkGroup = 47,
    GetWorkGroup = 48,
    BroadcastWorkGroup = 49,
    AlltoallWorkGroup = 50,
    FcollectWorkGroup = 51,
    SumReduceWorkGroup = 52,
}

impl TryFrom<u16> for Op {
    type Error = crate::error::ProxyError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        use Op::*;
        Ok(match v {
            0 => Nop,
            1 => NopNoReturn,
            2 => Put,
            3 => Get,
            4 => Iput,
            5 => Iget,
            6 => P,
            7 => G,
            8 => PutNbi,
            9 => GetNbi,
            10 => AmoFetch,
            11 => AmoSet,
            12 => AmoSwap,
            13 => AmoFetchAdd,
            14 => AmoAdd,
            15 => AmoFetchAnd,
            16 => AmoAnd,
            17 => AmoFetchOr,
            18 => AmoOr,
            19 => AmoFetchXor,
            20 => AmoXor,
            21 => AmoFetchCswap,
            22 => AmoCswap,
            23 => PutSignal,
            24 => PutSignalNbi,
            25 => SignalFetch,
            26 => Test,
            27 => WaitUntil,
            28 => Fence,
            29 => Quiet,
            30 => BarrierAll,
            31 => SyncAll,
            32 => Alltoall,
            33 => Broadcast,
            34 => Collect,
            35 => Fcollect,
            36 => AndReduce,
            37 => OrReduce,
            38 => XorReduce,
            39 => MaxReduce,
            40 => MinReduce,
            41 => SumReduce,
            42 => ProdReduce,
            43 => Kill,
            44 => Timestamp,
            45 => Print,
            46 => DebugTest,
            47 => PutWorkGroup,
            48 => GetWorkGroup,
            49 => BroadcastWorkGroup,
            50 => AlltoallWorkGroup,
            51 => FcollectWorkGroup,
            52 => SumReduceWorkGroup,
            other =>
                return Err(
                    crate::error::ProxyError::validation(format!("unknown op code {other}"))
                ),
        })
    }
}

/// Type discriminator for the record's scalar fields. The ordering of the
/// first block must not change: the host indexes its per-type dispatch
/// table directly with this discriminant.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Mem = 0,
    U8 = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
    Ulonglong = 5,
    I8 = 6,
    I16 = 7,
    I32 = 8,
    I64 = 9,
    Longlong = 10,
    F32 = 11,
    F64 = 12,
    Longdouble = 13,
    Char = 14,
    Schar = 15,
    Short = 16,
    Int = 17,
    Long = 18,
    Uchar = 19,
    Ushort = 20,
    Uint = 21,
    Ulong = 22,
    Size = 23,
    Ptrdiff = 24,
}

impl TryFrom<u16> for TypeCode {
    type Error = crate::error::ProxyError;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        use TypeCode::*;
        Ok(match v {
            0 => Mem,
            1 => U8,
            2 => U16,
            3 => U32,
            4 => U64,
            5 => Ulonglong,
            6 => I8,
            7 => I16,
            8 => I32,
            9 => I64,
            10 => Longlong,
            11 => F32,
            12 => F64,
            13 => Longdouble,
            14 => Char,
            15 => Schar,
            16 => Short,
            17 => Int,
            18 => Long,
            19 => Uchar,
            20 => Ushort,
            21 => Uint,
            22 => Ulong,
            23 => Size,
            24 => Ptrdiff,
            other =>
                return Err(
                    crate::error::ProxyError::validation(format!("unknown type code {other}"))
                ),
        })
    }
}

/// A 128-byte, 64-byte-aligned request record. Fits a single wide store; the
/// low 8 bytes are tag-first so the host can dispatch after one aligned load.
///
/// The two 8-byte "union" fields (offsets 48 and 56) hold overlapping
/// meanings depending on `(op, type)`; since nothing in safe Rust gives a
/// `Send + Sync`-compatible union with this layout, they are stored as raw
/// bytes and read through the typed accessors below.
#[repr(C, align(64))]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct RequestRecord {
    pub sequence: u16,
    pub completion: u16,
    op_raw: u16,
    type_raw: u16,
    pub dest_pe: i32,
    pub root: i32,
    pub src: u64,
    pub dst: u64,
    pub nelems: u64,
    pub sig_addr: u64,
    union1: [u8; 8],
    union2: [u8; 8],
    _reserved: [u8; 64],
}

const _: () = assert!(std::mem::size_of::<RequestRecord>() == 128);
const _: () = assert!(std::mem::align_of::<RequestRecord>() == 64);

impl RequestRecord {
    pub fn new(op: Op, type_code: TypeCode) -> Self {
        Self {
            sequence: 0,
            completion: 0,
            op_raw: op as u16,
            type_raw: type_code as u16,
            dest_pe: 0,
            root: 0,
            src: 0,
            dst: 0,
            nelems: 0,
            sig_addr: 0,
            union1: [0; 8],
            union2: [0; 8],
            _reserved: [0; 64],
        }
    }

    pub fn op(&self) -> crate::error::Result<Op> {
        Op::try_from(self.op_raw)
    }

    pub fn type_code(&self) -> crate::error::Result<TypeCode> {
        TypeCode::try_from(self.type_raw)
    }

    /// Overlapping union #1: compare-and-swap condition.
    pub fn cond_i64(&self) -> i64 {
        i64::from_le_bytes(self.union1)
    }

    pub fn set_cond_i64(&mut self, v: i64) {
        self.union1 = v.to_le_bytes();
    }

    /// Overlapping union #1: comparison operator for `test`/`wait_until`.
    pub fn cmp_i32(&self) -> i32 {
        i32::from_le_bytes(self.union1[0..4].try_into().unwrap())
    }

    pub fn set_cmp_i32(&mut self, v: i32) {
        self.union1[0..4].copy_from_slice(&v.to_le_bytes());
    }

    /// Overlapping union #1: signal operator for signaling puts.
    pub fn sig_op_i32(&self) -> i32 {
        i32::from_le_bytes(self.union1[0..4].try_into().unwrap())
    }

    pub fn set_sig_op_i32(&mut self, v: i32) {
        self.union1[0..4].copy_from_slice(&v.to_le_bytes());
    }

    /// Overlapping union #1: destination stride for strided RMA.
    pub fn dst_stride(&self) -> i64 {
        i64::from_le_bytes(self.union1)
    }

    pub fn set_dst_stride(&mut self, v: i64) {
        self.union1 = v.to_le_bytes();
    }

    /// Overlapping union #2: new value for AMO set/swap/add/cswap.
    pub fn value_u64(&self) -> u64 {
        u64::from_le_bytes(self.union2)
    }

    pub fn set_value_u64(&mut self, v: u64) {
        self.union2 = v.to_le_bytes();
    }

    /// Overlapping union #2: raw bytes of the compare-swap replacement value.
    pub fn cmp_value_bytes(&self) -> [u8; 8] {
        self.union2
    }

    pub fn set_cmp_value_bytes(&mut self, v: [u8; 8]) {
        self.union2 = v;
    }

    /// Overlapping union #2: signal value for `put_signal`.
    pub fn signal(&self) -> u64 {
        u64::from_le_bytes(self.union2)
    }

    pub fn set_signal(&mut self, v: u64) {
        self.union2 = v.to_le_bytes();
    }

    /// Overlapping union #2: source stride for strided RMA.
    pub fn src_stride(&self) -> i64 {
        i64::from_le_bytes(self.union2)
    }

    pub fn set_src_stride(&mut self, v: i64) {
        self.union2 = v.to_le_bytes();
    }

    /// `true` for the records `4.E`'s "non-blocking proxy" shape produces:
    /// no completion slot is attached.
    pub fn is_fire_and_forget(&self) -> bool {
        self.completion == 0
    }
}

impl std::fmt::Debug for RequestRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRecord")
            .field("sequence", &self.sequence)
            .field("completion", &self.completion)
            .field("op", &self.op_raw)
            .field("type", &self.type_raw)
            .field("dest_pe", &self.dest_pe)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("nelems", &self.nelems)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_128_bytes_64_aligned() {
        assert_eq!(std::mem::size_of::<RequestRecord>(), 128);
        assert_eq!(std::mem::align_of::<RequestRecord>(), 64);
    }

    #[test]
    fn op_and_type_round_trip() {
        let rec = RequestRecord::new(Op::Put, TypeCode::I64);
        assert_eq!(rec.op().unwrap(), Op::Put);
        assert_eq!(rec.type_code().unwrap(), TypeCode::I64);
    }

    #[test]
    fn unknown_op_code_is_rejected() {
        let mut rec = RequestRecord::new(Op::Nop, TypeCode::Mem);
        rec.op_raw = 9999;
        assert!(rec.op().is_err());
    }

    #[test]
    fn union_fields_overlap_the_same_bytes() {
        let mut rec = RequestRecord::new(Op::AmoFetchCswap, TypeCode::I32);
        rec.set_cond_i64(7);
        assert_eq!(rec.cond_i64(), 7);
        rec.set_value_u64(42);
        assert_eq!(rec.value_u64(), 42);
        // cond and value live in distinct 8-byte spans.
        assert_eq!(rec.cond_i64(), 7);
    }

    #[test]
    fn fire_and_forget_has_no_completion_slot() {
        let mut rec = RequestRecord::new(Op::PutNbi, TypeCode::U8);
        assert!(rec.is_fire_and_forget());
        rec.completion = 3;
        assert!(!rec.is_fire_and_forget());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn op_round_trip_or_rejected(code in 0u16..53) {
            prop_assert!(Op::try_from(code).is_ok());
        }

        #[test]
        fn op_codes_above_range_are_rejected(code in 53u16..=u16::MAX) {
            prop_assert!(Op::try_from(code).is_err());
        }

        #[test]
        fn type_code_round_trip_or_rejected(code in 0u16..25) {
            prop_assert!(TypeCode::try_from(code).is_ok());
        }

        #[test]
        fn type_codes_above_range_are_rejected(code in 25u16..=u16::MAX) {
            prop_assert!(TypeCode::try_from(code).is_err());
        }

        #[test]
        fn union_fields_are_independent(cond in any::<i64>(), value in any::<u64>()) {
            let mut rec = RequestRecord::new(Op::AmoFetchCswap, TypeCode::I64);
            rec.set_cond_i64(cond);
            rec.set_value_u64(value);
            prop_assert_eq!(rec.cond_i64(), cond);
            prop_assert_eq!(rec.value_u64(), value);
        }
    }
}
