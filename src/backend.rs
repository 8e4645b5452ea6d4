//! The opaque runtime backend: the proxy loop's only way to reach another PE.
//! Modeled as a trait so a real network runtime (MPI, OpenSHMEM, ...) could
//! be substituted without touching the proxy loop; this crate ships only a
//! [`LoopbackBackend`] that simulates a multi-PE `World` within one process,
//! since no real network binding is part of this crate's scope.
//!
//! Shaped after the reference's abstract test-runtime interface
//! (`init`/`finalize`/`calloc`/`malloc`/`free`/`sync`/`broadcast`/typed
//! reductions), extended with `put`/`get`/`amo` because the proxy loop must
//! be able to execute every RMA and atomic op in the dispatch table, not just
//! the handful a test harness needs.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ ProxyError, Result };
use crate::record::TypeCode;

/// Reduction operator, shared across all scalar types by `Backend::reduce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    And,
    Or,
    Xor,
    Max,
    Min,
    Sum,
    Prod,
}

/// Atomic memory operator, shared across all scalar types by `Backend::amo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmoOp {
    Fetch,
    Set,
    Swap,
    FetchAdd,
    Add,
    FetchAnd,
    And,
    FetchOr,
    Or,
    FetchXor,
    Xor,
    FetchCswap,
    Cswap,
}

/// The PE-addressed, symmetric-memory collective+RMA+reduction model the
/// proxy dispatches every network-bound operation through.
pub trait Backend: Send + Sync {
    fn init(&self) -> Result<()>;
    fn finalize(&self) -> Result<()>;
    fn n_pes(&self) -> usize;
    fn my_pe(&self) -> usize;

    /// Barrier across every PE.
    fn sync(&self) -> Result<()>;

    /// Copies `src` into `dest_pe`'s symmetric heap at `offset`.
    fn put(&self, dest_pe: usize, offset: usize, src: &[u8]) -> Result<()>;

    /// Copies `src_pe`'s symmetric heap at `offset` into `dest`.
    fn get(&self, src_pe: usize, offset: usize, dest: &mut [u8]) -> Result<()>;

    /// Performs an atomic read-modify-write of width `type_code` at
    /// `(pe, offset)`. `value` and `cond` are little-endian scalars padded
    /// to 8 bytes; returns the pre-operation value, likewise padded.
    fn amo(
        &self,
        pe: usize,
        offset: usize,
        op: AmoOp,
        type_code: TypeCode,
        value: [u8; 8],
        cond: [u8; 8]
    ) -> Result<[u8; 8]>;

    /// Copies `root`'s buffer at `offset` (`size` bytes) into every PE's
    /// buffer at the same offset, including `root`'s own.
    fn broadcast(&self, root: usize, offset: usize, size: usize) -> Result<()>;

    /// Elementwise-combines every PE's buffer at `src_offset` (`nelems`
    /// scalars of width `type_code`) and writes the identical result into
    /// every PE's buffer at `dest_offset`.
    fn reduce(
        &self,
        op: ReduceOp,
        type_code: TypeCode,
        dest_offset: usize,
        src_offset: usize,
        nelems: usize
    ) -> Result<()>;

    /// Personalized exchange: PE `i`'s chunk destined for PE `j` (the `j`-th
    /// `chunk_bytes`-sized slice of its `src_offset` buffer) lands at PE
    /// `j`'s `dest_offset` buffer, in the slot reserved for PE `i`.
    fn alltoall(&self, dest_offset: usize, src_offset: usize, chunk_bytes: usize) -> Result<()>;

    /// Concatenated gather: PE `i`'s `chunk_bytes`-sized `src_offset` buffer
    /// lands, in rank order, at every PE's `dest_offset` buffer.
    fn fcollect(&self, dest_offset: usize, src_offset: usize, chunk_bytes: usize) -> Result<()>;
}

pub(crate) fn type_width(type_code: TypeCode) -> usize {
    use TypeCode::*;
    match type_code {
        Mem | U8 | I8 | Char | Schar | Uchar => 1,
        U16 | I16 | Short | Ushort => 2,
        U32 | I32 | F32 | Int | Uint => 4,
        U64 | Ulonglong | I64 | Longlong | F64 | Long | Ulong | Size | Ptrdiff => 8,
        Longdouble => 16,
    }
}

macro_rules! amo_int_arm {
    ($width_ty:ty, $op:expr, $value:expr, $cond:expr, $cell:expr) => {{
        let cur = <$width_ty>::from_le_bytes($cell[..std::mem::size_of::<$width_ty>()].try_into().unwrap());
        let value = <$width_ty>::from_le_bytes($value[..std::mem::size_of::<$width_ty>()].try_into().unwrap());
        let cond = <$width_ty>::from_le_bytes($cond[..std::mem::size_of::<$width_ty>()].try_into().unwrap());
        let (pre, new) = match $op {
            AmoOp::Fetch => (cur, cur),
            AmoOp::Set => (cur, value),
            AmoOp::Swap => (cur, value),
            AmoOp::FetchAdd | AmoOp::Add => (cur, cur.wrapping_add(value)),
            AmoOp::FetchAnd | AmoOp::And => (cur, cur & value),
            AmoOp::FetchOr | AmoOp::Or => (cur, cur | value),
            AmoOp::FetchXor | AmoOp::Xor => (cur, cur ^ value),
            AmoOp::FetchCswap | AmoOp::Cswap => (cur, if cur == cond { value } else { cur }),
        };
        $cell[..std::mem::size_of::<$width_ty>()].copy_from_slice(&new.to_le_bytes());
        let mut ret = [0u8; 8];
        ret[..std::mem::size_of::<$width_ty>()].copy_from_slice(&pre.to_le_bytes());
        ret
    }};
}

/// A simulated multi-PE world: one growable symmetric heap per PE, all
/// reachable from every other "PE" within this process. Stands in for the
/// bootstrap/discovery layer this crate does not implement.
pub struct World {
    heaps: Vec<Mutex<Vec<u8>>>,
}

impl World {
    pub fn new(n_pes: usize, heap_size: usize) -> Arc<Self> {
        let heaps = (0..n_pes).map(|_| Mutex::new(vec![0u8; heap_size])).collect();
        Arc::new(Self { heaps })
    }

    pub fn n_pes(&self) -> usize {
        self.heaps.len()
    }
}

/// The default [`Backend`]: every PE's heap lives in the same process, and
/// every operation executes synchronously against a [`World`]. Suitable for
/// unit/integration tests and the single-process demo binary; not a stand-in
/// for a real network runtime.
pub struct LoopbackBackend {
    world: Arc<World>,
    my_pe: usize,
}

impl LoopbackBackend {
    pub fn new(world: Arc<World>, my_pe: usize) -> Self {
        Self { world, my_pe }
    }

    fn heap(&self, pe: usize) -> Result<&Mutex<Vec<u8>>> {
        self.world
            .heaps
            .get(pe)
            .ok_or_else(|| ProxyError::backend(format!("no such PE {pe}")))
    }
}

impl Backend for LoopbackBackend {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        Ok(())
    }

    fn n_pes(&self) -> usize {
        self.world.n_pes()
    }

    fn my_pe(&self) -> usize {
        self.my_pe
    }

    fn sync(&self) -> Result<()> {
        // A loopback backend has no other participants to wait for.
        Ok(())
    }

    fn put(&self, dest_pe: usize, offset: usize, src: &[u8]) -> Result<()> {
        let heap = self.heap(dest_pe)?;
        let mut guard = heap.lock();
        let end = offset + src.len();
        if end > guard.len() {
            return Err(ProxyError::backend("put out of bounds"));
        }
        guard[offset..end].copy_from_slice(src);
        Ok(())
    }

    fn get(&self, src_pe: usize, offset: usize, dest: &mut [u8]) -> Result<()> {
        let heap = self.heap(src_pe)?;
        let guard = heap.lock();
        let end = offset + dest.len();
        if end > guard.len() {
            return Err(ProxyError::backend("get out of bounds"));
        }
        dest.copy_from_slice(&guard[offset..end]);
        Ok(())
    }

    fn amo(
        &self,
        pe: usize,
        offset: usize,
        op: AmoOp,
        type_code: TypeCode,
        value: [u8; 8],
        cond: [u8; 8]
    ) -> Result<[u8; 8]> {
        let width = type_width(type_code);
        let heap = self.heap(pe)?;
        let mut guard = heap.lock();
        if offset + width > guard.len() {
            return Err(ProxyError::backend("amo out of bounds"));
        }
        let cell = &mut guard[offset..offset + width];
        let ret = match width {
            1 => amo_int_arm!(u8, op, value, cond, cell),
            2 => amo_int_arm!(u16, op, value, cond, cell),
            4 => amo_int_arm!(u32, op, value, cond, cell),
            8 => amo_int_arm!(u64, op, value, cond, cell),
            other => {
                return Err(ProxyError::backend(format!("unsupported amo width {other}")));
            }
        };
        Ok(ret)
    }

    fn broadcast(&self, root: usize, offset: usize, size: usize) -> Result<()> {
        let payload = {
            let root_heap = self.heap(root)?;
            let guard = root_heap.lock();
            if offset + size > guard.len() {
                return Err(ProxyError::backend("broadcast out of bounds"));
            }
            guard[offset..offset + size].to_vec()
        };
        for pe in 0..self.n_pes() {
            self.put(pe, offset, &payload)?;
        }
        Ok(())
    }

    fn reduce(
        &self,
        op: ReduceOp,
        type_code: TypeCode,
        dest_offset: usize,
        src_offset: usize,
        nelems: usize
    ) -> Result<()> {
        let width = type_width(type_code);
        let n_pes = self.n_pes();
        let mut combined = vec![0u8; nelems * width];

        for pe in 0..n_pes {
            let heap = self.heap(pe)?;
            let guard = heap.lock();
            let end = src_offset + nelems * width;
            if end > guard.len() {
                return Err(ProxyError::backend("reduce source out of bounds"));
            }
            let src = &guard[src_offset..end];
            for elem in 0..nelems {
                let lo = elem * width;
                let cell = &mut combined[lo..lo + width];
                let other = &src[lo..lo + width];
                if pe == 0 {
                    cell.copy_from_slice(other);
                } else {
                    combine_scalar(op, type_code, cell, other);
                }
            }
        }

        for pe in 0..n_pes {
            self.put(pe, dest_offset, &combined)?;
        }
        Ok(())
    }

    fn alltoall(&self, dest_offset: usize, src_offset: usize, chunk_bytes: usize) -> Result<()> {
        let n_pes = self.n_pes();
        let mut staged = vec![vec![0u8; chunk_bytes * n_pes]; n_pes];
        for i in 0..n_pes {
            let heap = self.heap(i)?;
            let guard = heap.lock();
            let end = src_offset + chunk_bytes * n_pes;
            if end > guard.len() {
                return Err(ProxyError::backend("alltoall source out of bounds"));
            }
            for j in 0..n_pes {
                let lo = src_offset + j * chunk_bytes;
                staged[j][i * chunk_bytes..(i + 1) * chunk_bytes].copy_from_slice(
                    &guard[lo..lo + chunk_bytes]
                );
            }
        }
        for j in 0..n_pes {
            self.put(j, dest_offset, &staged[j])?;
        }
        Ok(())
    }

    fn fcollect(&self, dest_offset: usize, src_offset: usize, chunk_bytes: usize) -> Result<()> {
        let n_pes = self.n_pes();
        let mut combined = vec![0u8; chunk_bytes * n_pes];
        for i in 0..n_pes {
            let heap = self.heap(i)?;
            let guard = heap.lock();
            let end = src_offset + chunk_bytes;
            if end > guard.len() {
                return Err(ProxyError::backend("fcollect source out of bounds"));
            }
            combined[i * chunk_bytes..(i + 1) * chunk_bytes].copy_from_slice(
                &guard[src_offset..end]
            );
        }
        for pe in 0..n_pes {
            self.put(pe, dest_offset, &combined)?;
        }
        Ok(())
    }
}

fn combine_scalar(op: ReduceOp, type_code: TypeCode, cell: &mut [u8], other: &[u8]) {
    match type_code {
        TypeCode::F32 => {
            let a = f32::from_le_bytes(cell.try_into().unwrap());
            let b = f32::from_le_bytes(other.try_into().unwrap());
            let r = combine_float(op, a as f64, b as f64) as f32;
            cell.copy_from_slice(&r.to_le_bytes());
        }
        TypeCode::F64 => {
            let a = f64::from_le_bytes(cell.try_into().unwrap());
            let b = f64::from_le_bytes(other.try_into().unwrap());
            let r = combine_float(op, a, b);
            cell.copy_from_slice(&r.to_le_bytes());
        }
        _ => {
            match cell.len() {
                1 => {
                    let a = u8::from_le_bytes(cell.try_into().unwrap());
                    let b = u8::from_le_bytes(other.try_into().unwrap());
                    cell.copy_from_slice(&combine_int(op, a as u64, b as u64).to_le_bytes()[..1]);
                }
                2 => {
                    let a = u16::from_le_bytes(cell.try_into().unwrap());
                    let b = u16::from_le_bytes(other.try_into().unwrap());
                    cell.copy_from_slice(
                        &(combine_int(op, a as u64, b as u64) as u16).to_le_bytes()
                    );
                }
                4 => {
                    let a = u32::from_le_bytes(cell.try_into().unwrap());
                    let b = u32::from_le_bytes(other.try_into().unwrap());
                    cell.copy_from_slice(
                        &(combine_int(op, a as u64, b as u64) as u32).to_le_bytes()
                    );
                }
                8 => {
                    let a = u64::from_le_bytes(cell.try_into().unwrap());
                    let b = u64::from_le_bytes(other.try_into().unwrap());
                    cell.copy_from_slice(&combine_int(op, a, b).to_le_bytes());
                }
                _ => unreachable!("unsupported reduce width"),
            }
        }
    }
}

fn combine_int(op: ReduceOp, a: u64, b: u64) -> u64 {
    match op {
        ReduceOp::And => a & b,
        ReduceOp::Or => a | b,
        ReduceOp::Xor => a ^ b,
        ReduceOp::Max => a.max(b),
        ReduceOp::Min => a.min(b),
        ReduceOp::Sum => a.wrapping_add(b),
        ReduceOp::Prod => a.wrapping_mul(b),
    }
}

fn combine_float(op: ReduceOp, a: f64, b: f64) -> f64 {
    match op {
        ReduceOp::Max => a.max(b),
        ReduceOp::Min => a.min(b),
        ReduceOp::Sum => a + b,
        ReduceOp::Prod => a * b,
        ReduceOp::And | ReduceOp::Or | ReduceOp::Xor => {
            panic!("bitwise reduce is not defined for floating-point types")
        }
    }
}
