//! Environment-driven configuration, mirroring the reference's env-var option list.

use crate::error::{ ProxyError, Result };

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) =>
            match v.trim() {
                "1" | "true" | "TRUE" | "yes" => Ok(true),
                "0" | "false" | "FALSE" | "no" => Ok(false),
                other =>
                    Err(
                        ProxyError::config(
                            format!("{name}: expected a boolean, got {other:?}")
                        )
                    ),
            }
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(v) =>
            v
                .trim()
                .parse::<usize>()
                .map_err(|e| ProxyError::config(format!("{name}: {e}"))),
    }
}

/// Configuration surface read once at [`crate::context::Context::init`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes of the symmetric heap.
    pub symmetric_size: usize,
    /// Enables intra-node direct-mode fast paths.
    pub enable_gpu_ipc: bool,
    /// Selects the handle-exchange mechanism used to set up peer mappings.
    pub enable_gpu_ipc_pidfd: bool,
    /// Host pointers in the heap are directly dereferenceable from the device.
    pub enable_accessible_host_heap: bool,
    /// Budget of outstanding non-blocking ops before an implicit drain.
    pub nbi_count: usize,
    /// Host-side low-power polling burst budget; `0` means busy-spin.
    pub mwait_burst: usize,
    /// Upper bound on collective teams per PE.
    pub teams_max: usize,
    /// Diagnostic verbosity.
    pub debug: bool,
    pub enable_verbose_print: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symmetric_size: 512 * 1024 * 1024,
            enable_gpu_ipc: true,
            enable_gpu_ipc_pidfd: true,
            enable_accessible_host_heap: false,
            nbi_count: 1024,
            mwait_burst: 0,
            teams_max: 64,
            debug: false,
            enable_verbose_print: false,
        }
    }
}

impl Config {
    /// Parse the `SHMEM_PROXY_*` environment variables, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Result<Self> {
        let default = Self::default();
        Ok(Self {
            symmetric_size: env_usize("SHMEM_PROXY_SYMMETRIC_SIZE", default.symmetric_size)?,
            enable_gpu_ipc: env_bool("SHMEM_PROXY_ENABLE_GPU_IPC", default.enable_gpu_ipc)?,
            enable_gpu_ipc_pidfd: env_bool(
                "SHMEM_PROXY_ENABLE_GPU_IPC_PIDFD",
                default.enable_gpu_ipc_pidfd
            )?,
            enable_accessible_host_heap: env_bool(
                "SHMEM_PROXY_ENABLE_ACCESSIBLE_HOST_HEAP",
                default.enable_accessible_host_heap
            )?,
            nbi_count: env_usize("SHMEM_PROXY_NBI_COUNT", default.nbi_count)?,
            mwait_burst: env_usize("SHMEM_PROXY_MWAIT_BURST", default.mwait_burst)?,
            teams_max: env_usize("SHMEM_PROXY_TEAMS_MAX", default.teams_max)?,
            debug: env_bool("SHMEM_PROXY_DEBUG", default.debug)?,
            enable_verbose_print: env_bool(
                "SHMEM_PROXY_ENABLE_VERBOSE_PRINT",
                default.enable_verbose_print
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let c = Config::default();
        assert_eq!(c.symmetric_size, 512 * 1024 * 1024);
        assert_eq!(c.nbi_count, 1024);
        assert_eq!(c.teams_max, 64);
        assert!(c.enable_gpu_ipc);
        assert!(!c.debug);
    }

    #[test]
    fn unset_env_vars_fall_back_to_defaults() {
        let c = Config::from_env().unwrap();
        assert_eq!(c.symmetric_size, Config::default().symmetric_size);
    }

    #[test]
    fn rejects_unparseable_bool() {
        assert!(env_bool("SHMEM_PROXY_NONEXISTENT_BOOL_VAR", false).is_ok());
    }
}
