//! CPU affinity pinning.

use std::io;
use std::mem;

use crate::error::{affinity_error, Result};

/// Pins the calling thread to a single core.
pub trait Affinity: Sync {
    /// Restricts the calling thread to `core`.
    fn pin_current(&self, core: usize) -> Result<()>;
}

/// Pins through the OS scheduler (`sched_setaffinity` on the calling thread).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsAffinity;

impl Affinity for OsAffinity {
    fn pin_current(&self, core: usize) -> Result<()> {
        if core >= libc::CPU_SETSIZE as usize {
            return Err(affinity_error(core, io::Error::from_raw_os_error(libc::EINVAL)));
        }

        // SAFETY: cpu_set_t is plain data; zeroed is the empty set.
        let mut cpuset: libc::cpu_set_t = unsafe { mem::zeroed() };
        // SAFETY: core < CPU_SETSIZE was checked above.
        unsafe {
            libc::CPU_ZERO(&mut cpuset);
            libc::CPU_SET(core, &mut cpuset);
        }

        // pid 0 targets the calling thread
        let rc = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpuset) };
        if rc != 0 {
            return Err(affinity_error(core, io::Error::last_os_error()));
        }
        Ok(())
    }
}

/// Cores the calling thread is currently allowed to run on.
pub fn current_cores() -> Result<Vec<usize>> {
    // SAFETY: cpu_set_t is plain data; zeroed is the empty set.
    let mut cpuset: libc::cpu_set_t = unsafe { mem::zeroed() };
    let rc = unsafe { libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut cpuset) };
    if rc != 0 {
        return Err(affinity_error(0, io::Error::last_os_error()));
    }
    Ok((0..libc::CPU_SETSIZE as usize)
        .filter(|&core| unsafe { libc::CPU_ISSET(core, &cpuset) })
        .collect())
}
