//! Daemon subsystem: job scheduling, signal handling, and process identity.

pub mod scheduler;
#[cfg(feature = "daemon")]
pub mod signals;

/// Fix the kernel-visible process name so operators find the service under
/// a stable identity.
#[cfg(target_os = "linux")]
pub fn set_process_name(name: &str) {
    if let Ok(cname) = std::ffi::CString::new(name) {
        let _ = nix::sys::prctl::set_name(&cname);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_process_name(_name: &str) {}
