//! Host capability probing.
//!
//! The supervisor degrades per-restriction rather than refusing to start:
//! chroot is skipped with a warning when unprivileged, and a failed filter
//! install is reported in the result instead of hidden. This probe exists so
//! callers can log what the host supports up front. It runs once and is
//! cached in a static `OnceLock`.
//!
//! | Capability | Check method |
//! |------------|--------------|
//! | Kernel version | `uname` syscall |
//! | Seccomp | `prctl(PR_GET_SECCOMP)` |
//! | Chroot privilege | effective UID == 0 |
//! | /proc | `/proc/self` present |

use std::sync::OnceLock;

use rustix::system::uname;
use thiserror::Error;

use crate::seccomp;

/// What the running host supports, per restriction.
#[derive(Debug, Clone)]
pub struct HostCapabilities {
    pub kernel_version: (u32, u32, u32),
    pub seccomp_enabled: bool,
    pub can_chroot: bool,
    pub proc_available: bool,
}

/// Errors that can occur while probing the host.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    #[error("failed to read kernel version")]
    KernelVersionReadFailed,
}

static HOST_CAPABILITIES: OnceLock<Result<HostCapabilities, ProbeError>> = OnceLock::new();

/// Probe host capabilities and cache the result.
///
/// Subsequent calls return the cached result.
pub fn probe() -> Result<&'static HostCapabilities, &'static ProbeError> {
    HOST_CAPABILITIES.get_or_init(probe_impl).as_ref()
}

fn probe_impl() -> Result<HostCapabilities, ProbeError> {
    Ok(HostCapabilities {
        kernel_version: get_kernel_version()?,
        seccomp_enabled: seccomp::seccomp_available(),
        can_chroot: unsafe { libc::geteuid() } == 0,
        proc_available: std::path::Path::new("/proc/self").exists(),
    })
}

fn get_kernel_version() -> Result<(u32, u32, u32), ProbeError> {
    let uts = uname();
    uts.release()
        .to_str()
        .ok()
        .and_then(kernel_version_tuple)
        .ok_or(ProbeError::KernelVersionReadFailed)
}

/// Reduce a release string like `6.1.0-generic` to its numeric tuple.
///
/// The probe only reports the tuple, so distro suffixes are simply dropped
/// with whatever trails the last dotted numeral.
fn kernel_version_tuple(release: &str) -> Option<(u32, u32, u32)> {
    let (major, rest) = release.split_once('.')?;
    let major = major.parse().ok()?;
    let (minor, patch) = match rest.split_once('.') {
        Some((minor, tail)) => (minor.parse().ok()?, leading_number(tail)),
        None => (leading_number(rest), 0),
    };
    Some((major, minor, patch))
}

/// The decimal run at the head of `s`, or 0 when there is none.
fn leading_number(s: &str) -> u32 {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_strings_reduce_to_tuples() {
        assert_eq!(kernel_version_tuple("5.15.0"), Some((5, 15, 0)));
        assert_eq!(kernel_version_tuple("6.1.0-generic"), Some((6, 1, 0)));
        assert_eq!(kernel_version_tuple("5.4.0-150-generic"), Some((5, 4, 0)));
        assert_eq!(kernel_version_tuple("6.12"), Some((6, 12, 0)));
        assert_eq!(kernel_version_tuple("6.12-rc3"), Some((6, 12, 0)));
        assert_eq!(kernel_version_tuple("notakernel"), None);
    }

    #[test]
    fn probe_reports_something() {
        let caps = probe().expect("probe should succeed on Linux");
        assert!(caps.kernel_version.0 >= 2);
        // Running under cargo test, /proc must exist on any supported host.
        assert!(caps.proc_available);
    }
}
