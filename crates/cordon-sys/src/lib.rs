//! Low-level Linux syscall wrappers for the cordon supervisor.
//!
//! This crate provides thin wrappers around the security syscalls the
//! supervisor needs and that are not covered by rustix or libc helpers.
//! For standard syscalls, use rustix or libc directly.
//!
//! ## Modules
//!
//! - **seccomp** - Seccomp-BPF network syscall filtering
//! - **check** - Runtime capability probing (seccomp, chroot privilege, /proc)
//!
//! # Safety
//!
//! This crate contains raw syscall wrappers. Casts between integer types
//! are unavoidable when interfacing with the kernel ABI.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod check;
pub mod seccomp;

pub use check::{probe, HostCapabilities, ProbeError};

#[inline]
pub fn last_errno() -> rustix::io::Errno {
    // SAFETY: __errno_location always returns a valid thread-local pointer.
    rustix::io::Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}
