//! In-child policy installation.
//!
//! [`enforce`] runs exactly once in the child process, between fork and
//! exec. The order of operations is load-bearing:
//!
//! 1. **Resource limits** - must precede any allocation large enough to
//!    trip the memory cap
//! 2. **Chroot jail** - must precede exec so the target's own loader runs
//!    inside the jail
//! 3. **No-new-privileges + network filter** - after the jail entry and
//!    before exec, so the target cannot open a socket even transiently
//!
//! Rlimit and jail-primitive failures are fatal to the child. Two cases
//! degrade softly instead: chroot is skipped with a warning when the
//! effective user lacks privilege, and a failed filter install lets the
//! child proceed unrestricted. Either way the [`Installed`] record states
//! what actually took effect, and the supervisor reports it rather than
//! claiming the policy was fully applied.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use rustix::io::Errno;
use serde::Serialize;
use thiserror::Error;

use cordon_sys::last_errno;
use cordon_sys::seccomp::{
    build_network_deny_filter, seccomp_set_mode_filter, SockFprog, NETWORK_DENY_SYSCALLS,
};

use crate::policy::Policy;

/// Error during in-child policy installation. Fatal to the child.
#[derive(Debug, Error)]
pub enum EnforceError {
    #[error("setrlimit {resource}: {errno}")]
    Rlimit {
        resource: &'static str,
        errno: Errno,
    },

    #[error("chdir into jail {path}: {errno}")]
    JailEnter { path: String, errno: Errno },

    #[error("chroot: {0}")]
    Chroot(Errno),

    #[error("chdir to new root: {0}")]
    JailRoot(Errno),

    #[error("invalid path byte in jail")]
    JailPathEncoding,
}

/// Which restrictions actually took effect, as opposed to being requested.
///
/// Crosses back to the parent as a single byte on the status pipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Installed {
    pub cpu_limit: bool,
    pub memory_limit: bool,
    pub process_limit: bool,
    pub file_size_limit: bool,
    pub jail: bool,
    pub network_filter: bool,
}

const BIT_CPU: u8 = 1 << 0;
const BIT_MEMORY: u8 = 1 << 1;
const BIT_PROCESSES: u8 = 1 << 2;
const BIT_FILE_SIZE: u8 = 1 << 3;
const BIT_JAIL: u8 = 1 << 4;
const BIT_NETWORK: u8 = 1 << 5;

impl Installed {
    pub fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.cpu_limit {
            bits |= BIT_CPU;
        }
        if self.memory_limit {
            bits |= BIT_MEMORY;
        }
        if self.process_limit {
            bits |= BIT_PROCESSES;
        }
        if self.file_size_limit {
            bits |= BIT_FILE_SIZE;
        }
        if self.jail {
            bits |= BIT_JAIL;
        }
        if self.network_filter {
            bits |= BIT_NETWORK;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            cpu_limit: bits & BIT_CPU != 0,
            memory_limit: bits & BIT_MEMORY != 0,
            process_limit: bits & BIT_PROCESSES != 0,
            file_size_limit: bits & BIT_FILE_SIZE != 0,
            jail: bits & BIT_JAIL != 0,
            network_filter: bits & BIT_NETWORK != 0,
        }
    }
}

/// Install the policy on the current process.
///
/// Called in the child between fork and exec. On success the caller
/// proceeds to exec; on error the caller must write a diagnostic and
/// `_exit` non-zero. Warnings for soft degradations go to stderr here.
pub fn enforce(policy: &Policy) -> Result<Installed, EnforceError> {
    let mut installed = Installed::default();

    apply_rlimits(policy, &mut installed)?;

    if let Some(jail) = &policy.jail_path {
        enter_jail(jail, &mut installed)?;
    }

    if policy.disable_network {
        install_network_filter(&mut installed);
    }

    Ok(installed)
}

fn apply_rlimits(policy: &Policy, installed: &mut Installed) -> Result<(), EnforceError> {
    if policy.cpu_seconds > 0 {
        set_rlimit(libc::RLIMIT_CPU, "RLIMIT_CPU", policy.cpu_seconds)?;
        installed.cpu_limit = true;
    }
    if policy.memory_bytes > 0 {
        set_rlimit(libc::RLIMIT_AS, "RLIMIT_AS", policy.memory_bytes)?;
        installed.memory_limit = true;
    }
    if policy.max_processes > 0 {
        set_rlimit(libc::RLIMIT_NPROC, "RLIMIT_NPROC", policy.max_processes)?;
        installed.process_limit = true;
    }
    if policy.file_bytes > 0 {
        set_rlimit(libc::RLIMIT_FSIZE, "RLIMIT_FSIZE", policy.file_bytes)?;
        installed.file_size_limit = true;
    }
    Ok(())
}

#[inline]
fn set_rlimit(
    resource: libc::__rlimit_resource_t,
    name: &'static str,
    limit: u64,
) -> Result<(), EnforceError> {
    let rlim = libc::rlimit {
        rlim_cur: limit,
        rlim_max: limit,
    };
    // SAFETY: rlim is valid, resource is a valid constant.
    if unsafe { libc::setrlimit(resource, &rlim) } != 0 {
        Err(EnforceError::Rlimit {
            resource: name,
            errno: last_errno(),
        })
    } else {
        Ok(())
    }
}

/// Enter the jail: chdir into it, chroot the current directory, then chdir
/// to the new root. The chdir-chroot-chdir sequence guarantees relative
/// paths resolve inside the jail and no pre-chroot working directory leaks.
fn enter_jail(jail: &Path, installed: &mut Installed) -> Result<(), EnforceError> {
    if unsafe { libc::geteuid() } != 0 {
        eprintln!(
            "cordon: warning: chroot to {} requires root; continuing without jail",
            jail.display()
        );
        return Ok(());
    }

    let jail_c =
        CString::new(jail.as_os_str().as_bytes()).map_err(|_| EnforceError::JailPathEncoding)?;
    if unsafe { libc::chdir(jail_c.as_ptr()) } != 0 {
        return Err(EnforceError::JailEnter {
            path: jail.display().to_string(),
            errno: last_errno(),
        });
    }

    if unsafe { libc::chroot(c".".as_ptr()) } != 0 {
        return Err(EnforceError::Chroot(last_errno()));
    }

    if unsafe { libc::chdir(c"/".as_ptr()) } != 0 {
        return Err(EnforceError::JailRoot(last_errno()));
    }

    installed.jail = true;
    Ok(())
}

/// Install the network deny filter. Non-fatal: an incapable kernel gets a
/// warning and the child proceeds without the restriction, which the
/// supervisor surfaces through [`Installed::network_filter`].
fn install_network_filter(installed: &mut Installed) {
    let filter = build_network_deny_filter(NETWORK_DENY_SYSCALLS);
    let fprog = SockFprog {
        len: filter.len() as u16,
        filter: filter.as_ptr(),
    };
    // SAFETY: the filter is a valid BPF program built above.
    match unsafe { seccomp_set_mode_filter(&fprog) } {
        Ok(()) => installed.network_filter = true,
        Err(errno) => {
            eprintln!("cordon: warning: network filter install failed ({errno}); continuing without it");
        }
    }
}
