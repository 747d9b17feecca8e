//! Seccomp-BPF network syscall filtering.
//!
//! The supervisor blocks outbound network access by installing a small BPF
//! program in the child before exec. Unlike a whitelist sandbox, the filter
//! here is a deny-list: the six outbound socket-family syscalls fail with
//! `EPERM` and every other syscall is allowed. The target keeps running and
//! observes ordinary "operation not permitted" errors instead of dying to
//! SIGSYS, which is what callers of a network-restricted sandbox expect.
//!
//! ## Filter Structure
//!
//! The BPF program runs on every syscall:
//!
//! 1. Verify architecture is `x86_64` (allow otherwise - numbers would not
//!    be comparable, and a permission error on the wrong table is worse
//!    than no filter)
//! 2. Load the syscall number from `seccomp_data`
//! 3. Compare against the deny list; a match returns `EPERM`
//! 4. Everything else is allowed
//!
//! ## Security Notes
//!
//! - The filter is permanent - it cannot be removed once applied
//! - Installation requires `PR_SET_NO_NEW_PRIVS` first, which is set by
//!   [`seccomp_set_mode_filter`] as part of the install
//! - `socketpair` is deliberately absent from the deny list: it creates a
//!   local AF_UNIX pair and cannot reach the network

use rustix::io::Errno;

use crate::last_errno;

// Seccomp constants
const SECCOMP_SET_MODE_FILTER: u32 = 1;
const SECCOMP_RET_ALLOW: u32 = 0x7fff0000;
// Deny with errno: EPERM ("operation not permitted")
const SECCOMP_RET_ERRNO_EPERM: u32 = 0x00050000 | libc::EPERM as u32;

// BPF instruction classes
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;

// BPF ld/ldx fields
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;

// BPF jmp fields
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;

const AUDIT_ARCH_X86_64: u32 = 0xc000003e;

// seccomp_data offsets (x86_64)
const OFFSET_SYSCALL_NR: u32 = 0;
const OFFSET_ARCH: u32 = 4;

/// Maximum deny-list size (BPF jump offsets are u8)
const MAX_DENY_LIST_SIZE: usize = 200;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    #[inline]
    pub const fn stmt(code: u16, k: u32) -> Self {
        Self {
            code,
            jt: 0,
            jf: 0,
            k,
        }
    }

    #[inline]
    pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

#[repr(C)]
#[derive(Debug)]
pub struct SockFprog {
    pub len: u16,
    pub filter: *const SockFilter,
}

/// The outbound socket-family syscalls denied when the network is disabled.
///
/// `socketpair` stays allowed (local IPC only), as do `bind`/`listen`/
/// `accept` - without `socket` there is nothing to bind or accept on, and
/// an inherited listening fd is the supervisor's responsibility, not ours.
pub const NETWORK_DENY_SYSCALLS: &[i64] = &[
    libc::SYS_socket,
    libc::SYS_connect,
    libc::SYS_sendto,
    libc::SYS_sendmsg,
    libc::SYS_recvfrom,
    libc::SYS_recvmsg,
];

/// Builds a BPF filter that returns `EPERM` for the listed syscalls and
/// allows everything else.
///
/// ## Filter Layout
///
/// ```text
/// [0-2]   Architecture check (x86_64; foreign arch -> ALLOW)
/// [3]     Load syscall number
/// [4..N]  Deny-list checks -> ERRNO(EPERM)
/// [N+1]   RET ALLOW (default)
/// [N+2]   RET ERRNO(EPERM)
/// ```
///
/// # Panics
///
/// Panics if `syscalls.len()` > 200 (BPF jump offsets are u8).
pub fn build_network_deny_filter(syscalls: &[i64]) -> Vec<SockFilter> {
    assert!(
        syscalls.len() <= MAX_DENY_LIST_SIZE,
        "deny list too large: {} > {} (BPF jump offset overflow)",
        syscalls.len(),
        MAX_DENY_LIST_SIZE
    );

    let n = syscalls.len();
    let mut filter = Vec::with_capacity(n + 6);

    // === Architecture check ===
    filter.push(SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, OFFSET_ARCH));
    filter.push(SockFilter::jump(
        BPF_JMP | BPF_JEQ | BPF_K,
        AUDIT_ARCH_X86_64,
        1,
        0,
    ));
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));

    // === Load syscall number ===
    filter.push(SockFilter::stmt(
        BPF_LD | BPF_W | BPF_ABS,
        OFFSET_SYSCALL_NR,
    ));

    // === Deny-list check ===
    for (i, &nr) in syscalls.iter().enumerate() {
        let deny_offset = (n - i) as u8;
        filter.push(SockFilter::jump(
            BPF_JMP | BPF_JEQ | BPF_K,
            nr as u32,
            deny_offset,
            0,
        ));
    }

    // === Default allow ===
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ALLOW));

    // === ERRNO(EPERM) ===
    filter.push(SockFilter::stmt(BPF_RET | BPF_K, SECCOMP_RET_ERRNO_EPERM));

    filter
}

/// Applies a seccomp-BPF filter to the current thread.
///
/// Sets `PR_SET_NO_NEW_PRIVS` first; the kernel refuses unprivileged filter
/// installation without it.
///
/// # Safety
///
/// This permanently restricts syscalls for this thread. The filter must be
/// a valid BPF program.
///
/// # Errors
///
/// Returns `Errno` if the no-new-privileges bit or the filter cannot be
/// applied.
pub unsafe fn seccomp_set_mode_filter(fprog: &SockFprog) -> Result<(), Errno> {
    let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if ret != 0 {
        return Err(last_errno());
    }

    let ret = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_SET_MODE_FILTER,
            0u32,
            fprog as *const _,
        )
    };
    if ret != 0 {
        Err(last_errno())
    } else {
        Ok(())
    }
}

/// Returns true if seccomp is available on this kernel.
pub fn seccomp_available() -> bool {
    unsafe { libc::prctl(libc::PR_GET_SECCOMP, 0, 0, 0, 0) >= 0 }
}
