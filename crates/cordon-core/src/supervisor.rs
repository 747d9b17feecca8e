//! The supervisor loop: fork, enforce-and-exec, wait, classify.
//!
//! The parent is strictly sequential: seal the policy, resolve the target,
//! fork, wait. The child runs the enforcer and execs; it never returns into
//! Rust code on success. The only parent-child channel besides the exit
//! status is a one-byte CLOEXEC pipe carrying the [`Installed`] record, so
//! the report can state which restrictions actually took effect.
//!
//! ## Wait strategy
//!
//! Without a timeout the parent blocks in `waitpid`. With one, it polls
//! `WNOHANG` at a 1-second cadence and sends SIGKILL on expiry, then reaps.
//! Attribution races resolve to the first cause observed: a recognised
//! resource signal always beats the post-hoc timeout flag.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use cordon_sys::last_errno;

use crate::enforce::{enforce, Installed};
use crate::error::SupervisorError;
use crate::policy::Policy;
use crate::report::{LimitFlags, PolicyEcho, RunReport};

/// Child exit status when the enforcer fails before exec.
pub const EXIT_ENFORCE_FAILED: i32 = 126;
/// Child exit status when exec itself fails.
pub const EXIT_EXEC_FAILED: i32 = 127;

/// One completed supervised execution, ready for classification.
#[derive(Debug)]
struct ChildRun {
    pid: libc::pid_t,
    raw_status: i32,
    timed_out: bool,
    installed: Installed,
}

/// Run the policy's target to completion and report the outcome.
pub fn run(policy: &Policy) -> Result<RunReport, SupervisorError> {
    run_with_observer(policy, |_| {})
}

/// Like [`run`], but hands the child PID to `on_spawn` right after fork -
/// the attach surface for an external monitor.
pub fn run_with_observer(
    policy: &Policy,
    mut on_spawn: impl FnMut(i32),
) -> Result<RunReport, SupervisorError> {
    let policy = policy.clone().sealed()?;
    let binary = resolve_binary(&policy.target_argv[0])?;
    debug!(target = %binary.display(), "resolved target binary");

    // Flag restrictions that will degrade before the child even exists.
    if let Ok(caps) = cordon_sys::probe() {
        if policy.disable_network && !caps.seccomp_enabled {
            warn!("seccomp unavailable on this kernel; the network filter will not install");
        }
        if policy.jail_path.is_some() && !caps.can_chroot {
            warn!("not running as root; the jail will be skipped");
        }
    }

    let (status_read, status_write) = status_pipe()?;

    let start = Instant::now();
    // SAFETY: plain fork; the child branch only calls exec-or-_exit paths.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let errno = last_errno();
        unsafe {
            libc::close(status_read);
            libc::close(status_write);
        }
        return Err(SupervisorError::Fork(errno));
    }

    if pid == 0 {
        // Child. Never returns.
        unsafe { libc::close(status_read) };
        child_branch(&policy, &binary, status_write);
    }

    unsafe { libc::close(status_write) };
    debug!(pid, "child forked");
    on_spawn(pid);

    let installed = read_installed(status_read);
    let (raw_status, timed_out) = wait_child(pid, policy.timeout_seconds)?;
    // Read strictly after the terminal wait, so elapsed is a safe upper
    // bound on the child's wall time.
    let elapsed = start.elapsed();

    let run = ChildRun {
        pid,
        raw_status,
        timed_out,
        installed,
    };
    debug!(
        pid = run.pid,
        raw_status,
        elapsed_ms = elapsed.as_millis() as u64,
        "child reaped"
    );

    classify(run, elapsed, &policy)
}

/// Resolve the target via PATH lookup, before fork. A missing target is a
/// supervisor-side failure: no child is spawned for it.
fn resolve_binary(cmd: &str) -> Result<PathBuf, SupervisorError> {
    if cmd.starts_with('/') {
        let path = PathBuf::from(cmd);
        if !path.exists() {
            return Err(SupervisorError::CommandNotFound(cmd.to_string()));
        }
        return Ok(path);
    }
    which::which(cmd).map_err(|_| SupervisorError::CommandNotFound(cmd.to_string()))
}

fn status_pipe() -> Result<(i32, i32), SupervisorError> {
    let mut fds = [0i32; 2];
    // SAFETY: fds is a valid two-element array.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(SupervisorError::StatusPipe(last_errno()));
    }
    Ok((fds[0], fds[1]))
}

/// Child branch: install the policy, report what stuck, exec the target.
fn child_branch(policy: &Policy, binary: &Path, status_write: i32) -> ! {
    let installed = match enforce(policy) {
        Ok(installed) => installed,
        Err(e) => {
            eprintln!("cordon: {e}");
            unsafe { libc::_exit(EXIT_ENFORCE_FAILED) };
        }
    };

    // One byte to the parent: which restrictions took effect. The pipe is
    // CLOEXEC, so a successful exec closes it and the parent sees exactly
    // this byte; a dead child yields EOF instead.
    let bits = installed.to_bits();
    unsafe {
        libc::write(status_write, (&bits as *const u8).cast(), 1);
    }

    exec_target(binary, &policy.target_argv);

    eprintln!(
        "cordon: failed to execute '{}': {}",
        policy.target_argv[0],
        last_errno()
    );
    unsafe { libc::_exit(EXIT_EXEC_FAILED) };
}

/// Replace the child image with the target. Only returns on failure.
fn exec_target(binary: &Path, argv: &[String]) {
    let Ok(path_c) = CString::new(binary.as_os_str().as_bytes()) else {
        return;
    };

    let mut argv_c: Vec<CString> = Vec::with_capacity(argv.len());
    for arg in argv {
        match CString::new(arg.as_bytes()) {
            Ok(c) => argv_c.push(c),
            Err(_) => return,
        }
    }

    let argv_ptrs: Vec<*const libc::c_char> = argv_c
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();

    // SAFETY: argv_ptrs is null-terminated and the CStrings outlive the
    // call. The environment is inherited unchanged.
    unsafe { libc::execv(path_c.as_ptr(), argv_ptrs.as_ptr()) };
}

/// Read the child's installed-restrictions byte. EOF (child died before
/// writing) reads as "nothing installed".
fn read_installed(status_read: i32) -> Installed {
    let mut byte = 0u8;
    let installed = loop {
        // SAFETY: one-byte read into a valid buffer.
        let n = unsafe { libc::read(status_read, (&mut byte as *mut u8).cast(), 1) };
        if n == 1 {
            break Installed::from_bits(byte);
        }
        if n < 0 && last_errno() == rustix::io::Errno::INTR {
            continue;
        }
        break Installed::default();
    };
    unsafe { libc::close(status_read) };
    installed
}

/// Wait for the child, optionally under a wall-clock watchdog.
///
/// Returns the raw status word and whether the watchdog fired.
fn wait_child(pid: libc::pid_t, timeout_seconds: u64) -> Result<(i32, bool), SupervisorError> {
    if timeout_seconds == 0 {
        return Ok((waitpid_blocking(pid)?, false));
    }

    let deadline = Instant::now() + Duration::from_secs(timeout_seconds);
    loop {
        let mut status = 0i32;
        // SAFETY: status is a valid out-pointer.
        let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if ret == pid {
            return Ok((status, false));
        }
        if ret < 0 {
            let errno = last_errno();
            if errno == rustix::io::Errno::INTR {
                continue;
            }
            return Err(SupervisorError::Wait(errno));
        }
        if Instant::now() >= deadline {
            unsafe { libc::kill(pid, libc::SIGKILL) };
            debug!(pid, timeout_seconds, "watchdog expired; child killed");
            return Ok((waitpid_blocking(pid)?, true));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(Duration::from_secs(1).min(remaining));
    }
}

fn waitpid_blocking(pid: libc::pid_t) -> Result<i32, SupervisorError> {
    let mut status = 0i32;
    loop {
        // SAFETY: status is a valid out-pointer.
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret == pid {
            return Ok(status);
        }
        if ret < 0 {
            let errno = last_errno();
            if errno == rustix::io::Errno::INTR {
                continue;
            }
            return Err(SupervisorError::Wait(errno));
        }
    }
}

/// Interpret the raw status word into a report.
fn classify(
    run: ChildRun,
    elapsed: Duration,
    policy: &Policy,
) -> Result<RunReport, SupervisorError> {
    let status = run.raw_status;
    let echo = PolicyEcho::from_policy(policy);

    if libc::WIFEXITED(status) {
        let code = libc::WEXITSTATUS(status);
        return Ok(RunReport::new(
            run.pid,
            elapsed.as_secs_f64(),
            Some(code),
            None,
            false,
            LimitFlags::default(),
            run.installed,
            echo,
        ));
    }

    if libc::WIFSIGNALED(status) {
        let signal = libc::WTERMSIG(status);
        let mut flags = LimitFlags::default();
        if signal == libc::SIGXCPU {
            flags.cpu = true;
        } else if signal == libc::SIGXFSZ {
            flags.file_size = true;
        } else if signal == libc::SIGKILL && run.timed_out {
            flags.timeout = true;
        } else if signal == libc::SIGKILL && policy.memory_bytes > 0 {
            // The kernel's memory-limit path is an uncatchable kill with no
            // dedicated signal; this attribution is best-effort.
            flags.memory = true;
        }
        return Ok(RunReport::new(
            run.pid,
            elapsed.as_secs_f64(),
            None,
            Some(signal),
            libc::WCOREDUMP(status),
            flags,
            run.installed,
            echo,
        ));
    }

    if libc::WIFSTOPPED(status) {
        return Err(SupervisorError::ChildStopped(libc::WSTOPSIG(status)));
    }

    Err(SupervisorError::UnknownStatus(status))
}
