//! The restriction policy for one supervised run.
//!
//! A `Policy` describes everything the supervisor will enforce on the child:
//! resource limits, an optional chroot jail, the network filter, an optional
//! wall-clock watchdog, and the target command itself.
//!
//! ## Example
//!
//! ```ignore
//! use cordon_core::Policy;
//!
//! let policy = Policy::new(["python3", "main.py"])
//!     .cpu_seconds(10)
//!     .memory_mib(256)
//!     .file_mib(30)
//!     .disable_network(true);
//! ```
//!
//! A limit of 0 means "no limit" throughout. Megabyte-denominated options
//! are converted to bytes when the policy is built, so the enforcer only
//! ever sees bytes.
//!
//! The policy is a plain immutable value. Validation and jail
//! canonicalisation happen once, before fork, via [`Policy::sealed`]; the
//! child receives a read-only reference to the sealed value.

use std::path::{Path, PathBuf};

use rustix::fs::{access, Access};
use serde::Serialize;
use thiserror::Error;

/// One mebibyte, the unit of the `--mem` and `--fsize` options.
pub const MIB: u64 = 1024 * 1024;

/// Validation error for a policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("target command cannot be empty")]
    EmptyTarget,

    #[error("target argument {0} is empty")]
    EmptyArgument(usize),

    #[error("null byte in target argument")]
    NullByte,

    #[error("jail path cannot be empty")]
    EmptyJail,

    #[error("jail path {0}: does not exist or cannot be resolved")]
    JailMissing(PathBuf),

    #[error("jail path {0}: not a directory")]
    JailNotADirectory(PathBuf),

    #[error("jail path {0}: not searchable by the supervisor")]
    JailNotSearchable(PathBuf),
}

/// Immutable record of the restrictions requested for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Policy {
    /// CPU time limit in seconds (RLIMIT_CPU). 0 = no limit.
    pub cpu_seconds: u64,
    /// Address-space limit in bytes (RLIMIT_AS). 0 = no limit.
    pub memory_bytes: u64,
    /// Process-count limit for the child's user (RLIMIT_NPROC). 0 = no limit.
    pub max_processes: u64,
    /// Largest file the child may create, in bytes (RLIMIT_FSIZE). 0 = no limit.
    pub file_bytes: u64,
    /// Wall-clock watchdog in seconds. 0 = disabled.
    pub timeout_seconds: u64,
    /// Directory the child chroots into before exec.
    pub jail_path: Option<PathBuf>,
    /// Install the seccomp filter denying outbound socket syscalls.
    pub disable_network: bool,
    /// Target command; element 0 is resolved via PATH before fork.
    pub target_argv: Vec<String>,
}

impl Policy {
    pub fn new(target: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cpu_seconds: 0,
            memory_bytes: 0,
            max_processes: 0,
            file_bytes: 0,
            timeout_seconds: 0,
            jail_path: None,
            disable_network: false,
            target_argv: target.into_iter().map(Into::into).collect(),
        }
    }

    pub fn cpu_seconds(mut self, seconds: u64) -> Self {
        self.cpu_seconds = seconds;
        self
    }

    /// Memory limit in MiB (converted to bytes here, once).
    pub fn memory_mib(mut self, mib: u64) -> Self {
        self.memory_bytes = mib * MIB;
        self
    }

    pub fn memory_bytes(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    pub fn max_processes(mut self, count: u64) -> Self {
        self.max_processes = count;
        self
    }

    /// File-size limit in MiB (converted to bytes here, once).
    pub fn file_mib(mut self, mib: u64) -> Self {
        self.file_bytes = mib * MIB;
        self
    }

    pub fn file_bytes(mut self, bytes: u64) -> Self {
        self.file_bytes = bytes;
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn jail(mut self, path: impl Into<PathBuf>) -> Self {
        self.jail_path = Some(path.into());
        self
    }

    pub fn disable_network(mut self, disabled: bool) -> Self {
        self.disable_network = disabled;
        self
    }

    /// True if any kernel restriction is requested.
    pub fn has_restrictions(&self) -> bool {
        self.cpu_seconds > 0
            || self.memory_bytes > 0
            || self.max_processes > 0
            || self.file_bytes > 0
            || self.timeout_seconds > 0
            || self.jail_path.is_some()
            || self.disable_network
    }

    /// Validate the policy and canonicalise the jail path.
    ///
    /// This is the freeze point: the returned value is what crosses the
    /// fork boundary. Jail validation happens here, before any child
    /// exists, so a bad jail never spawns anything.
    pub fn sealed(mut self) -> Result<Self, PolicyError> {
        validate_target(&self.target_argv)?;
        if let Some(jail) = self.jail_path.take() {
            self.jail_path = Some(validate_jail(&jail)?);
        }
        Ok(self)
    }

    /// The option vector that reproduces this policy when re-parsed.
    ///
    /// Target arguments follow a literal `--` so a target beginning with
    /// `-` survives the round trip.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.cpu_seconds > 0 {
            args.push(format!("--cpu={}", self.cpu_seconds));
        }
        if self.memory_bytes > 0 {
            args.push(format!("--mem={}", self.memory_bytes / MIB));
        }
        if self.max_processes > 0 {
            args.push(format!("--procs={}", self.max_processes));
        }
        if self.file_bytes > 0 {
            args.push(format!("--fsize={}", self.file_bytes / MIB));
        }
        if self.timeout_seconds > 0 {
            args.push(format!("--timeout={}", self.timeout_seconds));
        }
        if let Some(jail) = &self.jail_path {
            args.push(format!("--jail={}", jail.display()));
        }
        if self.disable_network {
            args.push("--no-net".into());
        }
        args.push("--".into());
        args.extend(self.target_argv.iter().cloned());
        args
    }
}

/// Validate the target command vector.
pub fn validate_target(argv: &[String]) -> Result<(), PolicyError> {
    if argv.is_empty() {
        return Err(PolicyError::EmptyTarget);
    }
    for (i, arg) in argv.iter().enumerate() {
        if arg.is_empty() {
            return Err(PolicyError::EmptyArgument(i));
        }
        if arg.contains('\0') {
            return Err(PolicyError::NullByte);
        }
    }
    Ok(())
}

/// Canonicalise and stat-check a jail path.
///
/// The jail must exist, be a directory, and be searchable by the
/// supervising process. Returns the canonical real path.
pub fn validate_jail(path: &Path) -> Result<PathBuf, PolicyError> {
    if path.as_os_str().is_empty() {
        return Err(PolicyError::EmptyJail);
    }
    let canonical = path
        .canonicalize()
        .map_err(|_| PolicyError::JailMissing(path.to_path_buf()))?;
    let meta = canonical
        .metadata()
        .map_err(|_| PolicyError::JailMissing(canonical.clone()))?;
    if !meta.is_dir() {
        return Err(PolicyError::JailNotADirectory(canonical));
    }
    access(&canonical, Access::EXEC_OK)
        .map_err(|_| PolicyError::JailNotSearchable(canonical.clone()))?;
    Ok(canonical)
}
