//! cordon-core: the sandbox supervisor.
//!
//! This crate runs one untrusted command as a supervised child process with
//! kernel-enforced restrictions installed between fork and exec:
//!
//! - **Resource limits** - CPU time, address space, process count, file size
//!   via setrlimit (soft and hard)
//! - **Chroot jail** - an optional directory the child enters as its new root
//! - **Network filter** - a seccomp-BPF deny-list that fails outbound
//!   socket-family syscalls with `EPERM`
//!
//! The parent waits for the child, classifies its termination (normal exit,
//! resource-limit signal, watchdog kill), and produces a [`RunReport`] that
//! renders as either human-readable prefixed lines or a single JSON object.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cordon_core::{supervisor, Policy};
//!
//! let policy = Policy::new(["echo", "hello"]).cpu_seconds(5).memory_mib(256);
//! let report = supervisor::run(&policy)?;
//! assert!(report.success);
//! ```
//!
//! A restriction that cannot be installed is never silently claimed: the
//! report carries a per-restriction `installed` record distinct from what
//! the policy requested.

pub mod enforce;
pub mod error;
pub mod policy;
pub mod report;
pub mod supervisor;

pub use enforce::Installed;
pub use error::SupervisorError;
pub use policy::{Policy, PolicyError};
pub use report::{LimitFlags, PolicyEcho, RunReport};
