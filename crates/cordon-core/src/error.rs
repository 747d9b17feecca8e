//! Supervisor-side error taxonomy.
//!
//! Everything here fails *before* the target runs or *around* it; failures
//! inside the child between fork and exec surface as the child's own exit
//! status (126 for setup, 127 for exec), not as these errors.

use rustix::io::Errno;
use thiserror::Error;

use crate::policy::PolicyError;

/// Error during a supervised run.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("policy: {0}")]
    Policy(#[from] PolicyError),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("fork: {0}")]
    Fork(Errno),

    #[error("status pipe: {0}")]
    StatusPipe(Errno),

    #[error("wait: {0}")]
    Wait(Errno),

    #[error("child stopped unexpectedly by signal {0}")]
    ChildStopped(i32),

    #[error("unrecognised wait status {0:#x}")]
    UnknownStatus(i32),
}
