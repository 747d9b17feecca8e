//! cordon-monitor: time-series observation of a supervised child.
//!
//! The monitor is a cooperating sampler, independent of the supervisor's
//! policy decisions. It attaches to a PID, snapshots CPU / memory / IO at a
//! fixed interval from its own monotonic clock, and appends one JSON object
//! per line to a session log:
//!
//! ```text
//! {"event":"start","timestamp":"...","run_id":"...","pid":1234,...}
//! {"event":"sample","timestamp":"...","cpu_percent":12.5,...}
//! {"event":"stop","timestamp":"...","samples":42,"peak_cpu_percent":...}
//! ```
//!
//! Exactly one `start` precedes the samples and exactly one `stop` closes
//! the session; sample timestamps never decrease. The monitor only reads
//! `/proc` - it never signals the child, which is owned by the supervisor.
//!
//! Older session logs are rotated on attach: everything beyond the newest N
//! is gzip-compressed into `archive/` (see [`rotate`]).

pub mod config;
pub mod proc;
pub mod rotate;
pub mod session;

pub use config::MonitorConfig;
pub use proc::{ProcSampler, ProcSnapshot};
pub use rotate::{rotate_logs, RotationOutcome, KEEP_LAST_N};
pub use session::{MonitorError, MonitorSession, MonitorSummary};
