//! One monitoring session: attach, sample, detach.
//!
//! A session owns its log file for its whole lifetime. Attaching rotates
//! older logs, opens `monitor_run_<UTC-stamp>_<pid>.jsonl` and appends the
//! `start` record; each tick appends one `sample`; detaching appends the
//! single `stop` record with the session summary. Records are flushed per
//! line so a reader tailing the file never sees a torn record.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::proc::{ProcSampler, SampleError};
use crate::rotate::{rotate_logs, KEEP_LAST_N};

/// Sampler interval bounds, in seconds.
pub const MIN_INTERVAL_SECONDS: f64 = 0.2;
pub const MAX_INTERVAL_SECONDS: f64 = 5.0;

/// Error in the monitoring subsystem.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("attach: {0}")]
    Attach(#[from] SampleError),
}

/// A record in the session log, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Start {
        timestamp: String,
        run_id: String,
        pid: u32,
        interval_seconds: f64,
    },
    Sample {
        timestamp: String,
        cpu_percent: f64,
        memory_rss: u64,
        memory_vms: Option<u64>,
        threads: u64,
        open_files: Option<u64>,
        read_bytes: Option<u64>,
        write_bytes: Option<u64>,
    },
    Stop {
        timestamp: String,
        run_id: String,
        samples: u64,
        duration_seconds: f64,
        peak_cpu_percent: f64,
        peak_memory_rss: u64,
        exit_code: Option<i32>,
    },
}

/// Summary computed when a session stops.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSummary {
    pub samples: u64,
    pub duration_seconds: f64,
    pub peak_cpu_percent: f64,
    pub peak_memory_rss: u64,
    pub log_path: PathBuf,
}

/// A live monitoring session for one supervised child.
pub struct MonitorSession {
    run_id: String,
    interval: Duration,
    sampler: ProcSampler,
    file: File,
    log_path: PathBuf,
    attached_at: Instant,
    samples: u64,
    peak_cpu_percent: f64,
    peak_memory_rss: u64,
    last_timestamp: String,
}

impl MonitorSession {
    /// Begin sampling `pid`. Rotates older logs, then emits the `start`
    /// record. The interval is clamped into
    /// [[`MIN_INTERVAL_SECONDS`], [`MAX_INTERVAL_SECONDS`]].
    pub fn attach(
        pid: u32,
        run_id: impl Into<String>,
        interval_seconds: f64,
        log_dir: &Path,
    ) -> Result<Self, MonitorError> {
        let run_id = run_id.into();
        // Non-finite input (user-supplied) collapses to the floor.
        let interval_seconds = if interval_seconds.is_finite() {
            interval_seconds.clamp(MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS)
        } else {
            MIN_INTERVAL_SECONDS
        };

        std::fs::create_dir_all(log_dir)?;
        let outcome = rotate_logs(log_dir, KEEP_LAST_N, false, &[])?;
        if outcome.archived > 0 || !outcome.skipped.is_empty() {
            debug!(
                archived = outcome.archived,
                skipped = outcome.skipped.len(),
                "rotated session logs on attach"
            );
        }

        let sampler = ProcSampler::new(pid)?;

        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let log_path = log_dir.join(format!("monitor_run_{stamp}_{pid}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let mut session = Self {
            run_id: run_id.clone(),
            interval: Duration::from_secs_f64(interval_seconds),
            sampler,
            file,
            log_path,
            attached_at: Instant::now(),
            samples: 0,
            peak_cpu_percent: 0.0,
            peak_memory_rss: 0,
            last_timestamp: String::new(),
        };

        let timestamp = session.next_timestamp();
        session.append(&MonitorEvent::Start {
            timestamp,
            run_id,
            pid,
            interval_seconds,
        })?;
        debug!(pid, log = %session.log_path.display(), "monitor session attached");
        Ok(session)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take one sample. Returns `Ok(false)` once the child is gone - that
    /// is the normal end of a session, not an error. A transient failure
    /// to read an individual field is an absent field in the record.
    pub fn sample_once(&mut self) -> Result<bool, MonitorError> {
        let snapshot = match self.sampler.sample() {
            Ok(snapshot) => snapshot,
            Err(SampleError::Gone(_)) => return Ok(false),
            Err(SampleError::Malformed(_)) => {
                // Racing exit can truncate stat; retry at the next tick.
                return Ok(self.sampler.is_running());
            }
        };

        self.peak_cpu_percent = self.peak_cpu_percent.max(snapshot.cpu_percent);
        self.peak_memory_rss = self.peak_memory_rss.max(snapshot.memory_rss_bytes);
        self.samples += 1;

        let timestamp = self.next_timestamp();
        self.append(&MonitorEvent::Sample {
            timestamp,
            cpu_percent: round2(snapshot.cpu_percent),
            memory_rss: snapshot.memory_rss_bytes,
            memory_vms: snapshot.memory_vms_bytes,
            threads: snapshot.threads,
            open_files: snapshot.open_files,
            read_bytes: snapshot.read_bytes,
            write_bytes: snapshot.write_bytes,
        })?;
        Ok(true)
    }

    /// Sample on the session's own clock until the child disappears or
    /// `cancel` is raised. The sleep is sliced so cancellation is prompt
    /// even at the widest interval.
    pub fn watch(&mut self, cancel: &AtomicBool) -> Result<(), MonitorError> {
        loop {
            let deadline = Instant::now() + self.interval;
            while Instant::now() < deadline {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(50).min(self.interval));
            }
            if cancel.load(Ordering::Relaxed) {
                return Ok(());
            }
            if !self.sample_once()? {
                return Ok(());
            }
        }
    }

    /// Stop sampling and close the session with its `stop` record.
    pub fn detach(mut self, exit_code: Option<i32>) -> Result<MonitorSummary, MonitorError> {
        let summary = MonitorSummary {
            samples: self.samples,
            duration_seconds: self.attached_at.elapsed().as_secs_f64(),
            peak_cpu_percent: round2(self.peak_cpu_percent),
            peak_memory_rss: self.peak_memory_rss,
            log_path: self.log_path.clone(),
        };
        let record = MonitorEvent::Stop {
            timestamp: self.next_timestamp(),
            run_id: self.run_id.clone(),
            samples: summary.samples,
            duration_seconds: summary.duration_seconds,
            peak_cpu_percent: summary.peak_cpu_percent,
            peak_memory_rss: summary.peak_memory_rss,
            exit_code,
        };
        self.append(&record)?;
        debug!(samples = summary.samples, "monitor session detached");
        Ok(summary)
    }

    /// Record timestamps are pinned non-decreasing even if the wall clock
    /// steps backwards mid-session.
    fn next_timestamp(&mut self) -> String {
        let now = iso_now();
        if now < self.last_timestamp {
            return self.last_timestamp.clone();
        }
        self.last_timestamp = now.clone();
        now
    }

    fn append(&mut self, event: &MonitorEvent) -> Result<(), MonitorError> {
        let line = serde_json::to_string(event)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn spawn_sleeper(seconds: &str) -> std::process::Child {
        Command::new("sleep").arg(seconds).spawn().unwrap()
    }

    fn read_events(path: &Path) -> Vec<MonitorEvent> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn interval_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = spawn_sleeper("5");

        let session = MonitorSession::attach(child.id(), "run-a", 0.01, dir.path()).unwrap();
        assert_eq!(session.interval(), Duration::from_secs_f64(0.2));
        session.detach(None).unwrap();

        let session = MonitorSession::attach(child.id(), "run-b", 60.0, dir.path()).unwrap();
        assert_eq!(session.interval(), Duration::from_secs_f64(5.0));
        session.detach(None).unwrap();

        child.kill().ok();
        child.wait().ok();
    }

    #[test]
    fn session_log_is_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = spawn_sleeper("5");

        let mut session =
            MonitorSession::attach(child.id(), "run-wf", 0.2, dir.path()).unwrap();
        for _ in 0..3 {
            assert!(session.sample_once().unwrap());
            std::thread::sleep(Duration::from_millis(30));
        }
        let log_path = session.log_path().to_path_buf();
        let summary = session.detach(Some(0)).unwrap();
        child.kill().ok();
        child.wait().ok();

        assert_eq!(summary.samples, 3);

        let events = read_events(&log_path);
        assert_eq!(events.len(), 5);
        assert!(matches!(events.first(), Some(MonitorEvent::Start { .. })));
        assert!(matches!(events.last(), Some(MonitorEvent::Stop { .. })));

        let mut last_ts = String::new();
        for event in &events[1..4] {
            let MonitorEvent::Sample { timestamp, .. } = event else {
                panic!("expected sample, got {event:?}");
            };
            assert!(*timestamp >= last_ts, "timestamps must not decrease");
            last_ts = timestamp.clone();
        }

        let MonitorEvent::Stop {
            samples, exit_code, ..
        } = events.last().unwrap()
        else {
            unreachable!()
        };
        assert_eq!(*samples, 3);
        assert_eq!(*exit_code, Some(0));
    }

    #[test]
    fn watch_ends_when_the_child_dies() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = spawn_sleeper("0.3");

        let mut session =
            MonitorSession::attach(child.id(), "run-watch", 0.2, dir.path()).unwrap();
        let cancel = AtomicBool::new(false);
        session.watch(&cancel).unwrap();
        let summary = session.detach(None).unwrap();
        child.wait().ok();

        // The child lived ~0.3s against a 0.2s interval; the session must
        // have ended on its own shortly after.
        assert!(summary.duration_seconds < 3.0);
    }

    #[test]
    fn watch_honours_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = spawn_sleeper("10");

        let mut session =
            MonitorSession::attach(child.id(), "run-cancel", 5.0, dir.path()).unwrap();
        let cancel = AtomicBool::new(true);
        let start = Instant::now();
        session.watch(&cancel).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        session.detach(Some(7)).unwrap();

        child.kill().ok();
        child.wait().ok();
    }

    #[test]
    fn log_name_follows_the_convention() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = spawn_sleeper("2");
        let pid = child.id();

        let session = MonitorSession::attach(pid, "run-name", 1.0, dir.path()).unwrap();
        let name = session
            .log_path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        session.detach(None).unwrap();
        child.kill().ok();
        child.wait().ok();

        assert!(name.starts_with("monitor_run_"), "{name}");
        assert!(name.ends_with(&format!("_{pid}.jsonl")), "{name}");
    }
}
