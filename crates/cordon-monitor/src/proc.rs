//! Per-PID `/proc` sampling.
//!
//! CPU usage is derived from utime+stime tick deltas between consecutive
//! samples over the wall time between them, normalised by the CPU count, so
//! the first sample after attach always reads 0%. RSS comes from the stat
//! page count times the page size. Open-fd counts and IO byte counters are
//! best effort: a permission error or a racing exit yields absent fields,
//! never a failed sample.

use std::time::Instant;

use thiserror::Error;

/// Failure to observe the process at all. Individual missing fields are not
/// errors; the whole process being gone is.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("process {0} is not running or /proc is unavailable")]
    Gone(u32),

    #[error("unexpected /proc/{0}/stat format")]
    Malformed(u32),
}

/// One point-in-time snapshot of the observed process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcSnapshot {
    pub cpu_percent: f64,
    pub memory_rss_bytes: u64,
    pub memory_vms_bytes: Option<u64>,
    pub threads: u64,
    pub open_files: Option<u64>,
    pub read_bytes: Option<u64>,
    pub write_bytes: Option<u64>,
}

/// Stateful sampler for one PID.
///
/// The kernel recycles PIDs the moment the supervisor reaps the child, so
/// holding a bare PID is not enough to keep observing the same process.
/// The sampler therefore remembers the process start time from the first
/// stat read and treats any later start-time mismatch as the original
/// process being gone, rather than attributing a stranger's numbers to it.
pub struct ProcSampler {
    pid: u32,
    start_ticks: u64,
    cpu_count: u64,
    clock_ticks: u64,
    page_size: u64,
    last_total_ticks: Option<u64>,
    last_instant: Option<Instant>,
}

struct StatFields {
    total_ticks: u64,
    threads: u64,
    start_ticks: u64,
    vsize: u64,
    rss_pages: u64,
}

impl ProcSampler {
    /// Attach to a PID. Fails if the process is not observable.
    pub fn new(pid: u32) -> Result<Self, SampleError> {
        // SAFETY: sysconf with valid constants.
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) }.max(1) as u64;
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) }.max(1) as u64;
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get() as u64)
            .unwrap_or(1);

        // The first stat read pins the process identity and primes the CPU
        // counters so the first real sample has a delta base.
        let stat = read_stat(pid)?;
        Ok(Self {
            pid,
            start_ticks: stat.start_ticks,
            cpu_count,
            clock_ticks,
            page_size,
            last_total_ticks: Some(stat.total_ticks),
            last_instant: Some(Instant::now()),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.checked_stat().is_ok()
    }

    /// Read stat and verify it still describes the process we attached to.
    /// A recycled PID carries a different start time.
    fn checked_stat(&self) -> Result<StatFields, SampleError> {
        let stat = read_stat(self.pid)?;
        if stat.start_ticks != self.start_ticks {
            return Err(SampleError::Gone(self.pid));
        }
        Ok(stat)
    }

    /// Snapshot the process. Fails only if it has disappeared entirely
    /// (including its PID having been reused by another process).
    pub fn sample(&mut self) -> Result<ProcSnapshot, SampleError> {
        let stat = self.checked_stat()?;
        let now = Instant::now();

        let cpu_percent = match (self.last_total_ticks, self.last_instant) {
            (Some(last_ticks), Some(last_instant)) => {
                let tick_delta = stat.total_ticks.saturating_sub(last_ticks);
                let wall = now.duration_since(last_instant).as_secs_f64().max(1e-6);
                let cpu_seconds = tick_delta as f64 / self.clock_ticks as f64;
                (cpu_seconds / wall) * 100.0 / self.cpu_count as f64
            }
            _ => 0.0,
        };
        self.last_total_ticks = Some(stat.total_ticks);
        self.last_instant = Some(now);

        let (read_bytes, write_bytes) = self.read_io();

        Ok(ProcSnapshot {
            cpu_percent: cpu_percent.max(0.0),
            memory_rss_bytes: stat.rss_pages * self.page_size,
            memory_vms_bytes: Some(stat.vsize),
            threads: stat.threads,
            open_files: self.count_open_fds(),
            read_bytes,
            write_bytes,
        })
    }

    fn count_open_fds(&self) -> Option<u64> {
        let entries = std::fs::read_dir(format!("/proc/{}/fd", self.pid)).ok()?;
        Some(entries.count() as u64)
    }

    /// Cumulative IO counters. `/proc/<pid>/io` needs ptrace-level access,
    /// so both fields are optional.
    fn read_io(&self) -> (Option<u64>, Option<u64>) {
        let Ok(content) = std::fs::read_to_string(format!("/proc/{}/io", self.pid)) else {
            return (None, None);
        };
        let mut read_bytes = None;
        let mut write_bytes = None;
        for line in content.lines() {
            if let Some((key, value)) = line.split_once(':') {
                match key.trim() {
                    "read_bytes" => read_bytes = value.trim().parse().ok(),
                    "write_bytes" => write_bytes = value.trim().parse().ok(),
                    _ => {}
                }
            }
        }
        (read_bytes, write_bytes)
    }
}

/// Parse `/proc/<pid>/stat`. The comm field may contain spaces and
/// parentheses, so fields are split after the last `)`.
fn read_stat(pid: u32) -> Result<StatFields, SampleError> {
    let content = std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .map_err(|_| SampleError::Gone(pid))?;
    let after_comm = content
        .rfind(')')
        .map(|i| i + 2)
        .filter(|&i| i < content.len())
        .ok_or(SampleError::Malformed(pid))?;
    let fields: Vec<&str> = content[after_comm..].split_whitespace().collect();

    // 0-based after comm: state=0, so stat field N lives at index N-3.
    let utime = parse_field(&fields, 11, pid)?;
    let stime = parse_field(&fields, 12, pid)?;
    let threads = parse_field(&fields, 17, pid)?;
    let start_ticks = parse_field(&fields, 19, pid)?;
    let vsize = parse_field(&fields, 20, pid)?;
    let rss_pages = parse_field(&fields, 21, pid)?;

    Ok(StatFields {
        total_ticks: utime + stime,
        threads,
        start_ticks,
        vsize,
        rss_pages,
    })
}

fn parse_field(fields: &[&str], index: usize, pid: u32) -> Result<u64, SampleError> {
    fields
        .get(index)
        .and_then(|f| f.parse().ok())
        .ok_or(SampleError::Malformed(pid))
}
