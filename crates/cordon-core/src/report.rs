//! The structured result of a supervised run and its two renderings.
//!
//! One [`RunReport`] value backs both output surfaces - the bracketed,
//! timestamped human lines and the single JSON object - so the two cannot
//! drift. The human side never parses the JSON and the JSON side never
//! scrapes the human lines; both are projections of the same record.

use std::io::{self, Write};

use chrono::Local;
use serde::Serialize;

use crate::enforce::Installed;
use crate::policy::{Policy, MIB};

/// Which policy limits the termination was attributed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimitFlags {
    pub cpu: bool,
    pub memory: bool,
    pub file_size: bool,
    pub timeout: bool,
}

impl LimitFlags {
    pub fn any(self) -> bool {
        self.cpu || self.memory || self.file_size || self.timeout
    }
}

/// The policy values that were in force, echoed into the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyEcho {
    pub cpu_seconds: u64,
    pub memory_mib: u64,
    pub max_processes: u64,
    pub file_size_mib: u64,
    pub timeout_seconds: u64,
    pub jail: Option<String>,
    pub network_disabled: bool,
}

impl PolicyEcho {
    pub fn from_policy(policy: &Policy) -> Self {
        Self {
            cpu_seconds: policy.cpu_seconds,
            memory_mib: policy.memory_bytes / MIB,
            max_processes: policy.max_processes,
            file_size_mib: policy.file_bytes / MIB,
            timeout_seconds: policy.timeout_seconds,
            jail: policy.jail_path.as_ref().map(|p| p.display().to_string()),
            network_disabled: policy.disable_network,
        }
    }
}

/// Structured outcome of one supervised execution.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pid: i32,
    pub elapsed_seconds: f64,
    /// Present iff the child exited normally.
    pub exit_code: Option<i32>,
    /// Present iff the child was terminated by a signal.
    pub signal_number: Option<i32>,
    pub signal_name: Option<&'static str>,
    pub core_dumped: bool,
    pub limit_exceeded: LimitFlags,
    /// Restrictions actually installed, which may be a proper subset of
    /// what `limits` requested.
    pub installed: Installed,
    pub limits: PolicyEcho,
    pub success: bool,
}

impl RunReport {
    /// Exactly one of `exit_code` / `signal_number` is set by construction
    /// in the supervisor; `success` is derived here.
    pub fn new(
        pid: i32,
        elapsed_seconds: f64,
        exit_code: Option<i32>,
        signal_number: Option<i32>,
        core_dumped: bool,
        limit_exceeded: LimitFlags,
        installed: Installed,
        limits: PolicyEcho,
    ) -> Self {
        let success = exit_code == Some(0) && signal_number.is_none() && !limit_exceeded.any();
        Self {
            pid,
            elapsed_seconds,
            exit_code,
            signal_number,
            signal_name: signal_number.map(signal_name),
            core_dumped,
            limit_exceeded,
            installed,
            limits,
            success,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Name a signal number. Covers the signals a supervised child can
/// plausibly die to; anything else reports as UNKNOWN.
pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        libc::SIGXCPU => "SIGXCPU",
        libc::SIGXFSZ => "SIGXFSZ",
        libc::SIGSYS => "SIGSYS",
        _ => "UNKNOWN",
    }
}

/// Prefix a message the way every human-mode line is prefixed.
fn prefixed(msg: &str) -> String {
    format!("[cordon {}] {}", Local::now().format("%H:%M:%S"), msg)
}

/// Human-mode line emitter.
///
/// Disabled entirely in JSON mode so the machine surface stays a single
/// object on stdout.
pub struct HumanReporter {
    enabled: bool,
}

impl HumanReporter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn line(&self, msg: &str) {
        if self.enabled {
            println!("{}", prefixed(msg));
            io::stdout().flush().ok();
        }
    }

    /// The policy summary block, for the benefit of audit collaborators.
    pub fn policy(&self, policy: &Policy) {
        if !self.enabled {
            return;
        }
        if !policy.has_restrictions() {
            self.line("No restrictions applied (unlimited)");
            return;
        }
        self.line("Active restrictions:");
        if policy.cpu_seconds > 0 {
            self.line(&format!("  CPU time: {} seconds", policy.cpu_seconds));
        }
        if policy.memory_bytes > 0 {
            self.line(&format!("  Memory: {} MiB", policy.memory_bytes / MIB));
        }
        if policy.max_processes > 0 {
            self.line(&format!("  Processes: {}", policy.max_processes));
        }
        if policy.file_bytes > 0 {
            self.line(&format!("  File size: {} MiB", policy.file_bytes / MIB));
        }
        if policy.timeout_seconds > 0 {
            self.line(&format!("  Timeout: {} seconds", policy.timeout_seconds));
        }
        if let Some(jail) = &policy.jail_path {
            self.line(&format!("  Jail: {}", jail.display()));
        }
        if policy.disable_network {
            self.line("  Network: disabled");
        }
    }

    pub fn starting(&self, policy: &Policy) {
        self.line(&format!(
            "Starting command: {}",
            policy.target_argv.join(" ")
        ));
    }

    pub fn child_pid(&self, pid: i32) {
        self.line(&format!("Child PID: {pid}"));
    }

    /// The terminal block describing how the run ended.
    pub fn outcome(&self, report: &RunReport) {
        if !self.enabled {
            return;
        }
        if let Some(code) = report.exit_code {
            self.line(&format!("Process exited normally with status {code}"));
        } else if let Some(signal) = report.signal_number {
            self.line(&format!(
                "Process terminated by signal {signal} ({})",
                report.signal_name.unwrap_or("UNKNOWN")
            ));
            if report.limit_exceeded.cpu {
                self.line("RESTRICTION VIOLATED: CPU time limit exceeded");
            }
            if report.limit_exceeded.file_size {
                self.line("RESTRICTION VIOLATED: file size limit exceeded");
            }
            if report.limit_exceeded.timeout {
                self.line(&format!(
                    "Process killed by the {}-second timeout",
                    report.limits.timeout_seconds
                ));
            }
            if report.limit_exceeded.memory {
                self.line(&format!(
                    "Process was killed (possibly by the {} MiB memory limit)",
                    report.limits.memory_mib
                ));
            }
            if report.core_dumped {
                self.line("Core dump was created");
            }
        }
        if report.limits.network_disabled && !report.installed.network_filter {
            self.line("Note: network filter was requested but not installed");
        }
        if report.limits.jail.is_some() && !report.installed.jail {
            self.line("Note: jail was requested but not entered (insufficient privilege)");
        }
        self.line(&format!(
            "Execution time: {:.3} seconds",
            report.elapsed_seconds
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;

    fn echo_policy() -> PolicyEcho {
        PolicyEcho::from_policy(&Policy::new(["true"]))
    }

    #[test]
    fn success_requires_zero_exit_and_no_flags() {
        let ok = RunReport::new(
            1,
            0.1,
            Some(0),
            None,
            false,
            LimitFlags::default(),
            Installed::default(),
            echo_policy(),
        );
        assert!(ok.success);

        let nonzero = RunReport::new(
            1,
            0.1,
            Some(3),
            None,
            false,
            LimitFlags::default(),
            Installed::default(),
            echo_policy(),
        );
        assert!(!nonzero.success);

        let flagged = RunReport::new(
            1,
            0.1,
            Some(0),
            None,
            false,
            LimitFlags {
                timeout: true,
                ..LimitFlags::default()
            },
            Installed::default(),
            echo_policy(),
        );
        assert!(!flagged.success);
    }

    #[test]
    fn signalled_report_has_no_exit_code() {
        let report = RunReport::new(
            42,
            1.5,
            None,
            Some(libc::SIGXCPU),
            false,
            LimitFlags {
                cpu: true,
                ..LimitFlags::default()
            },
            Installed::default(),
            echo_policy(),
        );
        assert_eq!(report.exit_code, None);
        assert_eq!(report.signal_name, Some("SIGXCPU"));
        assert!(!report.success);
    }

    #[test]
    fn json_carries_the_contract_fields() {
        let policy = Policy::new(["sh", "-c", "exit 0"])
            .cpu_seconds(3)
            .memory_mib(50)
            .disable_network(true);
        let report = RunReport::new(
            7,
            0.25,
            Some(0),
            None,
            false,
            LimitFlags::default(),
            Installed {
                cpu_limit: true,
                memory_limit: true,
                network_filter: false,
                ..Installed::default()
            },
            PolicyEcho::from_policy(&policy),
        );

        let json: serde_json::Value =
            serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["pid"], 7);
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["signal_number"], serde_json::Value::Null);
        assert_eq!(json["limits"]["memory_mib"], 50);
        assert_eq!(json["limits"]["network_disabled"], true);
        assert_eq!(json["limit_exceeded"]["cpu"], false);
        assert_eq!(json["installed"]["network_filter"], false);
        assert_eq!(json["success"], true);
    }

    #[test]
    fn signal_names() {
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
        assert_eq!(signal_name(libc::SIGXCPU), "SIGXCPU");
        assert_eq!(signal_name(libc::SIGXFSZ), "SIGXFSZ");
        assert_eq!(signal_name(250), "UNKNOWN");
    }

    #[test]
    fn prefixed_lines_are_bracketed() {
        let line = prefixed("Starting command: true");
        assert!(line.starts_with("[cordon "));
        assert!(line.ends_with("] Starting command: true"));
    }
}
