//! cordon - run a command under kernel-enforced resource, filesystem and
//! network restrictions.
//!
//! The supervisor's own exit code mirrors the child: the target's exit code
//! on normal termination, 1 when the child died abnormally, 2 for
//! supervisor-side failures (bad arguments, jail validation, missing
//! target). Child setup failures surface as the child's 126/127.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use clap::Parser;
use tracing::warn;

use cordon_core::report::HumanReporter;
use cordon_core::{supervisor, Policy};
use cordon_monitor::{MonitorConfig, MonitorSession};

#[derive(Parser, Debug)]
#[command(name = "cordon")]
#[command(version, about = "Execute a command in a sandbox with resource limits")]
#[command(after_help = "\
Examples:
  cordon /bin/ls -l /
  cordon --cpu=5 /bin/sleep 10
  cordon --mem=256 --cpu=10 ./memory_test
  cordon --procs=5 --fsize=100 --no-net ./app

Resource limit signals:
  SIGXCPU - CPU time limit exceeded
  SIGXFSZ - file size limit exceeded
  SIGKILL - memory limit exceeded (kernel kill) or watchdog timeout")]
struct Cli {
    /// CPU time limit in seconds (default: unlimited)
    #[arg(long, value_name = "SECONDS")]
    cpu: Option<u64>,

    /// Memory limit in MiB (default: unlimited)
    #[arg(long, value_name = "MIB")]
    mem: Option<u64>,

    /// Process-count limit for the child's user (default: unlimited)
    #[arg(long, value_name = "COUNT")]
    procs: Option<u64>,

    /// File size limit in MiB (default: unlimited)
    #[arg(long, value_name = "MIB")]
    fsize: Option<u64>,

    /// Wall clock timeout in seconds (default: unlimited)
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Directory the child chroots into before exec (requires root)
    #[arg(long, value_name = "PATH")]
    jail: Option<PathBuf>,

    /// Deny outbound socket syscalls with EPERM
    #[arg(long = "no-net")]
    no_net: bool,

    /// Output a single JSON result object instead of human lines
    #[arg(long)]
    json: bool,

    /// Attach the resource sampler to the child
    #[arg(long)]
    monitor: bool,

    /// Sampler interval in seconds (clamped to 0.2..=5.0)
    #[arg(long, value_name = "SECONDS", default_value_t = 1.0)]
    monitor_interval: f64,

    /// Command and arguments to execute. Everything after the first
    /// non-option token is passed to the target verbatim; use `--` when the
    /// target itself begins with a dash.
    #[arg(trailing_var_arg = true, required = true, value_name = "COMMAND")]
    target: Vec<String>,
}

impl Cli {
    fn to_policy(&self) -> Policy {
        let mut policy = Policy::new(self.target.clone())
            .cpu_seconds(self.cpu.unwrap_or(0))
            .memory_mib(self.mem.unwrap_or(0))
            .max_processes(self.procs.unwrap_or(0))
            .file_mib(self.fsize.unwrap_or(0))
            .timeout_seconds(self.timeout.unwrap_or(0))
            .disable_network(self.no_net);
        if let Some(jail) = &self.jail {
            policy = policy.jail(jail);
        }
        policy
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let policy = cli.to_policy();
    let reporter = HumanReporter::new(!cli.json);

    reporter.policy(&policy);
    reporter.starting(&policy);

    // Monitor plumbing: the observer hands the sampler thread the PID; the
    // parent releases it with the exit code once the wait returns.
    let monitor_config = MonitorConfig::from_env();
    let cancel = Arc::new(AtomicBool::new(false));
    let (exit_tx, exit_rx) = mpsc::channel::<Option<i32>>();
    let mut exit_rx = Some(exit_rx);
    let mut monitor_handle: Option<JoinHandle<()>> = None;

    let result = supervisor::run_with_observer(&policy, |pid| {
        reporter.child_pid(pid);
        if cli.monitor {
            if let Some(exit_rx) = exit_rx.take() {
                monitor_handle = Some(spawn_monitor(
                    pid,
                    cli.monitor_interval,
                    monitor_config.log_dir.clone(),
                    Arc::clone(&cancel),
                    exit_rx,
                ));
            }
        }
    });

    let code = match result {
        Ok(report) => {
            exit_tx.send(report.exit_code).ok();
            release_monitor(&cancel, monitor_handle.take());

            if cli.json {
                match report.to_json() {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("cordon: {e}");
                        return ExitCode::from(2);
                    }
                }
            } else {
                reporter.outcome(&report);
            }

            match report.exit_code {
                Some(code) => code.clamp(0, 255) as u8,
                None => 1,
            }
        }
        Err(e) => {
            exit_tx.send(None).ok();
            release_monitor(&cancel, monitor_handle.take());
            eprintln!("cordon: {e}");
            2
        }
    };

    ExitCode::from(code)
}

fn spawn_monitor(
    pid: i32,
    interval: f64,
    log_dir: PathBuf,
    cancel: Arc<AtomicBool>,
    exit_rx: mpsc::Receiver<Option<i32>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let run_id = format!("cordon-{pid}");
        match MonitorSession::attach(pid as u32, run_id, interval, &log_dir) {
            Ok(mut session) => {
                if let Err(e) = session.watch(&cancel) {
                    warn!(error = %e, "monitor sampling stopped early");
                }
                let exit_code = exit_rx.recv().ok().flatten();
                if let Err(e) = session.detach(exit_code) {
                    warn!(error = %e, "monitor detach failed");
                }
            }
            Err(e) => warn!(error = %e, "monitor attach failed"),
        }
    })
}

fn release_monitor(cancel: &AtomicBool, handle: Option<JoinHandle<()>>) {
    cancel.store(true, Ordering::Relaxed);
    if let Some(handle) = handle {
        handle.join().ok();
    }
}
