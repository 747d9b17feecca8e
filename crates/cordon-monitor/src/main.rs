//! cordon-monitor - attach a resource sampler to a PID, or rotate logs.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cordon_monitor::{rotate_logs, MonitorConfig, MonitorSession, KEEP_LAST_N};

#[derive(Parser)]
#[command(name = "cordon-monitor")]
#[command(version, about = "Resource sampler and log rotation for cordon sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample a process until it exits
    Watch {
        /// PID to observe
        #[arg(long)]
        pid: u32,

        /// Identifier tying this session to a supervisor result
        #[arg(long)]
        run_id: Option<String>,

        /// Seconds between samples (clamped to 0.2..=5.0)
        #[arg(long, default_value_t = 1.0)]
        interval: f64,

        /// Log directory (defaults to $CORDON_MONITOR_LOG_DIR)
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Archive older session logs as gzip
    Rotate {
        /// Directory containing .jsonl session logs
        log_dir: Option<PathBuf>,

        /// Number of recent logs to keep uncompressed
        #[arg(long, default_value_t = KEEP_LAST_N)]
        keep: usize,

        /// Preview without modifying files
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MonitorConfig::from_env();

    match cli.command {
        Commands::Watch {
            pid,
            run_id,
            interval,
            log_dir,
        } => {
            let log_dir = log_dir.unwrap_or(config.log_dir);
            let run_id = run_id.unwrap_or_else(|| format!("pid-{pid}"));

            let mut session = MonitorSession::attach(pid, run_id, interval, &log_dir)
                .with_context(|| format!("cannot attach to pid {pid}"))?;

            // The supervisor owns the child; we only watch until it is gone.
            let cancel = AtomicBool::new(false);
            session.watch(&cancel)?;
            let summary = session.detach(None)?;

            println!(
                "Recorded {} samples over {:.1}s (peak cpu {:.1}%, peak rss {} bytes) to {}",
                summary.samples,
                summary.duration_seconds,
                summary.peak_cpu_percent,
                summary.peak_memory_rss,
                summary.log_path.display()
            );
        }

        Commands::Rotate {
            log_dir,
            keep,
            dry_run,
        } => {
            let log_dir = log_dir.unwrap_or(config.log_dir);
            let outcome = rotate_logs(&log_dir, keep, dry_run, &[])?;
            println!(
                "Kept {} logs; archived {}; skipped {}",
                outcome.kept,
                outcome.archived,
                outcome.skipped.len()
            );
            for path in &outcome.skipped {
                println!(" - {}", path.display());
            }
        }
    }

    Ok(())
}
