//! CLI command handling.
//!
//! Provides subcommands for:
//! - Capturing Envoy snapshots for an allocation (`capture`)
//! - Checking which task and tool exec access would use (`probe`)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ColorChoice, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::admin::{HttpTransport, build_task_order, resolve_exec_strategy};
use crate::capture::{CaptureSchedule, CaptureTarget, Capturer, SnapshotConfig, run_schedule};
use crate::config::Config;
use crate::exec::NomadCliExecutor;

#[derive(Parser, Debug)]
#[command(name = "xdsnap")]
#[command(about = "Capture Envoy admin snapshots from Consul Connect sidecars on Nomad")]
#[command(
    long_about = "xdsnap collects Envoy config dumps, stats, task logs and optional packet captures into one archive per allocation.\nExamples:\n  xdsnap capture --alloc 1a2b3c4d --task web --sidecar connect-proxy-web\n  xdsnap probe --alloc 1a2b3c4d --task connect-proxy-web --task web"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture one or more snapshots of an allocation
    #[command(
        about = "Capture Envoy snapshots",
        long_about = "Captures admin endpoints, task logs and optionally tcpdump output.\nExample: xdsnap capture --alloc 1a2b3c4d --task web --sidecar connect-proxy-web --repeat 3"
    )]
    Capture(CaptureArgs),

    /// Resolve the exec strategy without capturing anything
    #[command(
        about = "Probe tasks for HTTP tools",
        long_about = "Probes tasks in order and prints the first (task, tool) pair that can reach the admin interface.\nExample: xdsnap probe --alloc 1a2b3c4d --task connect-proxy-web --task web"
    )]
    Probe(ProbeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct CaptureArgs {
    /// Allocation ID
    #[arg(long)]
    pub alloc: String,

    /// Allocation IP for direct admin access
    #[arg(long)]
    pub alloc_ip: Option<String>,

    /// Application task whose logs are captured
    #[arg(long)]
    pub task: String,

    /// Envoy sidecar task
    #[arg(long)]
    pub sidecar: String,

    /// Additional task to capture logs from (repeatable)
    #[arg(long = "extra-log")]
    pub extra_log: Vec<String>,

    /// Envoy endpoints to capture (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub endpoints: Vec<String>,

    /// Directory to save snapshots
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Sleep between captures in seconds (minimum 5)
    #[arg(long, default_value_t = 5)]
    pub sleep: u64,

    /// Total capture duration in seconds
    #[arg(long, default_value_t = 60)]
    pub duration: u64,

    /// Number of snapshots (takes precedence over duration)
    #[arg(long, default_value_t = 0)]
    pub repeat: u32,

    /// Raise Envoy to trace instead of debug
    #[arg(long)]
    pub enable_trace: bool,

    /// Run tcpdump in the sidecar task
    #[arg(long)]
    pub tcpdump: bool,
}

impl CaptureArgs {
    pub fn target(&self) -> CaptureTarget {
        let mut additional_log_tasks = vec![self.sidecar.clone()];
        additional_log_tasks.extend(self.extra_log.iter().cloned());
        CaptureTarget {
            alloc_id: self.alloc.clone(),
            alloc_ip: self.alloc_ip.clone().filter(|ip| !ip.is_empty()),
            primary_task: self.task.clone(),
            sidecar_task: self.sidecar.clone(),
            additional_log_tasks,
        }
    }

    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            endpoints: self
                .endpoints
                .iter()
                .map(|e| e.trim())
                .filter(|e| !e.is_empty())
                .map(|e| {
                    if e.starts_with('/') {
                        e.to_string()
                    } else {
                        format!("/{}", e)
                    }
                })
                .collect(),
            output_dir: self.output_dir.clone(),
            duration: Duration::from_secs(self.duration),
            trace_enabled: self.enable_trace,
            tcpdump_enabled: self.tcpdump,
            skip_log_level_reset: false,
        }
    }

    pub fn schedule(&self) -> CaptureSchedule {
        CaptureSchedule {
            interval: Duration::from_secs(self.sleep),
            repeat: self.repeat,
            duration: Duration::from_secs(self.duration),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Allocation ID
    #[arg(long)]
    pub alloc: String,

    /// Task to probe, in order (repeatable; put the sidecar first)
    #[arg(long = "task", required = true)]
    pub tasks: Vec<String>,
}

/// Run the `capture` subcommand until its schedule ends or `cancel` fires.
pub async fn run_capture_command(
    args: CaptureArgs,
    config: &Config,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let schedule = args.schedule();
    schedule.validate()?;

    let executor = Arc::new(NomadCliExecutor::new(
        config.nomad.bin.clone(),
        config.nomad.namespace.clone(),
    ));
    let direct = Arc::new(HttpTransport::new(config.admin.direct_timeout()));
    let mut capturer = Capturer::new(executor, direct, config.admin.to_settings())
        .with_log_grace(config.capture.log_grace())
        .with_cancel_grace(config.capture.cancel_grace());
    if let Some(root) = &config.capture.work_root {
        capturer = capturer.with_work_root(root);
    }

    let target = args.target();
    let cycles = run_schedule(
        &capturer,
        std::slice::from_ref(&target),
        &args.snapshot_config(),
        &schedule,
        &cancel,
    )
    .await?;

    let mut saved = 0usize;
    for cycle in &cycles {
        for report in &cycle.reports {
            println!(
                "Snapshot {} for {} saved as {} ({} artifacts, {} skipped)",
                cycle.cycle,
                target.short_id(),
                report.archive.display(),
                report.artifacts.len(),
                report.skipped.len()
            );
            for skipped in &report.skipped {
                println!("  skipped {}: {}", skipped.name, skipped.reason);
            }
            saved += 1;
        }
    }

    if saved == 0 {
        anyhow::bail!("no snapshot could be produced for {}", target.short_id());
    }
    Ok(())
}

/// Run the `probe` subcommand and print the chosen strategy.
pub async fn run_probe_command(args: ProbeArgs, config: &Config) -> anyhow::Result<()> {
    let executor = NomadCliExecutor::new(config.nomad.bin.clone(), config.nomad.namespace.clone());
    let order = build_task_order("", "", &args.tasks);
    let strategy = resolve_exec_strategy(
        &executor,
        &args.alloc,
        &order,
        config.admin.to_settings().exec_timeout,
    )
    .await?;
    println!("{}", strategy);
    Ok(())
}
