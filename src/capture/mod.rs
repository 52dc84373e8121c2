//! One capture cycle for one allocation.
//!
//! ```text
//! INIT ─▶ LOG_STREAMS_STARTED ─▶ LOG_LEVEL_RAISED ─▶ [TCPDUMP_RUN]
//!      ─▶ ENDPOINTS_FETCHED ─▶ LOG_STREAMS_JOINED ─▶ BUNDLED
//!      ─▶ [LOG_LEVEL_RESET] ─▶ DONE
//! ```
//!
//! Everything except the working directory and the final archive is best
//! effort: a failed endpoint, log stream or packet capture is logged,
//! recorded in `manifest.json` and skipped.

pub mod archive;
pub mod error;
pub mod logs;
pub mod packets;
pub mod schedule;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::admin::{
    AdminSession, AdminSettings, DirectTransport, ExecStrategy, LogLevel, build_task_order,
    short_alloc_id,
};
use crate::exec::TaskExecutor;

pub use error::{CaptureError, PacketCaptureError, ScheduleError};
pub use schedule::{CaptureSchedule, CycleOutcome, run_schedule};

/// Admin endpoints captured when none are configured.
pub const DEFAULT_ENDPOINTS: [&str; 5] =
    ["/stats", "/config_dump", "/listeners", "/clusters", "/certs"];

/// Name of the manifest written into every archive.
pub const MANIFEST_ARTIFACT: &str = "manifest.json";

/// The allocation and tasks to capture.
#[derive(Debug, Clone)]
pub struct CaptureTarget {
    /// Full allocation id.
    pub alloc_id: String,
    /// Routable allocation IP, if known.
    pub alloc_ip: Option<String>,
    /// Application task whose logs are always captured.
    pub primary_task: String,
    /// Proxy task that owns the admin interface.
    pub sidecar_task: String,
    /// Further tasks whose logs should be captured.
    pub additional_log_tasks: Vec<String>,
}

impl CaptureTarget {
    pub fn short_id(&self) -> &str {
        short_alloc_id(&self.alloc_id)
    }

    /// Probe order for exec access: sidecar, primary, then extras.
    pub fn exec_task_order(&self) -> Vec<String> {
        build_task_order(
            &self.sidecar_task,
            &self.primary_task,
            &self.additional_log_tasks,
        )
    }

    /// Tasks to stream logs from: primary first, then extras, with blanks
    /// and duplicates dropped.
    pub fn log_tasks(&self) -> Vec<String> {
        let mut tasks: Vec<String> = Vec::new();
        let candidates = std::iter::once(self.primary_task.as_str())
            .chain(self.additional_log_tasks.iter().map(String::as_str));
        for task in candidates {
            if !task.is_empty() && !tasks.iter().any(|t| t == task) {
                tasks.push(task.to_string());
            }
        }
        tasks
    }
}

/// Per-invocation capture options.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Admin endpoints to fetch. Empty means [`DEFAULT_ENDPOINTS`].
    pub endpoints: Vec<String>,
    /// Directory the archive is written to.
    pub output_dir: PathBuf,
    /// Capture duration; bounds log streaming and packet capture.
    pub duration: Duration,
    /// Raise the proxy to `trace` instead of `debug`.
    pub trace_enabled: bool,
    /// Run tcpdump in the sidecar task.
    pub tcpdump_enabled: bool,
    /// Leave the raised log level in place after the capture.
    pub skip_log_level_reset: bool,
}

impl SnapshotConfig {
    /// The configured endpoints, or the defaults.
    pub fn endpoints(&self) -> Vec<String> {
        if self.endpoints.is_empty() {
            DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect()
        } else {
            self.endpoints.clone()
        }
    }

    fn raised_level(&self) -> LogLevel {
        if self.trace_enabled {
            LogLevel::Trace
        } else {
            LogLevel::Debug
        }
    }
}

/// Steps of a capture cycle, in the order they complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapturePhase {
    Init,
    LogStreamsStarted,
    LogLevelRaised,
    TcpdumpRun,
    EndpointsFetched,
    LogStreamsJoined,
    Bundled,
    LogLevelReset,
    Done,
}

/// An artifact that could not be captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedArtifact {
    /// Artifact file name.
    pub name: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of one capture cycle.
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// Path of the written archive.
    pub archive: PathBuf,
    /// Artifact names in the archive, sorted.
    pub artifacts: Vec<String>,
    /// Artifacts that were skipped.
    pub skipped: Vec<SkippedArtifact>,
    /// Exec strategy used, if exec access was needed.
    pub strategy: Option<ExecStrategy>,
    /// Completed phases.
    pub phases: Vec<CapturePhase>,
}

#[derive(Serialize)]
struct SnapshotManifest<'a> {
    alloc_id: &'a str,
    alloc_ip: Option<&'a str>,
    primary_task: &'a str,
    sidecar_task: &'a str,
    log_tasks: &'a [String],
    log_level: LogLevel,
    log_level_raised: bool,
    exec_strategy: Option<String>,
    endpoints: &'a [String],
    artifacts: &'a [String],
    skipped: &'a [SkippedArtifact],
}

/// File name for an endpoint dump: `/config_dump` becomes `config_dump.json`,
/// `/stats/prometheus?x=1` becomes `stats_prometheus.json`.
pub fn endpoint_artifact_name(endpoint: &str) -> String {
    let path = endpoint.split('?').next().unwrap_or_default();
    let name = path.trim_matches('/').replace('/', "_");
    if name.is_empty() {
        "root.json".to_string()
    } else {
        format!("{}.json", name)
    }
}

/// Runs capture cycles against one scheduler client.
pub struct Capturer {
    executor: Arc<dyn TaskExecutor>,
    direct: Arc<dyn DirectTransport>,
    settings: AdminSettings,
    work_root: Option<PathBuf>,
    log_grace: Duration,
    cancel_grace: Duration,
}

impl Capturer {
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        direct: Arc<dyn DirectTransport>,
        settings: AdminSettings,
    ) -> Self {
        Self {
            executor,
            direct,
            settings,
            work_root: None,
            log_grace: Duration::from_secs(10),
            cancel_grace: Duration::from_secs(1),
        }
    }

    /// Extra time log streams get past the capture duration.
    pub fn with_log_grace(mut self, grace: Duration) -> Self {
        self.log_grace = grace;
        self
    }

    /// Time log streams get to stop once cancelled.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Parent directory for per-capture working directories. Defaults to the
    /// system temp dir.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Put `target`'s proxy back at `info`. Used when a capture loop stops
    /// before the cycle that would have reset it.
    pub async fn reset_log_level(&self, target: &CaptureTarget) -> bool {
        let mut session = self.session(target);
        tracing::info!(
            "Resetting Envoy log level back to 'info' on alloc: {}",
            target.short_id()
        );
        session.set_log_level(LogLevel::Info).await
    }

    fn session<'a>(&'a self, target: &'a CaptureTarget) -> AdminSession<'a> {
        AdminSession::new(
            self.executor.as_ref(),
            self.direct.as_ref(),
            &self.settings,
            &target.alloc_id,
            target.alloc_ip.as_deref(),
            target.exec_task_order(),
        )
    }

    /// Capture one snapshot of `target` into `config.output_dir`.
    ///
    /// Cancelling `cancel` ends log streaming early; the cycle still fetches
    /// endpoints and writes the archive, and resets the log level even when
    /// `config.skip_log_level_reset` is set. Only [`CaptureError`] aborts.
    pub async fn capture(
        &self,
        target: &CaptureTarget,
        config: &SnapshotConfig,
        cancel: &CancellationToken,
    ) -> Result<CaptureReport, CaptureError> {
        let span = tracing::info_span!("capture", alloc = %target.short_id());
        self.run_cycle(target, config, cancel).instrument(span).await
    }

    async fn run_cycle(
        &self,
        target: &CaptureTarget,
        config: &SnapshotConfig,
        cancel: &CancellationToken,
    ) -> Result<CaptureReport, CaptureError> {
        let short_id = target.short_id();
        let mut phases = vec![CapturePhase::Init];
        let mut skipped = Vec::new();
        let mut artifacts = Vec::new();

        tracing::info!(
            "Capturing allocation: {} | task: {} | sidecar: {} | trace: {} | tcpdump: {}",
            short_id,
            target.primary_task,
            target.sidecar_task,
            config.trace_enabled,
            config.tcpdump_enabled
        );

        let prefix = format!("xdsnap-{}-", short_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let work_dir = match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| CaptureError::WorkDir {
            reason: e.to_string(),
        })?;
        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(|e| CaptureError::OutputDir {
                path: config.output_dir.clone(),
                reason: e.to_string(),
            })?;

        let log_tasks = target.log_tasks();
        let deadline = Instant::now() + config.duration + self.log_grace;
        let log_streams = logs::LogCollector::start(
            Arc::clone(&self.executor),
            &target.alloc_id,
            &log_tasks,
            work_dir.path(),
            deadline,
            cancel.child_token(),
        );
        phases.push(CapturePhase::LogStreamsStarted);

        let mut session = self.session(target);

        let level = config.raised_level();
        tracing::info!("Setting Envoy log level to '{}'", level);
        let log_level_raised = session.set_log_level(level).await;
        phases.push(CapturePhase::LogLevelRaised);

        if config.tcpdump_enabled {
            tracing::info!("Starting tcpdump capture...");
            match packets::capture_packets(
                self.executor.as_ref(),
                &target.alloc_id,
                &target.sidecar_task,
                config.duration,
                self.settings.exec_timeout,
            )
            .await
            {
                Ok(data) => {
                    match write_artifact(work_dir.path(), packets::PCAP_ARTIFACT, &data).await {
                        Ok(()) => artifacts.push(packets::PCAP_ARTIFACT.to_string()),
                        Err(reason) => skipped.push(skip(packets::PCAP_ARTIFACT, reason)),
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to capture tcpdump: {}", e);
                    skipped.push(skip(packets::PCAP_ARTIFACT, e.to_string()));
                }
            }
            phases.push(CapturePhase::TcpdumpRun);
        }

        let endpoints = config.endpoints();
        for endpoint in &endpoints {
            let name = endpoint_artifact_name(endpoint);
            match session.get(endpoint).await {
                Ok(data) => match write_artifact(work_dir.path(), &name, &data).await {
                    Ok(()) => {
                        tracing::info!("Captured {} for {}", endpoint, short_id);
                        artifacts.push(name);
                    }
                    Err(reason) => skipped.push(skip(&name, reason)),
                },
                Err(e) => {
                    tracing::warn!("Error capturing {}: {}", endpoint, e);
                    skipped.push(skip(&name, e.to_string()));
                }
            }
        }
        phases.push(CapturePhase::EndpointsFetched);

        for outcome in log_streams.join(self.cancel_grace).await {
            match outcome {
                logs::LogOutcome::Written { artifact, .. } => artifacts.push(artifact),
                logs::LogOutcome::Failed { task, reason } => {
                    skipped.push(skip(&logs::log_artifact_name(&task), reason))
                }
            }
        }
        phases.push(CapturePhase::LogStreamsJoined);

        artifacts.sort();
        skipped.sort_by(|a, b| a.name.cmp(&b.name));

        let strategy = session.strategy().cloned();
        let manifest = SnapshotManifest {
            alloc_id: &target.alloc_id,
            alloc_ip: target.alloc_ip.as_deref(),
            primary_task: &target.primary_task,
            sidecar_task: &target.sidecar_task,
            log_tasks: &log_tasks,
            log_level: level,
            log_level_raised,
            exec_strategy: strategy.as_ref().map(|s| s.to_string()),
            endpoints: &endpoints,
            artifacts: &artifacts,
            skipped: &skipped,
        };
        match serde_json::to_vec_pretty(&manifest) {
            Ok(json) => match write_artifact(work_dir.path(), MANIFEST_ARTIFACT, &json).await {
                Ok(()) => artifacts.push(MANIFEST_ARTIFACT.to_string()),
                Err(reason) => tracing::warn!("Failed to write manifest: {}", reason),
            },
            Err(e) => tracing::warn!("Failed to serialize manifest: {}", e),
        }
        artifacts.sort();

        let archive_path = config.output_dir.join(archive::archive_name(&target.alloc_id));
        let bundled = archive::bundle(work_dir.path(), &archive_path).await;
        if bundled.is_ok() {
            phases.push(CapturePhase::Bundled);
            tracing::info!(
                "Snapshot for {} saved as {}",
                short_id,
                archive_path.display()
            );
        }

        if !config.skip_log_level_reset || cancel.is_cancelled() {
            tracing::info!("Resetting Envoy log level back to 'info' on alloc: {}", short_id);
            session.set_log_level(LogLevel::Info).await;
            phases.push(CapturePhase::LogLevelReset);
        }
        bundled?;
        phases.push(CapturePhase::Done);

        Ok(CaptureReport {
            archive: archive_path,
            artifacts,
            skipped,
            strategy,
            phases,
        })
    }
}

fn skip(name: &str, reason: impl Into<String>) -> SkippedArtifact {
    SkippedArtifact {
        name: name.to_string(),
        reason: reason.into(),
    }
}

async fn write_artifact(dir: &Path, name: &str, data: &[u8]) -> Result<(), String> {
    tokio::fs::write(dir.join(name), data).await.map_err(|e| {
        tracing::warn!("Failed to write {}: {}", name, e);
        e.to_string()
    })
}
