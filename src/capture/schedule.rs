//! Repeated capture cycles.
//!
//! Each cycle is an independent [`Capturer::capture`] call per target,
//! written into its own `snapshot_<timestamp>` directory. Nothing learned in
//! one cycle (in particular the exec strategy) is carried into the next.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capture::error::{CaptureError, ScheduleError};
use crate::capture::{CapturePhase, CaptureReport, CaptureTarget, Capturer, SnapshotConfig};

/// Shortest allowed pause between cycles.
pub const MIN_INTERVAL: Duration = Duration::from_secs(5);

/// How often and for how long to capture.
#[derive(Debug, Clone)]
pub struct CaptureSchedule {
    /// Pause between cycles.
    pub interval: Duration,
    /// Number of cycles. Zero means "until `duration` has elapsed".
    pub repeat: u32,
    /// Total time to keep capturing when `repeat` is zero.
    pub duration: Duration,
}

impl CaptureSchedule {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.interval < MIN_INTERVAL {
            return Err(ScheduleError::IntervalTooShort {
                interval: self.interval,
                minimum: MIN_INTERVAL,
            });
        }
        Ok(())
    }

    /// Whether the log level should be reset after cycle `completed + 1`.
    ///
    /// In repeat mode only the last cycle resets; otherwise every cycle does,
    /// since it is not known in advance which one will be last.
    pub fn resets_after(&self, completed: u32) -> bool {
        self.repeat == 0 || completed + 1 >= self.repeat
    }

    fn more_cycles(&self, completed: u32, started: Option<Instant>) -> bool {
        if self.repeat > 0 {
            return completed < self.repeat;
        }
        match started {
            None => true,
            Some(_) if self.duration.is_zero() => false,
            Some(start) => start.elapsed() < self.duration,
        }
    }
}

/// Everything captured in one cycle.
#[derive(Debug)]
pub struct CycleOutcome {
    /// 1-based cycle number.
    pub cycle: u32,
    /// Directory the cycle's archives were written to.
    pub dir: PathBuf,
    /// Successful captures.
    pub reports: Vec<CaptureReport>,
    /// Failed captures, by allocation id.
    pub failures: Vec<(String, CaptureError)>,
}

/// `snapshot_<YYYYmmdd_HHMMSS>` under `base`, suffixed `_N` if taken.
pub async fn create_snapshot_dir(
    base: &Path,
    now: DateTime<Local>,
) -> Result<PathBuf, ScheduleError> {
    let stem = format!("snapshot_{}", now.format("%Y%m%d_%H%M%S"));
    let to_error = |path: &Path, e: std::io::Error| ScheduleError::SnapshotDir {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    tokio::fs::create_dir_all(base)
        .await
        .map_err(|e| to_error(base, e))?;

    let mut suffix = 0u32;
    loop {
        let name = if suffix == 0 {
            stem.clone()
        } else {
            format!("{}_{}", stem, suffix)
        };
        let path = base.join(name);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(to_error(&path, e)),
        }
    }
}

/// Run capture cycles for `targets` until the schedule is exhausted or
/// `cancel` fires.
///
/// `base.output_dir` is the parent of the per-cycle directories. A failed
/// capture is logged and recorded; it does not stop the schedule. If the
/// schedule ends with a proxy still at a raised log level (cancellation
/// between repeat cycles, or a failed final cycle), it is reset once here.
pub async fn run_schedule(
    capturer: &Capturer,
    targets: &[CaptureTarget],
    base: &SnapshotConfig,
    schedule: &CaptureSchedule,
    cancel: &CancellationToken,
) -> Result<Vec<CycleOutcome>, ScheduleError> {
    schedule.validate()?;

    if schedule.repeat > 0 {
        tracing::info!(
            "Starting snapshot capture with sleep={:?} repeat={} trace={} tcpdump={} outputDir={}",
            schedule.interval,
            schedule.repeat,
            base.trace_enabled,
            base.tcpdump_enabled,
            base.output_dir.display()
        );
    } else {
        tracing::info!(
            "Starting snapshot capture with sleep={:?} duration={:?} trace={} tcpdump={} outputDir={}",
            schedule.interval,
            schedule.duration,
            base.trace_enabled,
            base.tcpdump_enabled,
            base.output_dir.display()
        );
    }

    let mut cycles = Vec::new();
    let mut started: Option<Instant> = None;
    let mut completed = 0u32;
    let mut raised: Vec<&CaptureTarget> = Vec::new();

    while schedule.more_cycles(completed, started) {
        if cancel.is_cancelled() {
            tracing::info!("Capture cancelled, stopping after {} cycle(s)", completed);
            break;
        }

        let dir = match create_snapshot_dir(&base.output_dir, Local::now()).await {
            Ok(dir) => dir,
            Err(e) => {
                reset_raised(capturer, &raised).await;
                return Err(e);
            }
        };
        started.get_or_insert_with(Instant::now);
        let config = SnapshotConfig {
            output_dir: dir.clone(),
            skip_log_level_reset: !schedule.resets_after(completed),
            ..base.clone()
        };

        let mut outcome = CycleOutcome {
            cycle: completed + 1,
            dir,
            reports: Vec::new(),
            failures: Vec::new(),
        };
        raised.clear();
        for target in targets {
            match capturer.capture(target, &config, cancel).await {
                Ok(report) => {
                    if !report.phases.contains(&CapturePhase::LogLevelReset) {
                        raised.push(target);
                    }
                    outcome.reports.push(report);
                }
                Err(e) => {
                    raised.push(target);
                    tracing::error!(
                        "Error capturing snapshot for allocation {}: {}",
                        target.short_id(),
                        e
                    );
                    outcome.failures.push((target.alloc_id.clone(), e));
                }
            }
        }
        cycles.push(outcome);
        completed += 1;

        if !schedule.more_cycles(completed, started) {
            break;
        }
        tracing::info!("Sleeping {:?} before next snapshot", schedule.interval);
        tokio::select! {
            _ = tokio::time::sleep(schedule.interval) => {}
            _ = cancel.cancelled() => {
                tracing::info!("Capture cancelled, stopping after {} cycle(s)", completed);
                break;
            }
        }
    }

    reset_raised(capturer, &raised).await;

    if schedule.repeat > 0 && completed >= schedule.repeat {
        tracing::info!("Repeat count reached, stopping capture");
    } else if !cancel.is_cancelled() {
        tracing::info!("Duration ended, stopping capture");
    }
    Ok(cycles)
}

async fn reset_raised(capturer: &Capturer, raised: &[&CaptureTarget]) {
    for target in raised {
        capturer.reset_log_level(target).await;
    }
}
