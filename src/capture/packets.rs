//! tcpdump inside the sidecar task, shipped back base64 encoded over exec.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::capture::error::PacketCaptureError;
use crate::exec::{TaskExecutor, execute_with_deadline};

/// Artifact name for the packet capture.
pub const PCAP_ARTIFACT: &str = "capture.pcap";

/// Shortest capture window, in seconds.
pub const MIN_CAPTURE_SECS: u64 = 5;

/// Capture window for a given capture duration.
pub fn capture_seconds(duration: Duration) -> u64 {
    duration.as_secs().max(MIN_CAPTURE_SECS)
}

fn shell(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

/// Command that checks tcpdump is installed.
pub fn availability_command() -> Vec<String> {
    shell("command -v tcpdump".to_string())
}

/// Command that captures on all interfaces for `secs` seconds and writes
/// the pcap stream base64 encoded to stdout.
pub fn tcpdump_command(secs: u64) -> Vec<String> {
    shell(format!(
        "timeout {} tcpdump -i any -s0 -w - 2>/dev/null | base64",
        secs
    ))
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("not found")
}

/// Decode base64 text back into pcap bytes, ignoring line breaks and any
/// other characters outside the base64 alphabet.
pub fn decode_capture(stdout: &[u8]) -> Result<Vec<u8>, PacketCaptureError> {
    let clean: Vec<u8> = stdout
        .iter()
        .copied()
        .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .collect();
    if clean.is_empty() {
        return Err(PacketCaptureError::Empty);
    }
    Ok(STANDARD.decode(clean)?)
}

/// Run a time-bounded packet capture in `task` and return the pcap bytes.
///
/// A missing tcpdump binary is reported as [`PacketCaptureError::Unavailable`]
/// so the operator can fix the image; it never aborts the capture.
pub async fn capture_packets(
    executor: &dyn TaskExecutor,
    alloc_id: &str,
    task: &str,
    duration: Duration,
    exec_timeout: Duration,
) -> Result<Vec<u8>, PacketCaptureError> {
    let check =
        execute_with_deadline(executor, alloc_id, task, &availability_command(), exec_timeout)
            .await?;
    if !check.success() || is_not_found(&check.stderr_text()) {
        return Err(PacketCaptureError::Unavailable {
            task: task.to_string(),
        });
    }

    let secs = capture_seconds(duration);
    tracing::info!("Running tcpdump for {} seconds in task {}", secs, task);
    let output = execute_with_deadline(
        executor,
        alloc_id,
        task,
        &tcpdump_command(secs),
        Duration::from_secs(secs) + exec_timeout,
    )
    .await?;

    if !output.success() {
        let stderr = output.stderr_text();
        if is_not_found(&stderr) {
            return Err(PacketCaptureError::Unavailable {
                task: task.to_string(),
            });
        }
        return Err(PacketCaptureError::Failed {
            code: output.exit_code,
            stderr,
        });
    }

    let data = decode_capture(&output.stdout)?;
    tracing::debug!("Decoded {} bytes of packet capture", data.len());
    Ok(data)
}
