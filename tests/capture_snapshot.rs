//! Capture cycles against scripted executors and transports.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use xdsnap::admin::{AdminSettings, HttpTool};
use xdsnap::capture::{CaptureError, CapturePhase, CaptureTarget, Capturer, SnapshotConfig};
use xdsnap::exec::LogStream;
use xdsnap::testing::{StubExecutor, StubReply, StubTransport};

const ALLOC: &str = "abcdef12-3456-7890-abcd-ef1234567890";
const SIDECAR: &str = "connect-proxy-web";

fn target(alloc_ip: Option<&str>) -> CaptureTarget {
    CaptureTarget {
        alloc_id: ALLOC.to_string(),
        alloc_ip: alloc_ip.map(str::to_string),
        primary_task: "web".to_string(),
        sidecar_task: SIDECAR.to_string(),
        additional_log_tasks: vec![SIDECAR.to_string()],
    }
}

fn config(output_dir: &Path) -> SnapshotConfig {
    SnapshotConfig {
        endpoints: vec![],
        output_dir: output_dir.to_path_buf(),
        duration: Duration::ZERO,
        trace_enabled: false,
        tcpdump_enabled: false,
        skip_log_level_reset: false,
    }
}

fn capturer(exec: &Arc<StubExecutor>, direct: &Arc<StubTransport>) -> Capturer {
    let settings = AdminSettings {
        retry_delay: Duration::ZERO,
        exec_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    Capturer::new(exec.clone(), direct.clone(), settings)
        .with_log_grace(Duration::from_secs(2))
        .with_cancel_grace(Duration::from_millis(200))
}

fn archive_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (name, data)
        })
        .collect()
}

fn entry_names(path: &Path) -> Vec<String> {
    archive_entries(path).into_iter().map(|(name, _)| name).collect()
}

fn entry<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    &entries
        .iter()
        .find(|(n, _)| n == name)
        .unwrap_or_else(|| panic!("missing {name}"))
        .1
}

fn exec_calls_containing(exec: &StubExecutor, needle: &str) -> usize {
    exec.calls()
        .iter()
        .filter(|c| c.command.iter().any(|a| a.contains(needle)))
        .count()
}

#[tokio::test]
async fn test_missing_tcpdump_still_produces_archive() {
    let exec = Arc::new(StubExecutor::new().respond("web", "curl", StubReply::ok(r#"{"ok":true}"#)));
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let config = SnapshotConfig {
        tcpdump_enabled: true,
        ..config(out.path())
    };

    let report = capturer(&exec, &direct)
        .capture(&target(None), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.archive, out.path().join("abcdef12_snapshot.tar.gz"));
    assert_eq!(
        report.artifacts,
        vec![
            "certs.json",
            "clusters.json",
            "config_dump.json",
            "connect-proxy-web-logs.txt",
            "listeners.json",
            "manifest.json",
            "stats.json",
            "web-logs.txt",
        ]
    );
    assert_eq!(entry_names(&report.archive), report.artifacts);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].name, "capture.pcap");
    assert!(report.skipped[0].reason.contains("tcpdump not available"));
    assert_eq!(
        report.phases,
        vec![
            CapturePhase::Init,
            CapturePhase::LogStreamsStarted,
            CapturePhase::LogLevelRaised,
            CapturePhase::TcpdumpRun,
            CapturePhase::EndpointsFetched,
            CapturePhase::LogStreamsJoined,
            CapturePhase::Bundled,
            CapturePhase::LogLevelReset,
            CapturePhase::Done,
        ]
    );
}

#[tokio::test]
async fn test_no_ip_uses_primary_task_curl() {
    let exec = Arc::new(StubExecutor::new().respond("web", "curl", StubReply::ok(r#"{"ok":true}"#)));
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let config = SnapshotConfig {
        endpoints: vec!["/stats".to_string()],
        ..config(out.path())
    };

    let report = capturer(&exec, &direct)
        .capture(&target(None), &config, &CancellationToken::new())
        .await
        .unwrap();

    let strategy = report.strategy.unwrap();
    assert_eq!(strategy.task, "web");
    assert_eq!(strategy.tool, HttpTool::Curl);
    let entries = archive_entries(&report.archive);
    assert_eq!(entry(&entries, "stats.json"), br#"{"ok":true}"#);
    assert_eq!(direct.get_attempts(), 0);
    assert_eq!(direct.post_attempts(), 0);
}

#[tokio::test]
async fn test_direct_failure_three_attempts_then_exec() {
    let exec = Arc::new(
        StubExecutor::new()
            .respond(SIDECAR, "--version", StubReply::ok("curl 8.5.0"))
            .respond(SIDECAR, "curl", StubReply::ok("envoy stats")),
    );
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let config = SnapshotConfig {
        endpoints: vec!["/stats".to_string()],
        ..config(out.path())
    };

    let report = capturer(&exec, &direct)
        .capture(&target(Some("10.0.0.5")), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(direct.get_attempts(), 3);
    assert_eq!(exec_calls_containing(&exec, "/stats"), 1);
    // The raise went direct once; the reset came after the latch tripped.
    assert_eq!(direct.post_attempts(), 1);
    let entries = archive_entries(&report.archive);
    assert_eq!(entry(&entries, "stats.json"), b"envoy stats");
}

#[tokio::test]
async fn test_direct_success_never_execs() {
    let exec = Arc::new(StubExecutor::new());
    let direct = Arc::new(StubTransport::with_body(b"{\"direct\":true}"));
    let out = tempfile::tempdir().unwrap();

    let report = capturer(&exec, &direct)
        .capture(&target(Some("10.0.0.5")), &config(out.path()), &CancellationToken::new())
        .await
        .unwrap();

    assert!(exec.calls().is_empty());
    assert!(report.strategy.is_none());
    assert!(report.skipped.is_empty());
    assert_eq!(direct.get_attempts(), 5);
    assert_eq!(
        direct.posted_paths(),
        vec!["/logging?level=debug", "/logging?level=info"]
    );
}

#[tokio::test]
async fn test_trace_level_and_reset() {
    let exec = Arc::new(StubExecutor::new().respond(SIDECAR, "wget", StubReply::ok("data")));
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let config = SnapshotConfig {
        endpoints: vec!["/clusters".to_string()],
        trace_enabled: true,
        ..config(out.path())
    };

    capturer(&exec, &direct)
        .capture(&target(None), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(exec_calls_containing(&exec, "level=trace"), 1);
    assert_eq!(exec_calls_containing(&exec, "level=debug"), 0);
    assert_eq!(exec_calls_containing(&exec, "level=info"), 1);
}

#[tokio::test]
async fn test_reset_suppressed() {
    let exec = Arc::new(StubExecutor::new().respond(SIDECAR, "wget", StubReply::ok("data")));
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let config = SnapshotConfig {
        endpoints: vec!["/clusters".to_string()],
        skip_log_level_reset: true,
        ..config(out.path())
    };

    let report = capturer(&exec, &direct)
        .capture(&target(None), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(exec_calls_containing(&exec, "level=debug"), 1);
    assert_eq!(exec_calls_containing(&exec, "level=info"), 0);
    assert!(!report.phases.contains(&CapturePhase::LogLevelReset));
}

#[tokio::test]
async fn test_no_capable_task_keeps_logs_and_manifest() {
    let exec = Arc::new(
        StubExecutor::new()
            .with_logs("web", LogStream::Stdout, "GET / 200\n")
            .with_logs("web", LogStream::Stderr, "warning: slow upstream\n"),
    );
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();

    let report = capturer(&exec, &direct)
        .capture(&target(None), &config(out.path()), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.strategy.is_none());
    assert_eq!(report.skipped.len(), 5);
    assert!(
        report
            .skipped
            .iter()
            .all(|s| s.reason.contains("no HTTP tool found"))
    );

    let entries = archive_entries(&report.archive);
    assert_eq!(
        entries.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        vec!["connect-proxy-web-logs.txt", "manifest.json", "web-logs.txt"]
    );
    assert_eq!(
        entry(&entries, "web-logs.txt"),
        b"GET / 200\n\n--- STDERR ---\nwarning: slow upstream\n"
    );

    let manifest: serde_json::Value = serde_json::from_slice(entry(&entries, "manifest.json")).unwrap();
    assert_eq!(manifest["alloc_id"], ALLOC);
    assert_eq!(manifest["log_level"], "debug");
    assert_eq!(manifest["log_level_raised"], false);
    assert_eq!(manifest["exec_strategy"], serde_json::Value::Null);
    assert_eq!(manifest["skipped"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_raw_socket_fallback_decodes_chunked_body() {
    let raw = "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    let exec = Arc::new(
        StubExecutor::new()
            .respond(SIDECAR, "echo ok", StubReply::ok("ok\n"))
            .respond(SIDECAR, "/dev/tcp", StubReply::ok(raw)),
    );
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let config = SnapshotConfig {
        endpoints: vec!["/config_dump".to_string()],
        ..config(out.path())
    };

    let report = capturer(&exec, &direct)
        .capture(&target(None), &config, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.strategy.unwrap().tool, HttpTool::BashTcp);
    let entries = archive_entries(&report.archive);
    assert_eq!(entry(&entries, "config_dump.json"), b"hello world");
}

#[tokio::test]
async fn test_packet_capture_written() {
    let exec = Arc::new(
        StubExecutor::new()
            .respond(SIDECAR, "command -v tcpdump", StubReply::ok("/usr/sbin/tcpdump\n"))
            .respond(SIDECAR, "tcpdump -i any", StubReply::ok("1MOyoQ==\n"))
            .respond("web", "curl", StubReply::ok("{}")),
    );
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let config = SnapshotConfig {
        endpoints: vec!["/stats".to_string()],
        tcpdump_enabled: true,
        ..config(out.path())
    };

    let report = capturer(&exec, &direct)
        .capture(&target(None), &config, &CancellationToken::new())
        .await
        .unwrap();

    let entries = archive_entries(&report.archive);
    assert_eq!(entry(&entries, "capture.pcap"), [0xd4, 0xc3, 0xb2, 0xa1]);
    assert!(report.skipped.is_empty());
}

#[tokio::test]
async fn test_repeated_runs_yield_same_artifacts() {
    let out = tempfile::tempdir().unwrap();
    let mut runs = Vec::new();
    for run in 0..2 {
        let exec = Arc::new(StubExecutor::new().respond("web", "curl", StubReply::ok(r#"{"ok":true}"#)));
        let direct = Arc::new(StubTransport::failing());
        let dir = out.path().join(format!("run{run}"));
        let report = capturer(&exec, &direct)
            .capture(&target(None), &config(&dir), &CancellationToken::new())
            .await
            .unwrap();
        runs.push((report.artifacts.clone(), archive_entries(&report.archive)));
    }

    assert_eq!(runs[0].0, runs[1].0);
    assert_eq!(runs[0].1, runs[1].1);
}

#[tokio::test]
async fn test_cancelled_token_still_bundles() {
    let exec = Arc::new(
        StubExecutor::new()
            .with_endless_logs(SIDECAR, LogStream::Stdout, "[info] starting\n")
            .respond("web", "curl", StubReply::ok("{}")),
    );
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let config = SnapshotConfig {
        endpoints: vec!["/stats".to_string()],
        duration: Duration::from_secs(3600),
        ..config(out.path())
    };
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        capturer(&exec, &direct).capture(&target(None), &config, &cancel),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(report.archive.exists());
    assert!(report.artifacts.contains(&"stats.json".to_string()));
}

#[tokio::test]
async fn test_output_dir_is_a_file() {
    let exec = Arc::new(StubExecutor::new());
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let blocker = out.path().join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();

    let err = capturer(&exec, &direct)
        .capture(&target(None), &config(&blocker), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CaptureError::OutputDir { .. }));
}

#[tokio::test]
async fn test_work_dir_removed_after_capture() {
    let exec = Arc::new(
        StubExecutor::new()
            .with_logs("web", LogStream::Stdout, "GET / 200\n")
            .respond("web", "curl", StubReply::ok("{}")),
    );
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let work_root = tempfile::tempdir().unwrap();

    let report = capturer(&exec, &direct)
        .with_work_root(work_root.path())
        .capture(&target(None), &config(out.path()), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.archive.exists());
    assert_eq!(std::fs::read_dir(work_root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_archive_failure_cleans_up_and_resets() {
    let exec = Arc::new(StubExecutor::new().respond("web", "curl", StubReply::ok("{}")));
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let work_root = tempfile::tempdir().unwrap();
    // A directory where the archive should go makes the final write fail.
    std::fs::create_dir(out.path().join("abcdef12_snapshot.tar.gz")).unwrap();

    let err = capturer(&exec, &direct)
        .with_work_root(work_root.path())
        .capture(&target(None), &config(out.path()), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CaptureError::Archive { .. }));
    assert_eq!(std::fs::read_dir(work_root.path()).unwrap().count(), 0);
    assert_eq!(exec_calls_containing(&exec, "level=debug"), 1);
    assert_eq!(exec_calls_containing(&exec, "level=info"), 1);
}

#[tokio::test]
async fn test_cancelled_capture_resets_despite_suppression() {
    let exec = Arc::new(StubExecutor::new().respond("web", "curl", StubReply::ok("{}")));
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();
    let config = SnapshotConfig {
        endpoints: vec!["/stats".to_string()],
        skip_log_level_reset: true,
        ..config(out.path())
    };
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = capturer(&exec, &direct)
        .capture(&target(None), &config, &cancel)
        .await
        .unwrap();

    assert!(report.phases.contains(&CapturePhase::LogLevelReset));
    assert_eq!(exec_calls_containing(&exec, "level=info"), 1);
}

#[tokio::test]
async fn test_failed_log_process_listed_as_skipped() {
    let exec = Arc::new(
        StubExecutor::new()
            .with_broken_logs("web", LogStream::Stdout)
            .with_broken_logs("web", LogStream::Stderr)
            .respond("web", "curl", StubReply::ok("{}")),
    );
    let direct = Arc::new(StubTransport::failing());
    let out = tempfile::tempdir().unwrap();

    let report = capturer(&exec, &direct)
        .capture(&target(None), &config(out.path()), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.skipped.iter().any(|s| s.name == "web-logs.txt"));
    assert!(!report.artifacts.contains(&"web-logs.txt".to_string()));
    assert!(!entry_names(&report.archive).contains(&"web-logs.txt".to_string()));
}
