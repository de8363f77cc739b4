// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests of the file tailer: tailing through the launcher,
//! resuming from a persisted registry and handing over across rotation.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use logtailer::bounded_channel::{BoundedReceiver, bounded};
use logtailer::tailers::file::{
    JsonFileRegistry, Launcher, LauncherConfig, LogSource, Message, Registry, StartAt,
    TailerConfig,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower::BoxError;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn append(path: &Path, data: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(data.as_bytes()).unwrap();
}

fn config() -> LauncherConfig {
    LauncherConfig {
        start_at: StartAt::Beginning,
        rotation_check_interval: Duration::from_millis(25),
        registry_flush_interval: Duration::from_millis(25),
        tailer: TailerConfig {
            close_timeout: Duration::from_millis(500),
            ..Default::default()
        },
        ..Default::default()
    }
}

struct Running {
    output: BoundedReceiver<Message>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), BoxError>>,
}

impl Running {
    fn start(path: &Path, registry: Arc<dyn Registry>, queue_size: usize) -> Self {
        let (tx, output) = bounded(queue_size);
        let source = LogSource::new("integration", path.display().to_string());
        let launcher = Launcher::new(path.display().to_string(), source, tx, registry, config());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(launcher.run(cancel.clone()));

        Self {
            output,
            cancel,
            handle,
        }
    }

    async fn recv(&mut self) -> Message {
        timeout(TEST_TIMEOUT, self.output.next())
            .await
            .expect("timed out waiting for a message")
            .expect("output channel closed")
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        timeout(TEST_TIMEOUT, self.handle)
            .await
            .expect("launcher did not shut down")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_from_persisted_registry() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("app.log");
    let offsets_path = dir.path().join("offsets.json");
    append(&log_path, "one\ntwo\n");

    let registry = Arc::new(JsonFileRegistry::open(&offsets_path).unwrap());
    let mut running = Running::start(&log_path, registry, 100);
    assert_eq!(running.recv().await.content(), b"one");
    assert_eq!(running.recv().await.content(), b"two");
    running.shutdown().await;

    // Lines written while nothing was running are picked up on restart.
    append(&log_path, "three\n");

    let registry = Arc::new(JsonFileRegistry::open(&offsets_path).unwrap());
    let identifier = format!("file:{}", log_path.display());
    assert_eq!(registry.get_offset(&identifier).as_deref(), Some("8"));

    let mut running = Running::start(&log_path, registry, 100);
    let msg = running.recv().await;
    assert_eq!(msg.content(), b"three");
    assert_eq!(msg.offset(), 14);
    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rotation_hand_over() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("app.log");
    let rotated_path = dir.path().join("app.log.1");
    append(&log_path, "before rotation\n");

    let registry = Arc::new(JsonFileRegistry::open_memory());
    let mut running = Running::start(&log_path, registry.clone(), 100);
    assert_eq!(running.recv().await.content(), b"before rotation");

    std::fs::rename(&log_path, &rotated_path).unwrap();
    append(&log_path, "after rotation\n");

    let fresh = running.recv().await;
    assert_eq!(fresh.content(), b"after rotation");
    assert_eq!(
        fresh.origin().identifier,
        format!("file:{}", log_path.display())
    );
    assert_eq!(fresh.offset(), 15);

    // The old tailer keeps draining the rotated file for its close timeout.
    append(&rotated_path, "late line\n");
    let late = running.recv().await;
    assert_eq!(late.content(), b"late line");
    assert!(late.origin().identifier.is_empty());
    assert_eq!(late.offset(), 0);

    running.shutdown().await;
    let identifier = format!("file:{}", log_path.display());
    assert_eq!(registry.get_offset(&identifier).as_deref(), Some("15"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_with_stalled_output_is_bounded() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("app.log");
    for i in 0..50 {
        append(&log_path, &format!("line {}\n", i));
    }

    let registry = Arc::new(JsonFileRegistry::open_memory());
    let mut running = Running::start(&log_path, registry, 4);
    running.recv().await;

    // Nobody reads the rest; shutdown must still finish.
    running.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_messages_stream_in_file_order() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("app.log");
    let lines: Vec<String> = (0..200).map(|i| format!("message {}", i)).collect();
    for line in &lines {
        append(&log_path, &format!("{}\n", line));
    }

    let registry = Arc::new(JsonFileRegistry::open_memory());
    let running = Running::start(&log_path, registry, 10);

    let received: Vec<Message> = timeout(
        TEST_TIMEOUT,
        running.output.stream().take(lines.len()).collect(),
    )
    .await
    .expect("timed out collecting messages");

    let mut expected_offset = 0;
    for (msg, line) in received.iter().zip(&lines) {
        expected_offset += line.len() as i64 + 1;
        assert_eq!(msg.content(), line.as_bytes());
        assert_eq!(msg.offset(), expected_offset);
    }

    running.shutdown().await;
}
