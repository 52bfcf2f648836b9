//! Socket-to-span pipeline
//!
//! Writes host events to a real receiver socket and checks the spans the
//! dispatcher exports once the stream ends.

#![cfg(unix)]

use std::sync::Arc;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use spanloom_core::{Dispatcher, HookReceiver, HookReceiverConfig, SystemClock, Tracker};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn events_over_socket_become_spans() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("hooks.sock");

    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    let tracker = Tracker::new(provider.tracer("pipeline"), Arc::new(SystemClock));

    let (tx, rx) = mpsc::channel(64);
    let receiver = HookReceiver::new(
        HookReceiverConfig {
            socket_path: socket_path.clone(),
            ..HookReceiverConfig::default()
        },
        tx,
    );
    receiver.start().await.unwrap();

    let shutdown = CancellationToken::new();
    let run = tokio::spawn(Dispatcher::new(tracker).run(rx, shutdown.clone()));

    let mut stream = UnixStream::connect(&socket_path).await.unwrap();
    let lines = [
        r#"{"type":"session.created","id":"u1","title":"ENG-9 ship it"}"#,
        r#"{"type":"tool.execute.before","unit_id":"u1","call_id":"c1","tool":"write","args":{"filePath":"a.txt"}}"#,
        "this line is not an event",
        r#"{"type":"tool.execute.after","call_id":"c1","tool":"write"}"#,
        r#"{"type":"session.idle","id":"u1"}"#,
    ];
    for line in lines {
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();
    }
    stream.shutdown().await.unwrap();
    drop(stream);

    // Wait for the idle event to land before stopping the loop.
    let mut spans = Vec::new();
    for _ in 0..100 {
        spans = exporter.get_finished_spans().unwrap();
        if !spans.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    let summary = run.await.unwrap();

    assert_eq!(summary.events, 4);
    assert!(summary.flushed.is_empty());
    assert_eq!(spans.len(), 1);
    let ticket = spans[0]
        .attributes
        .iter()
        .find(|kv| kv.key.as_str() == "ticket.id")
        .map(|kv| kv.value.as_str().into_owned());
    assert_eq!(ticket.as_deref(), Some("ENG-9"));
}
