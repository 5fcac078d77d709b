//! Streaming parser tests against files on disk

mod common;

use common::{drugbank_json, write_file, ProgressEvent, RecordingProgress};
use futures::StreamExt;
use medsync_ingest::error::{ErrorKind, IngestError};
use medsync_ingest::parser::StreamingParser;
use tempfile::TempDir;

fn parser() -> StreamingParser {
    StreamingParser::new("drugbank.drug.*".parse().unwrap())
}

#[tokio::test]
async fn test_collect_reports_progress_every_interval() {
    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (0..120).map(|i| format!("Drug {}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let path = write_file(dir.path(), "drugs.json", &drugbank_json(&refs));

    let progress = RecordingProgress::default();
    let records = parser().collect(&path, &progress).await.unwrap();

    assert_eq!(records.len(), 120);
    assert_eq!(records[0].get("name").unwrap(), "Drug 0");
    assert_eq!(records[119].get("name").unwrap(), "Drug 119");
    assert_eq!(progress.updates(), vec![0, 50, 100]);

    let events = progress.events();
    assert_eq!(events.first(), Some(&ProgressEvent::Start));
    assert_eq!(events.last(), Some(&ProgressEvent::Clear));
}

#[tokio::test]
async fn test_custom_progress_interval() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        dir.path(),
        "drugs.json",
        &drugbank_json(&["a", "b", "c", "d", "e"]),
    );

    let progress = RecordingProgress::default();
    parser()
        .with_progress_interval(2)
        .collect(&path, &progress)
        .await
        .unwrap();

    assert_eq!(progress.updates(), vec![0, 2, 4]);
}

#[tokio::test]
async fn test_missing_file_is_stream_error() {
    let dir = TempDir::new().unwrap();
    let progress = RecordingProgress::default();

    let err = parser()
        .collect(dir.path().join("missing.json"), &progress)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::StreamIo { .. }));
    assert_eq!(err.kind(), ErrorKind::StreamParse);
    assert_eq!(progress.events().last(), Some(&ProgressEvent::Clear));
}

#[tokio::test]
async fn test_records_arrive_before_the_error() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        dir.path(),
        "broken.json",
        r#"{"drugbank": {"drug": [{"name": "First"}, {"name": "Second"}, {"name" "#,
    );

    let mut stream = parser().stream(&path);
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.get("name").unwrap(), "First");
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second.get("name").unwrap(), "Second");

    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, IngestError::MalformedDocument(_)));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_single_entry_document() {
    let dir = TempDir::new().unwrap();
    let path = write_file(
        dir.path(),
        "single.json",
        r#"{"drugbank": {"@version": "5.1", "drug": {"name": "Lepirudin"}}}"#,
    );

    let records = parser()
        .collect(&path, &RecordingProgress::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("name").unwrap(), "Lepirudin");
}

#[tokio::test]
async fn test_dropping_the_stream_stops_the_reader() {
    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (0..5000).map(|i| format!("Drug {}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let path = write_file(dir.path(), "drugs.json", &drugbank_json(&refs));

    let mut stream = parser().with_channel_capacity(4).stream(&path);
    assert!(stream.next().await.unwrap().is_ok());
    drop(stream);

    // The file can be re-read from the start with a fresh stream
    let again: Vec<_> = parser().stream(&path).collect().await;
    assert_eq!(again.len(), 5000);
}
