//! Checkpoint persistence on disk

use streamaggr::{
    Checkpoint, PipelineBuilder, PipelineContext, ProcessorError, Record, StateError,
};
use tempfile::TempDir;

fn pipeline() -> PipelineContext {
    PipelineBuilder::from_json(
        r#"{"name": "disk", "operators": [
            {"name": "buf", "type": "timeSeriesWinBuf", "store": "s", "value": "v", "winsize": 1000},
            {"name": "avg", "type": "ma", "inAggr": "buf"},
            {"name": "hist", "type": "onlineHistogram", "inAggr": "buf", "lowerBound": 0, "upperBound": 10, "bins": 4, "addPosInf": true}
        ]}"#,
    )
    .unwrap()
    .build()
    .unwrap()
}

fn feed(p: &mut PipelineContext, from: i64, to: i64) {
    for i in from..to {
        let record = Record::new(i as u64, i * 100).with_float("v", (i % 13) as f64);
        p.on_add("s", &record).unwrap();
    }
}

#[tokio::test]
async fn test_save_to_and_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("checkpoints").join("disk.ckpt");

    let mut original = pipeline();
    feed(&mut original, 0, 40);
    original.save_to(&path).await.unwrap();
    assert!(path.exists());

    let mut restored = pipeline();
    restored.load_from(&path).await.unwrap();
    assert_eq!(restored.snapshot_all(), original.snapshot_all());
    assert_eq!(restored.store_time("s"), Some(3900));

    feed(&mut original, 40, 60);
    feed(&mut restored, 40, 60);
    assert_eq!(restored.vector("hist").unwrap(), original.vector("hist").unwrap());
    assert_eq!(restored.value("avg").unwrap(), original.value("avg").unwrap());
}

#[tokio::test]
async fn test_checkpoint_metadata() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("disk.ckpt");

    let mut p = pipeline();
    feed(&mut p, 0, 5);
    p.save_to(&path).await.unwrap();

    let checkpoint = Checkpoint::load(&path).await.unwrap();
    assert_eq!(checkpoint.metadata.pipeline, "disk");
    assert_eq!(checkpoint.metadata.entry_count, 3);
    assert!(checkpoint.metadata.validated);
    let names: Vec<&str> = checkpoint.operators.iter().map(|op| op.name.as_str()).collect();
    assert_eq!(names, vec!["buf", "avg", "hist"]);
}

#[tokio::test]
async fn test_load_from_missing_file() {
    let dir = TempDir::new().unwrap();
    let mut p = pipeline();
    let err = p.load_from(dir.path().join("absent.ckpt")).await.unwrap_err();
    assert!(matches!(
        err,
        ProcessorError::State(StateError::RestoreFailed { .. })
    ));
}

#[tokio::test]
async fn test_load_from_corrupt_file_keeps_state() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corrupt.ckpt");
    tokio::fs::write(&path, b"not a checkpoint").await.unwrap();

    let mut p = pipeline();
    feed(&mut p, 0, 3);
    let before = p.snapshot_all();

    assert!(p.load_from(&path).await.is_err());
    assert_eq!(p.snapshot_all(), before);
}
