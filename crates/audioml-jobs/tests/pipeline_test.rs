//! Preprocessing worker and pipeline against in-memory stores.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use audioml_core::{
    feature_storage_path, AudioRepository, AudioStatus, EventBus, EventChannel, IngestEvent,
    IngestionStatus, PipelineEvent, StorageBackend,
};
use audioml_db::{MemoryAudioRepository, MemoryEventChannel, MemoryStorage, MessageState};
use audioml_jobs::{
    IngestionService, PreprocessingPipeline, PreprocessingWorker, WorkerConfig, WorkerEvent,
    WorkerHandle,
};

use common::{wav_bytes, FakeToolchain};

struct Harness {
    audio: Arc<MemoryAudioRepository>,
    channel: Arc<MemoryEventChannel>,
    storage: Arc<MemoryStorage>,
    toolchain: Arc<FakeToolchain>,
    events: Arc<EventBus>,
    ingest: IngestionService,
    pipeline: PreprocessingPipeline,
    work_root: TempDir,
}

impl Harness {
    fn new() -> Self {
        let audio = Arc::new(MemoryAudioRepository::new());
        let channel = Arc::new(MemoryEventChannel::default());
        let storage = Arc::new(MemoryStorage::new());
        let toolchain = Arc::new(FakeToolchain::default());
        let events = Arc::new(EventBus::new(64));
        let work_root = TempDir::new().unwrap();

        let ingest = IngestionService::new(audio.clone(), channel.clone());
        let pipeline = PreprocessingPipeline::new(
            audio.clone(),
            storage.clone(),
            toolchain.clone(),
            events.clone(),
        )
        .with_work_root(work_root.path());

        Self {
            audio,
            channel,
            storage,
            toolchain,
            events,
            ingest,
            pipeline,
            work_root,
        }
    }

    fn start_worker(&self) -> WorkerHandle {
        PreprocessingWorker::new(
            self.channel.clone(),
            self.pipeline.clone(),
            WorkerConfig::default().with_poll_interval(20),
        )
        .start()
    }

    async fn upload(&self, key: &str) -> i64 {
        self.storage.write(key, &wav_bytes()).await.unwrap();
        self.ingest
            .enqueue(key, Some("clip.wav".into()))
            .await
            .unwrap()
            .id
    }

    fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.work_root.path()).unwrap().count()
    }
}

async fn next_worker_event(
    rx: &mut tokio::sync::broadcast::Receiver<WorkerEvent>,
) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await.unwrap() {
                WorkerEvent::WorkerStarted => continue,
                other => return other,
            }
        }
    })
    .await
    .expect("worker event within timeout")
}

#[tokio::test]
async fn test_worker_drives_upload_to_features_ready() {
    let h = Harness::new();
    let handle = h.start_worker();
    let mut rx = handle.events();
    let mut bus = h.events.subscribe();

    let audio_id = h.upload("raw/0001.wav").await;

    let event = next_worker_event(&mut rx).await;
    assert!(matches!(
        event,
        WorkerEvent::Processed { audio_id: id, succeeded: true, .. } if id == audio_id
    ));

    let audio = h.audio.get(audio_id).await.unwrap().unwrap();
    assert_eq!(audio.status, AudioStatus::FeaturesReady);
    assert_eq!(audio.duration_seconds, Some(1.5));
    assert_eq!(audio.sample_rate, Some(16_000));
    assert!(audio.error_message.is_none());

    let features = h.audio.list_features(audio_id).await.unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].segment_index, 0);
    assert_eq!(features[0].feature_type, "mel");
    assert_eq!(features[0].storage_path, feature_storage_path(audio_id, 0));
    assert!(h.storage.exists(&features[0].storage_path).await.unwrap());

    let ingestion = h.audio.latest_ingestion(audio_id).await.unwrap().unwrap();
    assert_eq!(ingestion.status, IngestionStatus::FeaturesReady);

    assert_eq!(h.channel.count_in(MessageState::Acked), 1);
    assert_eq!(h.scratch_entries(), 0);

    let mut seen = Vec::new();
    while let Ok(env) = bus.try_recv() {
        seen.push(env.event_type);
    }
    assert_eq!(seen, vec!["audio.processing", "audio.features_ready"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_normalize_failure_marks_failed_and_acks() {
    let h = Harness::new();
    h.toolchain.fail_normalize.store(true, Ordering::SeqCst);
    let handle = h.start_worker();
    let mut rx = handle.events();

    let audio_id = h.upload("raw/0002.wav").await;

    let event = next_worker_event(&mut rx).await;
    assert!(matches!(event, WorkerEvent::Processed { succeeded: false, .. }));

    let audio = h.audio.get(audio_id).await.unwrap().unwrap();
    assert_eq!(audio.status, AudioStatus::Failed);
    assert!(audio
        .error_message
        .as_deref()
        .unwrap()
        .contains("Invalid data found"));
    assert!(h.audio.list_features(audio_id).await.unwrap().is_empty());
    assert!(h.storage.keys().iter().all(|k| !k.starts_with("features/")));

    // Failed items are not redelivered automatically.
    assert_eq!(h.channel.count_in(MessageState::Acked), 1);
    assert_eq!(h.channel.count_in(MessageState::Pending), 0);
    assert_eq!(h.scratch_entries(), 0);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_item_can_be_resubmitted_and_succeed() {
    let h = Harness::new();
    h.toolchain.fail_normalize.store(true, Ordering::SeqCst);
    let handle = h.start_worker();
    let mut rx = handle.events();

    let audio_id = h.upload("raw/0003.wav").await;
    next_worker_event(&mut rx).await;
    assert_eq!(
        h.audio.get(audio_id).await.unwrap().unwrap().status,
        AudioStatus::Failed
    );

    h.toolchain.fail_normalize.store(false, Ordering::SeqCst);
    h.ingest.resubmit(audio_id).await.unwrap();

    let event = next_worker_event(&mut rx).await;
    assert!(matches!(event, WorkerEvent::Processed { succeeded: true, .. }));
    let audio = h.audio.get(audio_id).await.unwrap().unwrap();
    assert_eq!(audio.status, AudioStatus::FeaturesReady);
    assert!(audio.error_message.is_none());
    assert_eq!(h.toolchain.normalize_calls.load(Ordering::SeqCst), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_mark_processing_failure_is_not_fatal() {
    let h = Harness::new();
    let audio_id = h.upload("raw/0004.wav").await;
    h.audio.fail_status_updates(AudioStatus::Processing);

    let feature = h
        .pipeline
        .process(&IngestEvent {
            audio_id,
            s3_path: "raw/0004.wav".into(),
            filename: None,
        })
        .await
        .unwrap();

    assert_eq!(feature.audio_file_id, audio_id);
    assert_eq!(
        h.audio.get(audio_id).await.unwrap().unwrap().status,
        AudioStatus::FeaturesReady
    );
}

#[tokio::test]
async fn test_missing_raw_object_marks_failed() {
    let h = Harness::new();
    let audio_id = h
        .ingest
        .enqueue("s3://audio-raw/raw/missing.wav", None)
        .await
        .unwrap()
        .id;

    let err = h
        .pipeline
        .process(&IngestEvent {
            audio_id,
            s3_path: "s3://audio-raw/raw/missing.wav".into(),
            filename: None,
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let audio = h.audio.get(audio_id).await.unwrap().unwrap();
    assert_eq!(audio.status, AudioStatus::Failed);
    assert!(audio.error_message.unwrap().contains("raw/missing.wav"));
    assert_eq!(h.toolchain.normalize_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.scratch_entries(), 0);
}

#[tokio::test]
async fn test_feature_row_requires_blob() {
    let h = Harness::new();
    let audio_id = h.upload("raw/0005.wav").await;
    h.storage.set_fail_writes(true);

    let mut bus = h.events.subscribe();
    let err = h
        .pipeline
        .process(&IngestEvent {
            audio_id,
            s3_path: "raw/0005.wav".into(),
            filename: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("storage unavailable"));
    assert!(h.audio.list_features(audio_id).await.unwrap().is_empty());
    assert_eq!(
        h.audio.get(audio_id).await.unwrap().unwrap().status,
        AudioStatus::Failed
    );

    let last = std::iter::from_fn(|| bus.try_recv().ok()).last().unwrap();
    assert!(matches!(last.payload, PipelineEvent::AudioFailed { audio_id: id, .. } if id == audio_id));
}

#[tokio::test]
async fn test_redelivered_event_keeps_one_feature_row() {
    let h = Harness::new();
    let audio_id = h.upload("raw/0008.wav").await;
    let event = IngestEvent {
        audio_id,
        s3_path: "raw/0008.wav".into(),
        filename: None,
    };

    // At-least-once delivery: the same event may run twice.
    let first = h.pipeline.process(&event).await.unwrap();
    let second = h.pipeline.process(&event).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(h.audio.list_features(audio_id).await.unwrap().len(), 1);
    assert_eq!(h.audio.feature_count(), 1);
    assert_eq!(
        h.audio.get(audio_id).await.unwrap().unwrap().status,
        AudioStatus::FeaturesReady
    );
}

#[tokio::test]
async fn test_features_ready_write_failure_marks_failed() {
    let h = Harness::new();
    let audio_id = h.upload("raw/0009.wav").await;
    h.audio.fail_status_updates(AudioStatus::FeaturesReady);

    let mut bus = h.events.subscribe();
    let err = h
        .pipeline
        .process(&IngestEvent {
            audio_id,
            s3_path: "raw/0009.wav".into(),
            filename: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("features_ready"));

    let audio = h.audio.get(audio_id).await.unwrap().unwrap();
    assert_eq!(audio.status, AudioStatus::Failed);
    assert!(audio
        .error_message
        .unwrap()
        .starts_with("could not record features_ready:"));
    let last = std::iter::from_fn(|| bus.try_recv().ok()).last().unwrap();
    assert!(matches!(last.payload, PipelineEvent::AudioFailed { audio_id: id, .. } if id == audio_id));

    // The file is not stranded in processing.
    let ingestion = h.ingest.resubmit(audio_id).await.unwrap();
    assert_eq!(ingestion.status, IngestionStatus::Queued);
    assert_eq!(h.channel.published("audio.ingest.raw").len(), 2);
}

#[tokio::test]
async fn test_extractor_without_output_fails_item() {
    let h = Harness::new();
    h.toolchain.skip_feature_output.store(true, Ordering::SeqCst);
    let audio_id = h.upload("raw/0006.wav").await;

    let err = h
        .pipeline
        .process(&IngestEvent {
            audio_id,
            s3_path: "raw/0006.wav".into(),
            filename: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("produced no output"));
    assert_eq!(
        h.audio.get(audio_id).await.unwrap().unwrap().status,
        AudioStatus::Failed
    );
}

#[tokio::test]
async fn test_undecodable_event_is_dead_lettered() {
    let h = Harness::new();
    let handle = h.start_worker();
    let mut rx = handle.events();

    let seq = h
        .channel
        .publish("audio.ingest.raw", &json!({"audio": "nope"}))
        .await
        .unwrap();

    let event = next_worker_event(&mut rx).await;
    assert!(matches!(event, WorkerEvent::Rejected { seq: s, .. } if s == seq));
    assert_eq!(h.channel.state_of(seq), Some(MessageState::Dead));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_worker_processes_batch_concurrently() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(h.upload(&format!("raw/batch-{n}.wav")).await);
    }

    let worker = PreprocessingWorker::new(
        h.channel.clone(),
        h.pipeline.clone(),
        WorkerConfig::default().with_poll_interval(20),
    );
    let mut rx = worker.events();
    let handle = worker.start();
    let mut done = Vec::new();
    while done.len() < ids.len() {
        if let WorkerEvent::Processed { audio_id, succeeded, .. } = next_worker_event(&mut rx).await
        {
            assert!(succeeded);
            done.push(audio_id);
        }
    }
    done.sort();
    assert_eq!(done, ids);

    for id in ids {
        assert_eq!(
            h.audio.get(id).await.unwrap().unwrap().status,
            AudioStatus::FeaturesReady
        );
    }
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disabled_worker_leaves_events_pending() {
    let h = Harness::new();
    let handle = PreprocessingWorker::new(
        h.channel.clone(),
        h.pipeline.clone(),
        WorkerConfig::default().with_enabled(false),
    )
    .start();

    h.upload("raw/0007.wav").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.channel.count_in(MessageState::Pending), 1);
    drop(handle);
}
