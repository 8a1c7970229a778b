//! Preprocessing worker: consumes ingestion events and runs the pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use audioml_core::defaults::{
    EVENT_BUS_CAPACITY, INGEST_SUBJECT, WORKER_MAX_CONCURRENT, WORKER_POLL_INTERVAL_MS,
};
use audioml_core::{Delivery, Error, EventChannel, IngestEvent, Result};

use crate::pipeline::PreprocessingPipeline;

/// Configuration for the preprocessing worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the channel is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of events processed at once.
    pub max_concurrent: usize,
    pub enabled: bool,
    /// Subject to consume.
    pub subject: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: WORKER_POLL_INTERVAL_MS,
            max_concurrent: WORKER_MAX_CONCURRENT,
            enabled: true,
            subject: INGEST_SUBJECT.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable preprocessing |
    /// | `WORKER_MAX_CONCURRENT` | `4` | Max events in flight |
    /// | `WORKER_POLL_INTERVAL_MS` | `5000` | Poll interval when idle |
    /// | `INGEST_SUBJECT` | `audio.ingest.raw` | Subject to consume |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("WORKER_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(WORKER_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(WORKER_POLL_INTERVAL_MS);

        let subject =
            std::env::var("INGEST_SUBJECT").unwrap_or_else(|_| INGEST_SUBJECT.to_string());

        Self {
            poll_interval_ms,
            max_concurrent,
            enabled,
            subject,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}

/// Worker lifecycle and per-message outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted,
    WorkerStopped,
    /// A delivery ran through the pipeline and was acked.
    Processed {
        seq: i64,
        audio_id: i64,
        succeeded: bool,
    },
    /// A delivery could not be decoded and was dead-lettered.
    Rejected { seq: i64, reason: String },
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to stop after the current batch.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Pulls ingestion events and runs each through the pipeline.
///
/// Every decoded delivery is acked once the pipeline returns, whether the
/// item succeeded or failed; a failed item is retried only through manual
/// resubmission. Deliveries left unacked by a crash are redelivered by the
/// channel after its ack window.
#[derive(Clone)]
pub struct PreprocessingWorker {
    channel: Arc<dyn EventChannel>,
    pipeline: PreprocessingPipeline,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl PreprocessingWorker {
    pub fn new(
        channel: Arc<dyn EventChannel>,
        pipeline: PreprocessingPipeline,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            channel,
            pipeline,
            config,
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    #[instrument(skip(self, shutdown_rx), fields(subject = %self.config.subject))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Preprocessing worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent,
            "Preprocessing worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let notify = self.channel.notifier();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Preprocessing worker received shutdown signal");
                break;
            }

            let deliveries = match self
                .channel
                .fetch(&self.config.subject, self.config.max_concurrent)
                .await
            {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    error!(error = %e, "Failed to fetch ingestion events");
                    Vec::new()
                }
            };

            if deliveries.is_empty() {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Preprocessing worker received shutdown signal");
                        break;
                    }
                    _ = notify.notified() => {}
                    _ = sleep(poll_interval) => {}
                }
                continue;
            }

            debug!(claimed = deliveries.len(), "Processing ingestion batch");
            let mut tasks = JoinSet::new();
            for delivery in deliveries {
                let worker = self.clone();
                tasks.spawn(async move {
                    worker.handle_delivery(delivery).await;
                });
            }
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = ?e, "Preprocessing task panicked");
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Preprocessing worker stopped");
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let seq = delivery.seq;
        let event: IngestEvent = match serde_json::from_value(delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                let reason = format!("undecodable ingestion event: {e}");
                warn!(seq, error = %reason, "Rejecting ingestion event");
                if let Err(reject_err) = self.channel.reject(seq, &reason).await {
                    error!(seq, error = %reject_err, "Failed to reject ingestion event");
                }
                let _ = self.event_tx.send(WorkerEvent::Rejected { seq, reason });
                return;
            }
        };

        debug!(
            seq,
            audio_id = event.audio_id,
            attempt = delivery.attempt,
            "Processing ingestion event"
        );
        let succeeded = self.pipeline.process(&event).await.is_ok();

        if let Err(e) = self.channel.ack(seq).await {
            error!(seq, audio_id = event.audio_id, error = %e, "Failed to ack ingestion event");
        }
        let _ = self.event_tx.send(WorkerEvent::Processed {
            seq,
            audio_id: event.audio_id,
            succeeded,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(50)
            .with_max_concurrent(0)
            .with_subject("test.subject")
            .with_enabled(false);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.subject, "test.subject");
        assert!(!config.enabled);
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent, WORKER_MAX_CONCURRENT);
        assert_eq!(config.subject, INGEST_SUBJECT);
        assert!(config.enabled);
    }
}
