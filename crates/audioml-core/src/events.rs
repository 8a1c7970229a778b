//! In-process event bus for pipeline and training lifecycle notifications.
//!
//! The preprocessing worker, the training orchestrator, and the model
//! registry emit [`PipelineEvent`]s into a single broadcast channel.
//! Subscribers (tests, log bridges) listen independently. Durable state lives
//! in the status store; these events are advisory and dropped when nobody
//! listens.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle events emitted by background work.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The worker picked up an ingestion event.
    AudioProcessing { audio_id: i64 },
    /// Features were extracted and recorded.
    AudioFeaturesReady { audio_id: i64, feature_count: usize },
    /// Preprocessing failed for an audio file.
    AudioFailed { audio_id: i64, error: String },
    /// A training job entered `running`.
    TrainingStarted { job_id: Uuid, model: String },
    /// A training job completed and registered a version.
    TrainingCompleted {
        job_id: Uuid,
        model: String,
        version: i32,
    },
    /// A training job failed.
    TrainingFailed { job_id: Uuid, error: String },
    /// A model version became the active one for its name.
    ModelActivated {
        model_id: Uuid,
        model: String,
        version: i32,
    },
}

impl PipelineEvent {
    /// Dot-namespaced event type, e.g. `"audio.features_ready"`.
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::AudioProcessing { .. } => "audio.processing",
            PipelineEvent::AudioFeaturesReady { .. } => "audio.features_ready",
            PipelineEvent::AudioFailed { .. } => "audio.failed",
            PipelineEvent::TrainingStarted { .. } => "training.started",
            PipelineEvent::TrainingCompleted { .. } => "training.completed",
            PipelineEvent::TrainingFailed { .. } => "training.failed",
            PipelineEvent::ModelActivated { .. } => "model.activated",
        }
    }
}

/// An emitted event with its emission time.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub payload: PipelineEvent,
}

impl EventEnvelope {
    fn new(payload: PipelineEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: payload.event_type(),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

/// Broadcast hub for [`PipelineEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently with no subscribers.
    pub fn emit(&self, event: PipelineEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::debug!(
            event_type = envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive events. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_every_subscriber() {
        let bus = EventBus::new(32);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(PipelineEvent::AudioProcessing { audio_id: 3 });

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea.event_type, "audio.processing");
        assert_eq!(ea.payload, PipelineEvent::AudioProcessing { audio_id: 3 });
        assert_eq!(ea.event_id, eb.event_id);
    }

    #[test]
    fn test_emit_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        bus.emit(PipelineEvent::AudioFailed {
            audio_id: 1,
            error: "boom".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(PipelineEvent::TrainingCompleted {
            job_id: Uuid::nil(),
            model: "vad".into(),
            version: 2,
        })
        .unwrap();
        assert_eq!(json["type"], "training_completed");
        assert_eq!(json["version"], 2);
    }
}
