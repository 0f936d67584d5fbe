//! Domain events for the UAG prediction pipeline
//!
//! Events travel as JSON envelopes on a broadcast bus. Publishers only
//! commit to a topic name and a JSON payload; consumers deserialize the
//! payloads for the topics they care about and must drop (with a log)
//! anything that does not match the expected schema. That keeps one
//! misbehaving publisher from poisoning every typed consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::Result;

/// Topic published when a student profile has been created or replaced.
pub const TOPIC_STUDENT_CREATED: &str = "student.created";

/// Topic published when an OCR extraction batch has finished for a student.
pub const TOPIC_OCR_COMPLETED: &str = "ocr.completed";

/// Payload for [`TOPIC_STUDENT_CREATED`].
///
/// `user_id` is absent for guest profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudentCreated {
    pub student_id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

/// Payload for [`TOPIC_OCR_COMPLETED`].
///
/// `ocr_extraction_ids` names the extraction rows produced by the OCR
/// engine for this batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OcrCompleted {
    pub student_id: Uuid,
    pub ocr_extraction_ids: Vec<Uuid>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

/// Envelope carried on the bus.
///
/// The payload stays raw JSON until a consumer claims the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub topic: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Build an envelope from a typed payload.
    pub fn from_payload<T: Serialize>(topic: &str, payload: &T) -> Result<Self> {
        Ok(Self::new(topic, serde_json::to_value(payload)?))
    }
}

/// Central event distribution bus.
///
/// Backed by `tokio::broadcast`: publishing never blocks, slow subscribers
/// lag and are told how many envelopes they missed, and receivers clean up
/// when dropped.
///
/// # Examples
///
/// ```
/// use uag_common::events::{EventBus, EventEnvelope, StudentCreated, TOPIC_STUDENT_CREATED};
/// use uuid::Uuid;
///
/// let bus = EventBus::new(256);
/// let mut rx = bus.subscribe();
///
/// let event = StudentCreated { student_id: Uuid::new_v4(), user_id: None };
/// let envelope = EventEnvelope::from_payload(TOPIC_STUDENT_CREATED, &event).unwrap();
/// bus.publish(envelope).ok();
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new bus buffering up to `capacity` envelopes per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to all future envelopes. Envelopes published before the
    /// subscription are not delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Publish an envelope to all subscribers.
    ///
    /// Returns the number of subscribers that received it, or `Err` when
    /// nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn publish(
        &self,
        envelope: EventEnvelope,
    ) -> std::result::Result<usize, broadcast::error::SendError<EventEnvelope>> {
        self.tx.send(envelope)
    }

    /// Publish an envelope, ignoring whether anyone is listening.
    pub fn publish_lossy(&self, envelope: EventEnvelope) {
        if self.tx.send(envelope).is_err() {
            tracing::debug!("No subscribers on event bus, envelope dropped");
        }
    }
}
