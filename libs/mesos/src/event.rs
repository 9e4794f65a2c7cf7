//! Events received on the subscription stream.

use serde::{Deserialize, Serialize};
use tierd_id::{FrameworkId, OfferId};

use crate::{MesosError, Offer, TaskStatus};

/// Event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Subscribed,
    Offers,
    InverseOffers,
    Rescind,
    RescindInverseOffer,
    Update,
    UpdateOperationStatus,
    Message,
    Failure,
    Error,
    Heartbeat,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribed {
    pub framework_id: FrameworkId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Offers {
    #[serde(default)]
    pub offers: Vec<Offer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rescind {
    pub offer_id: OfferId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<tierd_id::AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// An event from the master.
///
/// Bodies for event types the scheduler does not act on are not decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<Subscribed>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offers: Option<Offers>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescind: Option<Rescind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Update>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEvent>,
}

impl Event {
    /// Decodes one RecordIO payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, MesosError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
