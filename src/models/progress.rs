use serde::{Deserialize, Serialize};

/// Transient view of a completed iteration pushed to live observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub iteration_number: u32,
    pub image_url: String,
    pub description: String,
}

/// Envelope written to WebSocket clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChannelMessage {
    Status { message: String },
    UpdateImage(ProgressEvent),
}
