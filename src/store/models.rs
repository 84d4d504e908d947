use serde::{Deserialize, Serialize};

/// Last announcement posted into a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementRecord {
    pub channel_id: String,
    pub message_id: String,
}
