use chrono::{DateTime, Utc};

use super::events::{ChannelId, ChannelInfo, ChannelKind, ServerId};

/// In-memory directory entry for a single channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub id: ChannelId,
    pub server_id: ServerId,
    pub name: String,
    pub kind: ChannelKind,
    pub created_at: DateTime<Utc>,
}

impl ChannelState {
    pub fn new(id: ChannelId, server_id: ServerId, name: String, kind: ChannelKind) -> Self {
        Self {
            id,
            server_id,
            name,
            kind,
            created_at: Utc::now(),
        }
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            id: self.id.clone(),
            server_id: self.server_id.clone(),
            name: self.name.clone(),
            kind: self.kind,
        }
    }
}
