use chrono::{DateTime, Utc};

use crate::engine::channel::ChannelState;
use crate::engine::events::{ChannelKind, Message, MessageId};

/// A stored server (guild) from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServerRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub description: Option<String>,
}

/// A server membership record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServerMemberRow {
    pub server_id: String,
    pub user_id: String,
}

/// A stored channel from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelRow {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub kind: String,
    pub last_message_id: i64,
    pub created_at: DateTime<Utc>,
}

impl ChannelRow {
    /// Unknown kinds read back as text.
    pub fn into_state(self) -> ChannelState {
        ChannelState {
            id: self.id,
            server_id: self.server_id,
            name: self.name,
            kind: ChannelKind::parse(&self.kind).unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

/// A stored message from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub channel_id: String,
    pub id: i64,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id as MessageId,
            channel_id: row.channel_id,
            author_id: row.author_id,
            content: row.content,
            created_at: row.created_at,
            edited: row.edited,
        }
    }
}
