use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque user identifier supplied by the identity provider.
pub type UserId = String;

/// Unique identifier for a server (guild).
pub type ServerId = String;

/// Unique identifier for a channel.
pub type ChannelId = String;

/// Per-channel message sequence number. Starts at 1, never reused.
pub type MessageId = u64;

/// Unique identifier for a live channel subscription.
pub type SubscriptionId = Uuid;

/// Unique identifier for a connected client (one per connection, not per user).
pub type ConnectionId = Uuid;

/// A message as stored and delivered. Only `content` and `edited` change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited: bool,
}

/// Whether a channel carries text chat or a voice room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    #[default]
    Text,
    Voice,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ChannelKind::Text),
            "voice" => Some(ChannelKind::Voice),
            _ => None,
        }
    }
}

/// Event fanned out to the live subscribers of one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A new message was appended.
    MessageCreated { message: Message },

    /// A message's content was replaced.
    MessageEdited { message: Message },

    /// A message was removed from the channel history.
    MessageDeleted { channel_id: ChannelId, id: MessageId },
}

/// Why a subscription transitioned to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// The client asked to leave the channel.
    Unsubscribed,
    /// The connection's outbound buffer was full.
    Lagging,
    /// The connection is gone.
    Disconnected,
    /// The user was removed from the channel's server.
    MembershipRevoked,
    /// The channel no longer exists.
    ChannelDeleted,
}

/// Server summary returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: ServerId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub member_count: usize,
}

/// One page of channel history. `has_more` is set when messages beyond
/// the page exist; clients continue from the last returned ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// Channel summary returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub server_id: ServerId,
    pub name: String,
    pub kind: ChannelKind,
}

/// A server member with basic presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub online: bool,
}
