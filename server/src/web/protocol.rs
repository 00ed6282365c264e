use serde::{Deserialize, Serialize};

use crate::engine::connection::ClosedSubscription;
use crate::engine::events::{
    ChannelEvent, ChannelId, CloseReason, ConnectionId, Message, MessageId, SubscriptionId,
    UserId,
};
use crate::error::ChatError;

/// Frames sent by a WebSocket client, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        channel_id: ChannelId,
    },
    Leave {
        subscription_id: SubscriptionId,
    },
    Post {
        channel_id: ChannelId,
        content: String,
        /// Echoed back on `posted` so the client can match its optimistic copy.
        #[serde(default)]
        nonce: Option<String>,
    },
    Edit {
        channel_id: ChannelId,
        message_id: MessageId,
        content: String,
    },
    Delete {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    History {
        channel_id: ChannelId,
        #[serde(default)]
        after: MessageId,
        #[serde(default)]
        limit: Option<usize>,
    },
}

/// Frames sent to a WebSocket client, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ready {
        connection_id: ConnectionId,
        user_id: UserId,
    },
    Joined {
        subscription_id: SubscriptionId,
        channel_id: ChannelId,
    },
    Left {
        subscription_id: SubscriptionId,
    },
    Posted {
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        nonce: Option<String>,
    },
    Edited {
        message: Message,
    },
    Deleted {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    Event {
        subscription_id: SubscriptionId,
        event: ChannelEvent,
    },
    SubscriptionClosed {
        subscription_id: SubscriptionId,
        channel_id: ChannelId,
        reason: CloseReason,
    },
    /// A page of history; when `has_more` is set the client asks again
    /// with `after` set to the last message ID.
    History {
        channel_id: ChannelId,
        messages: Vec<Message>,
        has_more: bool,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    pub fn error(err: &ChatError) -> Self {
        ServerFrame::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn bad_frame(detail: impl std::fmt::Display) -> Self {
        ServerFrame::Error {
            code: "invalid_frame".into(),
            message: format!("could not parse frame: {detail}"),
        }
    }
}

impl From<ClosedSubscription> for ServerFrame {
    fn from(closed: ClosedSubscription) -> Self {
        ServerFrame::SubscriptionClosed {
            subscription_id: closed.subscription_id,
            channel_id: closed.channel_id,
            reason: closed.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_parse_client_frames() {
        let join: ClientFrame = serde_json::from_str(r#"{"op":"join","channel_id":"c1"}"#).unwrap();
        assert_eq!(join, ClientFrame::Join { channel_id: "c1".into() });

        let post: ClientFrame =
            serde_json::from_str(r#"{"op":"post","channel_id":"c1","content":"hi"}"#).unwrap();
        assert_eq!(
            post,
            ClientFrame::Post {
                channel_id: "c1".into(),
                content: "hi".into(),
                nonce: None
            }
        );

        let history: ClientFrame =
            serde_json::from_str(r#"{"op":"history","channel_id":"c1"}"#).unwrap();
        assert_eq!(
            history,
            ClientFrame::History {
                channel_id: "c1".into(),
                after: 0,
                limit: None
            }
        );
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"op":"typing","channel_id":"c1"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>(r#"{"op":"leave","subscription_id":"nope"}"#).is_err());
    }

    #[test]
    fn test_closed_frame_shape() {
        let id = Uuid::new_v4();
        let frame = ServerFrame::from(ClosedSubscription {
            subscription_id: id,
            channel_id: "c1".into(),
            reason: CloseReason::Lagging,
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "subscription_closed");
        assert_eq!(json["reason"], "lagging");
        assert_eq!(json["subscription_id"], id.to_string());
    }

    #[test]
    fn test_error_frame_uses_stable_code() {
        let json = serde_json::to_value(ServerFrame::error(&ChatError::denied("no"))).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "permission_denied");
    }
}
