use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StorageError;

use super::channel::ChannelState;
use super::events::{Message, MessageId};
use super::server::ServerState;

/// Persistence seam for the membership registry and the message store.
///
/// Any engine offering atomic per-key append and point reads fits. The core
/// never assumes a particular database.
#[async_trait]
pub trait Storage: Send + Sync {
    /// All servers with their member sets populated (channel sets empty).
    async fn load_servers(&self) -> Result<Vec<ServerState>, StorageError>;

    async fn load_channels(&self) -> Result<Vec<ChannelState>, StorageError>;

    /// Insert a server. The owner is recorded as its first member.
    async fn insert_server(&self, server: &ServerState) -> Result<(), StorageError>;

    /// Delete a server together with its members, channels and messages.
    async fn delete_server(&self, server_id: &str) -> Result<(), StorageError>;

    /// Idempotent.
    async fn add_member(&self, server_id: &str, user_id: &str) -> Result<(), StorageError>;

    /// Idempotent.
    async fn remove_member(&self, server_id: &str, user_id: &str) -> Result<(), StorageError>;

    async fn insert_channel(&self, channel: &ChannelState) -> Result<(), StorageError>;

    /// Delete a channel and every message in it.
    async fn delete_channel(&self, channel_id: &str) -> Result<(), StorageError>;

    /// Highest message ID ever assigned in the channel (0 if none). Deleting
    /// messages never lowers it.
    async fn last_message_id(&self, channel_id: &str) -> Result<MessageId, StorageError>;

    /// Durably append a message and advance the channel's high-water mark.
    async fn insert_message(&self, message: &Message) -> Result<(), StorageError>;

    /// Messages with `id > after`, ascending, at most `limit`.
    async fn list_messages_since(
        &self,
        channel_id: &str,
        after: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;

    async fn get_message(
        &self,
        channel_id: &str,
        id: MessageId,
    ) -> Result<Option<Message>, StorageError>;

    /// Replace content and set `edited`. `NotFound` if the message is absent.
    async fn update_message_content(
        &self,
        channel_id: &str,
        id: MessageId,
        content: &str,
    ) -> Result<Message, StorageError>;

    /// `NotFound` if the message is absent.
    async fn delete_message(&self, channel_id: &str, id: MessageId) -> Result<(), StorageError>;
}

/// Bounded retry for transient (`Unavailable`) storage failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Linear backoff step between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying only `Unavailable` errors. Anything else returns immediately.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(op = op_name, attempt, error = %e, "transient storage failure, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}
