use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{ChatError, ChatResult};

use super::events::{ChannelId, Message, MessageId};
use super::storage::{RetryPolicy, Storage};

/// Sequencing state for one channel. Guarded by that channel's mutex.
#[derive(Debug)]
struct ChannelLog {
    channel_id: ChannelId,
    /// Next ID to hand out; `None` until read from storage (or after a failed write).
    next_id: Option<MessageId>,
}

/// Durable, append-only message log per channel.
///
/// Writes to one channel are serialized by a per-channel mutex; writes to
/// different channels never contend. Storage holds the messages; this type
/// only owns sequencing.
pub struct MessageStore {
    logs: DashMap<ChannelId, Arc<Mutex<ChannelLog>>>,
    storage: Arc<dyn Storage>,
    retry: RetryPolicy,
}

impl MessageStore {
    pub fn new(storage: Arc<dyn Storage>, retry: RetryPolicy) -> Self {
        Self {
            logs: DashMap::new(),
            storage,
            retry,
        }
    }

    /// Acquire exclusive write access to a channel. Held for the append+publish
    /// pair so live delivery order matches ID order.
    pub async fn writer(&self, channel_id: &str) -> ChannelWriter {
        let log = self
            .logs
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ChannelLog {
                    channel_id: channel_id.to_string(),
                    next_id: None,
                }))
            })
            .clone();

        ChannelWriter {
            guard: log.lock_owned().await,
            storage: self.storage.clone(),
            retry: self.retry,
        }
    }

    /// Append a message, assigning the channel's next sequence number.
    pub async fn append(
        &self,
        channel_id: &str,
        author_id: &str,
        content: &str,
    ) -> ChatResult<Message> {
        self.writer(channel_id)
            .await
            .append(author_id, content)
            .await
    }

    /// Messages with ID greater than `after`, ascending, at most `limit`.
    pub async fn list_since(
        &self,
        channel_id: &str,
        after: MessageId,
        limit: usize,
    ) -> ChatResult<Vec<Message>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let storage = self.storage.as_ref();
        Ok(self
            .retry
            .run("list_messages_since", move || {
                storage.list_messages_since(channel_id, after, limit)
            })
            .await?)
    }

    pub async fn get(&self, channel_id: &str, id: MessageId) -> ChatResult<Message> {
        fetch(self.storage.as_ref(), &self.retry, channel_id, id).await
    }

    /// Replace a message's content and mark it edited. ID and timestamp are kept.
    pub async fn edit(
        &self,
        channel_id: &str,
        id: MessageId,
        content: &str,
    ) -> ChatResult<Message> {
        self.writer(channel_id).await.edit(id, content).await
    }

    pub async fn delete(&self, channel_id: &str, id: MessageId) -> ChatResult<()> {
        self.writer(channel_id).await.delete(id).await
    }

    /// Drop sequencing state for a deleted channel. Storage deletion is the
    /// registry's job.
    pub fn forget_channel(&self, channel_id: &str) {
        self.logs.remove(channel_id);
    }
}

/// Exclusive write access to one channel's log.
pub struct ChannelWriter {
    guard: OwnedMutexGuard<ChannelLog>,
    storage: Arc<dyn Storage>,
    retry: RetryPolicy,
}

impl ChannelWriter {
    async fn next_id(&mut self) -> ChatResult<MessageId> {
        if let Some(id) = self.guard.next_id {
            return Ok(id);
        }
        let storage = self.storage.as_ref();
        let channel_id = self.guard.channel_id.as_str();
        let last = self
            .retry
            .run("last_message_id", move || storage.last_message_id(channel_id))
            .await?;
        let next = last + 1;
        self.guard.next_id = Some(next);
        Ok(next)
    }

    /// Append a message. The sequence number is consumed only once the write is durable.
    pub async fn append(&mut self, author_id: &str, content: &str) -> ChatResult<Message> {
        let id = self.next_id().await?;
        let message = Message {
            id,
            channel_id: self.guard.channel_id.clone(),
            author_id: author_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            edited: false,
        };

        let storage = self.storage.as_ref();
        let msg = &message;
        let written = self
            .retry
            .run("insert_message", move || storage.insert_message(msg))
            .await;

        if let Err(e) = written {
            // Storage may have moved on without us; re-read the high-water mark next time.
            self.guard.next_id = None;
            return Err(e.into());
        }

        self.guard.next_id = Some(id + 1);
        debug!(channel_id = %message.channel_id, message_id = id, "message appended");
        Ok(message)
    }

    pub async fn get(&self, id: MessageId) -> ChatResult<Message> {
        fetch(
            self.storage.as_ref(),
            &self.retry,
            &self.guard.channel_id,
            id,
        )
        .await
    }

    pub async fn edit(&mut self, id: MessageId, content: &str) -> ChatResult<Message> {
        let storage = self.storage.as_ref();
        let channel_id = self.guard.channel_id.as_str();
        let message = self
            .retry
            .run("update_message_content", move || {
                storage.update_message_content(channel_id, id, content)
            })
            .await
            .map_err(|e| not_found_as_message(e.into(), id))?;
        debug!(%channel_id, message_id = id, "message edited");
        Ok(message)
    }

    pub async fn delete(&mut self, id: MessageId) -> ChatResult<()> {
        let storage = self.storage.as_ref();
        let channel_id = self.guard.channel_id.as_str();
        self.retry
            .run("delete_message", move || storage.delete_message(channel_id, id))
            .await
            .map_err(|e| not_found_as_message(e.into(), id))?;
        debug!(%channel_id, message_id = id, "message deleted");
        Ok(())
    }
}

async fn fetch(
    storage: &dyn Storage,
    retry: &RetryPolicy,
    channel_id: &str,
    id: MessageId,
) -> ChatResult<Message> {
    retry
        .run("get_message", move || storage.get_message(channel_id, id))
        .await?
        .ok_or_else(|| ChatError::not_found(format!("message {id}")))
}

fn not_found_as_message(err: ChatError, id: MessageId) -> ChatError {
    match err {
        ChatError::NotFound(_) => ChatError::not_found(format!("message {id}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::channel::ChannelState;
    use crate::engine::events::ChannelKind;
    use crate::engine::memory_storage::MemoryStorage;
    use crate::engine::server::ServerState;
    use std::time::Duration;

    async fn setup() -> (MessageStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_server(&ServerState::new("s1".into(), "Test".into(), "alice".into()))
            .await
            .unwrap();
        for id in ["c1", "c2"] {
            storage
                .insert_channel(&ChannelState::new(
                    id.into(),
                    "s1".into(),
                    id.into(),
                    ChannelKind::Text,
                ))
                .await
                .unwrap();
        }
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        (MessageStore::new(storage.clone(), retry), storage)
    }

    #[tokio::test]
    async fn test_ids_are_sequential_per_channel() {
        let (store, _) = setup().await;
        let a = store.append("c1", "alice", "one").await.unwrap();
        let b = store.append("c1", "alice", "two").await.unwrap();
        let c = store.append("c2", "alice", "other").await.unwrap();
        assert_eq!((a.id, b.id, c.id), (1, 2, 1));
        assert!(!a.edited);
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_unique_ids() {
        let (store, _) = setup().await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append("c1", "alice", &format!("m{i}")).await.unwrap().id
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.sort();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());

        let listed = store.list_since("c1", 0, usize::MAX).await.unwrap();
        assert_eq!(listed.len(), 50);
        assert!(listed.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_list_since_cursor() {
        let (store, _) = setup().await;
        for i in 0..5 {
            store.append("c1", "alice", &format!("m{i}")).await.unwrap();
        }
        let page = store.list_since("c1", 3, 10).await.unwrap();
        assert_eq!(page.iter().map(|m| m.id).collect::<Vec<_>>(), vec![4, 5]);
        assert!(store.list_since("c1", 0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_keeps_id_and_timestamp() {
        let (store, _) = setup().await;
        let original = store.append("c1", "alice", "hi").await.unwrap();
        let edited = store.edit("c1", original.id, "hello").await.unwrap();
        assert_eq!(edited.id, original.id);
        assert_eq!(edited.created_at, original.created_at);
        assert_eq!(edited.content, "hello");
        assert!(edited.edited);

        let missing = store.edit("c1", 99, "x").await;
        assert!(matches!(missing, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deleted_message_disappears_and_id_is_not_reused() {
        let (store, _) = setup().await;
        store.append("c1", "alice", "one").await.unwrap();
        let two = store.append("c1", "alice", "two").await.unwrap();
        store.delete("c1", two.id).await.unwrap();

        let listed = store.list_since("c1", 0, 10).await.unwrap();
        assert_eq!(listed.len(), 1);

        store.forget_channel("c1");
        let three = store.append("c1", "alice", "three").await.unwrap();
        assert_eq!(three.id, 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (store, storage) = setup().await;
        storage.fail_next_inserts(2);
        let msg = store.append("c1", "alice", "hi").await.unwrap();
        assert_eq!(msg.id, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_unavailable_without_consuming_id() {
        let (store, storage) = setup().await;
        storage.fail_next_inserts(3);
        let result = store.append("c1", "alice", "hi").await;
        assert!(matches!(result, Err(ChatError::Unavailable(_))));

        let msg = store.append("c1", "alice", "hi again").await.unwrap();
        assert_eq!(msg.id, 1);
    }

    #[tokio::test]
    async fn test_append_to_missing_channel() {
        let (store, _) = setup().await;
        let result = store.append("nope", "alice", "hi").await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }
}
