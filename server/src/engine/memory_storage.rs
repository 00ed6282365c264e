use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::StorageError;

use super::channel::ChannelState;
use super::events::{ChannelId, Message, MessageId, ServerId};
use super::server::ServerState;
use super::storage::Storage;

#[derive(Default)]
struct MemoryState {
    servers: HashMap<ServerId, ServerState>,
    channels: HashMap<ChannelId, ChannelState>,
    messages: HashMap<ChannelId, BTreeMap<MessageId, Message>>,
    /// Highest ID ever inserted per channel, kept separately so deletes never lower it.
    high_water: HashMap<ChannelId, MessageId>,
}

/// Process-local storage engine. Contents are lost on shutdown.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
    #[cfg(test)]
    injected_failures: std::sync::atomic::AtomicUsize,
    #[cfg(test)]
    channel_insert_delay: std::sync::Mutex<Option<std::time::Duration>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` message inserts fail with `Unavailable`.
    #[cfg(test)]
    pub(crate) fn fail_next_inserts(&self, n: usize) {
        self.injected_failures
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn take_injected_failure(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_injected_failure(&self) -> bool {
        false
    }

    /// Hold every channel insert open for `delay` after its row is written.
    #[cfg(test)]
    pub(crate) fn delay_channel_inserts(&self, delay: std::time::Duration) {
        if let Ok(mut slot) = self.channel_insert_delay.lock() {
            *slot = Some(delay);
        }
    }

    #[cfg(test)]
    async fn pause_after_channel_insert(&self) {
        let delay = self.channel_insert_delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    #[cfg(not(test))]
    async fn pause_after_channel_insert(&self) {}

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, StorageError> {
        self.state
            .read()
            .map_err(|_| StorageError::Backend("memory storage lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, StorageError> {
        self.state
            .write()
            .map_err(|_| StorageError::Backend("memory storage lock poisoned".into()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_servers(&self) -> Result<Vec<ServerState>, StorageError> {
        let state = self.read()?;
        Ok(state
            .servers
            .values()
            .map(|s| {
                let mut server = s.clone();
                server.channel_ids.clear();
                server
            })
            .collect())
    }

    async fn load_channels(&self) -> Result<Vec<ChannelState>, StorageError> {
        Ok(self.read()?.channels.values().cloned().collect())
    }

    async fn insert_server(&self, server: &ServerState) -> Result<(), StorageError> {
        let mut state = self.write()?;
        if state.servers.contains_key(&server.id) {
            return Err(StorageError::Conflict(format!(
                "server {} already exists",
                server.id
            )));
        }
        let mut stored = server.clone();
        stored.channel_ids.clear();
        stored.member_user_ids.insert(server.owner_id.clone());
        state.servers.insert(server.id.clone(), stored);
        Ok(())
    }

    async fn delete_server(&self, server_id: &str) -> Result<(), StorageError> {
        let mut state = self.write()?;
        state.servers.remove(server_id);
        let channel_ids: Vec<ChannelId> = state
            .channels
            .values()
            .filter(|ch| ch.server_id == server_id)
            .map(|ch| ch.id.clone())
            .collect();
        for channel_id in channel_ids {
            state.channels.remove(&channel_id);
            state.messages.remove(&channel_id);
            state.high_water.remove(&channel_id);
        }
        Ok(())
    }

    async fn add_member(&self, server_id: &str, user_id: &str) -> Result<(), StorageError> {
        let mut state = self.write()?;
        let server = state
            .servers
            .get_mut(server_id)
            .ok_or(StorageError::NotFound)?;
        server.member_user_ids.insert(user_id.to_string());
        Ok(())
    }

    async fn remove_member(&self, server_id: &str, user_id: &str) -> Result<(), StorageError> {
        let mut state = self.write()?;
        let server = state
            .servers
            .get_mut(server_id)
            .ok_or(StorageError::NotFound)?;
        server.member_user_ids.remove(user_id);
        Ok(())
    }

    async fn insert_channel(&self, channel: &ChannelState) -> Result<(), StorageError> {
        {
            let mut state = self.write()?;
            if !state.servers.contains_key(&channel.server_id) {
                return Err(StorageError::NotFound);
            }
            if state.channels.values().any(|ch| {
                ch.id == channel.id
                    || (ch.server_id == channel.server_id && ch.name == channel.name)
            }) {
                return Err(StorageError::Conflict(format!(
                    "channel {} already exists",
                    channel.name
                )));
            }
            state.channels.insert(channel.id.clone(), channel.clone());
        }
        self.pause_after_channel_insert().await;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: &str) -> Result<(), StorageError> {
        let mut state = self.write()?;
        state.channels.remove(channel_id);
        state.messages.remove(channel_id);
        state.high_water.remove(channel_id);
        Ok(())
    }

    async fn last_message_id(&self, channel_id: &str) -> Result<MessageId, StorageError> {
        Ok(self
            .read()?
            .high_water
            .get(channel_id)
            .copied()
            .unwrap_or(0))
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StorageError> {
        if self.take_injected_failure() {
            return Err(StorageError::Unavailable("injected failure".into()));
        }
        let mut state = self.write()?;
        if !state.channels.contains_key(&message.channel_id) {
            return Err(StorageError::NotFound);
        }
        let log = state
            .messages
            .entry(message.channel_id.clone())
            .or_default();
        if log.contains_key(&message.id) {
            return Err(StorageError::Conflict(format!(
                "message {} already exists",
                message.id
            )));
        }
        log.insert(message.id, message.clone());
        let mark = state
            .high_water
            .entry(message.channel_id.clone())
            .or_insert(0);
        *mark = (*mark).max(message.id);
        Ok(())
    }

    async fn list_messages_since(
        &self,
        channel_id: &str,
        after: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let state = self.read()?;
        let Some(log) = state.messages.get(channel_id) else {
            return Ok(vec![]);
        };
        Ok(log
            .range(after.saturating_add(1)..)
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn get_message(
        &self,
        channel_id: &str,
        id: MessageId,
    ) -> Result<Option<Message>, StorageError> {
        Ok(self
            .read()?
            .messages
            .get(channel_id)
            .and_then(|log| log.get(&id))
            .cloned())
    }

    async fn update_message_content(
        &self,
        channel_id: &str,
        id: MessageId,
        content: &str,
    ) -> Result<Message, StorageError> {
        let mut state = self.write()?;
        let message = state
            .messages
            .get_mut(channel_id)
            .and_then(|log| log.get_mut(&id))
            .ok_or(StorageError::NotFound)?;
        message.content = content.to_string();
        message.edited = true;
        Ok(message.clone())
    }

    async fn delete_message(&self, channel_id: &str, id: MessageId) -> Result<(), StorageError> {
        let mut state = self.write()?;
        state
            .messages
            .get_mut(channel_id)
            .and_then(|log| log.remove(&id))
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }
}
