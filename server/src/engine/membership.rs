use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

use super::channel::ChannelState;
use super::events::{ChannelId, ChannelInfo, ChannelKind, ServerId, ServerInfo, UserId};
use super::server::ServerState;
use super::storage::Storage;
use super::validation;

/// Tracks which users belong to which server, and which server owns each channel.
///
/// Writes go to storage first, then to the in-memory maps, so a failed write
/// leaves the registry unchanged. Reads never touch storage.
pub struct MembershipRegistry {
    /// All servers (guilds), keyed by server ID.
    servers: DashMap<ServerId, ServerState>,
    /// All channels, keyed by channel ID.
    channels: DashMap<ChannelId, ChannelState>,
    storage: Arc<dyn Storage>,
}

impl MembershipRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            servers: DashMap::new(),
            channels: DashMap::new(),
            storage,
        }
    }

    // ── Startup loading ─────────────────────────────────────────────

    /// Load servers, memberships and channels from storage into memory.
    pub async fn load(&self) -> ChatResult<()> {
        for server in self.storage.load_servers().await? {
            self.servers.insert(server.id.clone(), server);
        }

        for channel in self.storage.load_channels().await? {
            if let Some(mut srv) = self.servers.get_mut(&channel.server_id) {
                srv.channel_ids.insert(channel.id.clone());
            }
            self.channels.insert(channel.id.clone(), channel);
        }

        info!(
            servers = self.servers.len(),
            channels = self.channels.len(),
            "loaded membership registry"
        );
        Ok(())
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Whether `user_id` belongs to the server. Unknown servers have no members.
    pub fn is_member(&self, server_id: &str, user_id: &str) -> bool {
        self.servers
            .get(server_id)
            .map(|s| s.member_user_ids.contains(user_id))
            .unwrap_or(false)
    }

    /// Add a member. Adding an existing member is a no-op success.
    pub async fn add_member(&self, server_id: &str, user_id: &str) -> ChatResult<()> {
        if !self.servers.contains_key(server_id) {
            return Err(ChatError::not_found(format!("server {server_id}")));
        }
        if self.is_member(server_id, user_id) {
            return Ok(());
        }

        self.storage.add_member(server_id, user_id).await?;

        if let Some(mut server) = self.servers.get_mut(server_id) {
            server.member_user_ids.insert(user_id.to_string());
        }
        info!(%server_id, %user_id, "member added");
        Ok(())
    }

    /// Remove a member. Removing a non-member is a no-op success.
    /// Once this returns, `is_member` is false for every caller.
    pub async fn remove_member(&self, server_id: &str, user_id: &str) -> ChatResult<()> {
        if !self.servers.contains_key(server_id) {
            return Err(ChatError::not_found(format!("server {server_id}")));
        }
        if !self.is_member(server_id, user_id) {
            return Ok(());
        }

        self.storage.remove_member(server_id, user_id).await?;

        if let Some(mut server) = self.servers.get_mut(server_id) {
            server.member_user_ids.remove(user_id);
        }
        info!(%server_id, %user_id, "member removed");
        Ok(())
    }

    /// Member IDs of a server, sorted. Unknown servers have no members.
    pub fn members(&self, server_id: &str) -> Vec<UserId> {
        let mut members: Vec<UserId> = self
            .servers
            .get(server_id)
            .map(|s| s.member_user_ids.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    // ── Server directory ────────────────────────────────────────────

    /// Create a new server owned (and joined) by `owner_id`.
    pub async fn create_server(
        &self,
        name: &str,
        owner_id: &str,
        description: Option<&str>,
    ) -> ChatResult<ServerInfo> {
        validation::validate_server_name(name)?;
        let description = validation::validate_server_description(description)?;

        let state = ServerState::new(
            Uuid::new_v4().to_string(),
            name.trim().to_string(),
            owner_id.to_string(),
        )
        .with_description(description);
        self.storage.insert_server(&state).await?;

        let info = state.info();
        self.servers.insert(state.id.clone(), state);
        info!(server_id = %info.id, name = %info.name, "server created");
        Ok(info)
    }

    /// Delete a server and every channel it owns. Returns the removed channel IDs.
    ///
    /// The server entry is removed before its channels are swept, so a channel
    /// created concurrently either lands before the sweep or sees the server gone.
    pub async fn delete_server(&self, server_id: &str) -> ChatResult<Vec<ChannelId>> {
        if !self.servers.contains_key(server_id) {
            return Err(ChatError::not_found(format!("server {server_id}")));
        }

        self.storage.delete_server(server_id).await?;

        self.servers.remove(server_id);
        let channel_ids: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|ch| ch.server_id == server_id)
            .map(|ch| ch.id.clone())
            .collect();
        for channel_id in &channel_ids {
            self.channels.remove(channel_id);
        }
        info!(%server_id, channels = channel_ids.len(), "server deleted");
        Ok(channel_ids)
    }

    pub fn owner_of(&self, server_id: &str) -> Option<UserId> {
        self.servers.get(server_id).map(|s| s.owner_id.clone())
    }

    /// Servers a user belongs to, sorted by name.
    pub fn servers_for(&self, user_id: &str) -> Vec<ServerInfo> {
        let mut servers: Vec<ServerInfo> = self
            .servers
            .iter()
            .filter(|s| s.member_user_ids.contains(user_id))
            .map(|s| s.info())
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }

    // ── Channel directory ───────────────────────────────────────────

    /// Create a channel within a server. Names are unique per server.
    pub async fn create_channel(
        &self,
        server_id: &str,
        name: &str,
        kind: ChannelKind,
    ) -> ChatResult<ChannelInfo> {
        let name = normalize_channel_name(name);
        validation::validate_channel_name(&name)?;

        let taken = {
            let server = self
                .servers
                .get(server_id)
                .ok_or_else(|| ChatError::not_found(format!("server {server_id}")))?;
            server.channel_ids.iter().any(|id| {
                self.channels
                    .get(id)
                    .map(|ch| ch.name == name)
                    .unwrap_or(false)
            })
        };
        if taken {
            return Err(ChatError::Conflict(format!(
                "channel {name} already exists in this server"
            )));
        }

        let state = ChannelState::new(
            Uuid::new_v4().to_string(),
            server_id.to_string(),
            name,
            kind,
        );
        self.storage.insert_channel(&state).await?;

        let info = state.info();
        // The channel becomes visible only while the server entry is held, so a
        // concurrent delete_server either sweeps it or makes this insert fail.
        let attached = match self.servers.get_mut(server_id) {
            Some(mut srv) => {
                srv.channel_ids.insert(state.id.clone());
                self.channels.insert(state.id.clone(), state);
                true
            }
            None => false,
        };
        if !attached {
            if let Err(e) = self.storage.delete_channel(&info.id).await {
                warn!(%server_id, channel_id = %info.id, error = %e, "failed to roll back channel row");
            }
            return Err(ChatError::not_found(format!("server {server_id}")));
        }
        info!(%server_id, channel_id = %info.id, name = %info.name, "channel created");
        Ok(info)
    }

    /// Delete a channel and its messages from storage and the directory.
    pub async fn delete_channel(&self, channel_id: &str) -> ChatResult<()> {
        let server_id = self.channel_server(channel_id)?;

        self.storage.delete_channel(channel_id).await?;

        self.channels.remove(channel_id);
        if let Some(mut srv) = self.servers.get_mut(&server_id) {
            srv.channel_ids.remove(channel_id);
        }
        info!(%server_id, %channel_id, "channel deleted");
        Ok(())
    }

    /// Resolve the server that owns a channel.
    pub fn channel_server(&self, channel_id: &str) -> ChatResult<ServerId> {
        self.channels
            .get(channel_id)
            .map(|ch| ch.server_id.clone())
            .ok_or_else(|| ChatError::not_found(format!("channel {channel_id}")))
    }

    pub fn channel(&self, channel_id: &str) -> Option<ChannelInfo> {
        self.channels.get(channel_id).map(|ch| ch.info())
    }

    /// Channels of a server, sorted by name.
    pub fn list_channels(&self, server_id: &str) -> Vec<ChannelInfo> {
        let mut channels: Vec<ChannelInfo> = self
            .channels
            .iter()
            .filter(|ch| ch.server_id == server_id)
            .map(|ch| ch.info())
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        channels
    }
}

/// Channel names are lowercase without a leading '#'.
fn normalize_channel_name(name: &str) -> String {
    name.trim().trim_start_matches('#').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory_storage::MemoryStorage;
    use std::time::Duration;

    fn registry() -> MembershipRegistry {
        MembershipRegistry::new(Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_normalize_channel_name() {
        assert_eq!(normalize_channel_name("#General"), "general");
        assert_eq!(normalize_channel_name("general"), "general");
        assert_eq!(normalize_channel_name("  Rust "), "rust");
    }

    #[tokio::test]
    async fn test_owner_is_first_member() {
        let reg = registry();
        let server = reg.create_server("Test", "alice", None).await.unwrap();
        assert!(reg.is_member(&server.id, "alice"));
        assert!(!reg.is_member(&server.id, "bob"));
        assert_eq!(server.member_count, 1);
        assert_eq!(reg.owner_of(&server.id).as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_membership_mutations_are_idempotent() {
        let reg = registry();
        let server = reg.create_server("Test", "alice", None).await.unwrap();

        reg.add_member(&server.id, "bob").await.unwrap();
        reg.add_member(&server.id, "bob").await.unwrap();
        assert_eq!(reg.members(&server.id), vec!["alice", "bob"]);

        reg.remove_member(&server.id, "bob").await.unwrap();
        reg.remove_member(&server.id, "bob").await.unwrap();
        assert!(!reg.is_member(&server.id, "bob"));
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let reg = registry();
        assert!(!reg.is_member("missing", "alice"));
        assert!(reg.members("missing").is_empty());
        assert!(matches!(
            reg.add_member("missing", "alice").await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_directory() {
        let reg = registry();
        let server = reg.create_server("Test", "alice", None).await.unwrap();
        let ch = reg
            .create_channel(&server.id, "#General", ChannelKind::Text)
            .await
            .unwrap();
        assert_eq!(ch.name, "general");
        assert_eq!(reg.channel_server(&ch.id).unwrap(), server.id);

        let dup = reg
            .create_channel(&server.id, "general", ChannelKind::Voice)
            .await;
        assert!(matches!(dup, Err(ChatError::Conflict(_))));

        reg.create_channel(&server.id, "lounge", ChannelKind::Voice)
            .await
            .unwrap();
        let names: Vec<String> = reg
            .list_channels(&server.id)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["general", "lounge"]);

        reg.delete_channel(&ch.id).await.unwrap();
        assert!(matches!(
            reg.channel_server(&ch.id),
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_channel_in_missing_server() {
        let reg = registry();
        let result = reg
            .create_channel("missing", "general", ChannelKind::Text)
            .await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_server_removes_channels() {
        let reg = registry();
        let server = reg.create_server("Test", "alice", None).await.unwrap();
        let ch = reg
            .create_channel(&server.id, "general", ChannelKind::Text)
            .await
            .unwrap();

        let removed = reg.delete_server(&server.id).await.unwrap();
        assert_eq!(removed, vec![ch.id.clone()]);
        assert!(reg.channel(&ch.id).is_none());
        assert!(reg.owner_of(&server.id).is_none());
        assert!(reg.servers_for("alice").is_empty());
    }

    #[tokio::test]
    async fn test_create_channel_racing_delete_server_leaves_no_orphan() {
        let storage = Arc::new(MemoryStorage::new());
        storage.delay_channel_inserts(Duration::from_millis(50));
        let reg = Arc::new(MembershipRegistry::new(storage.clone()));
        let server = reg.create_server("Test", "alice", None).await.unwrap();

        let creating = {
            let reg = reg.clone();
            let server_id = server.id.clone();
            tokio::spawn(async move {
                reg.create_channel(&server_id, "late", ChannelKind::Text)
                    .await
            })
        };
        // Let the insert reach storage, then delete while it is still in flight.
        tokio::time::sleep(Duration::from_millis(10)).await;
        reg.delete_server(&server.id).await.unwrap();

        let result = creating.await.unwrap();
        assert!(matches!(result, Err(ChatError::NotFound(_))));
        assert!(reg.list_channels(&server.id).is_empty());
        assert!(storage.load_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_description() {
        let reg = registry();
        let plain = reg.create_server("Plain", "alice", None).await.unwrap();
        assert_eq!(plain.description, None);

        let described = reg
            .create_server("Rust", "alice", Some("  systems talk "))
            .await
            .unwrap();
        assert_eq!(described.description.as_deref(), Some("systems talk"));

        let long = "a".repeat(validation::MAX_SERVER_DESCRIPTION_LENGTH + 1);
        assert!(matches!(
            reg.create_server("Long", "alice", Some(&long)).await,
            Err(ChatError::InvalidArgument(_))
        ));

        let listed = reg.servers_for("alice");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].description.as_deref(), Some("systems talk"));
    }

    #[tokio::test]
    async fn test_load_restores_state() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let first = MembershipRegistry::new(storage.clone());
        let server = first.create_server("Test", "alice", None).await.unwrap();
        first.add_member(&server.id, "bob").await.unwrap();
        let ch = first
            .create_channel(&server.id, "general", ChannelKind::Text)
            .await
            .unwrap();

        let second = MembershipRegistry::new(storage);
        second.load().await.unwrap();
        assert!(second.is_member(&server.id, "bob"));
        assert_eq!(second.channel_server(&ch.id).unwrap(), server.id);
        assert_eq!(second.list_channels(&server.id).len(), 1);
    }
}
