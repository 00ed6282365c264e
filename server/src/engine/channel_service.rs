use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ChatError, ChatResult};

use super::connection::{Subscriber, SubscriptionHandle};
use super::events::{
    ChannelEvent, ChannelInfo, ChannelKind, CloseReason, HistoryPage, Message, MessageId,
    ServerId, ServerInfo, UserId,
};
use super::hub::SubscriptionHub;
use super::membership::MembershipRegistry;
use super::message_store::{ChannelWriter, MessageStore};
use super::storage::{RetryPolicy, Storage};
use super::validation;

/// Request limits enforced by the service.
#[derive(Debug, Clone, Copy)]
pub struct ServiceLimits {
    pub max_message_length: usize,
    pub default_history_limit: usize,
    pub max_history_limit: usize,
}

impl Default for ServiceLimits {
    fn default() -> Self {
        Self {
            max_message_length: validation::DEFAULT_MAX_MESSAGE_LENGTH,
            default_history_limit: 50,
            max_history_limit: 200,
        }
    }
}

/// Orchestrates membership checks, durable appends and live fan-out.
/// Transport-agnostic: the gateway and the REST API both call into this.
pub struct ChannelService {
    registry: Arc<MembershipRegistry>,
    store: MessageStore,
    hub: Arc<SubscriptionHub>,
    limits: ServiceLimits,
}

impl ChannelService {
    pub fn new(
        registry: Arc<MembershipRegistry>,
        store: MessageStore,
        hub: Arc<SubscriptionHub>,
        limits: ServiceLimits,
    ) -> Self {
        Self {
            registry,
            store,
            hub,
            limits,
        }
    }

    /// Wire up a registry, message store and hub over one storage engine.
    pub fn with_storage(
        storage: Arc<dyn Storage>,
        retry: RetryPolicy,
        limits: ServiceLimits,
    ) -> Self {
        Self::new(
            Arc::new(MembershipRegistry::new(storage.clone())),
            MessageStore::new(storage, retry),
            Arc::new(SubscriptionHub::new()),
            limits,
        )
    }

    /// Load the directory from storage. Call once at startup.
    pub async fn load(&self) -> ChatResult<()> {
        self.registry.load().await
    }

    pub fn registry(&self) -> &MembershipRegistry {
        &self.registry
    }

    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    pub fn limits(&self) -> ServiceLimits {
        self.limits
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Append a message and fan it out. Fan-out failures only revoke the
    /// affected subscriptions; the message is durable once this returns Ok.
    pub async fn post_message(
        &self,
        channel_id: &str,
        author_id: &str,
        content: &str,
    ) -> ChatResult<Message> {
        let server_id = self.registry.channel_server(channel_id)?;
        self.require_member(&server_id, author_id)?;
        validation::validate_message(content, self.limits.max_message_length)?;

        let mut writer = self.locked_writer(channel_id, &server_id, author_id).await?;
        let message = writer.append(author_id, content).await?;

        let report = self.hub.publish(
            channel_id,
            ChannelEvent::MessageCreated {
                message: message.clone(),
            },
        );
        drop(writer);

        debug!(
            %channel_id,
            message_id = message.id,
            delivered = report.delivered,
            revoked = report.revoked,
            "message posted"
        );
        Ok(message)
    }

    /// Replace a message's content. Only the author may edit.
    pub async fn edit_message(
        &self,
        channel_id: &str,
        message_id: MessageId,
        editor_id: &str,
        content: &str,
    ) -> ChatResult<Message> {
        let server_id = self.registry.channel_server(channel_id)?;
        self.require_member(&server_id, editor_id)?;
        validation::validate_message(content, self.limits.max_message_length)?;

        let mut writer = self.locked_writer(channel_id, &server_id, editor_id).await?;
        let original = writer.get(message_id).await?;
        if original.author_id != editor_id {
            return Err(ChatError::denied("only the author can edit a message"));
        }

        let message = writer.edit(message_id, content).await?;
        self.hub.publish(
            channel_id,
            ChannelEvent::MessageEdited {
                message: message.clone(),
            },
        );
        drop(writer);

        debug!(%channel_id, %message_id, "message edited");
        Ok(message)
    }

    /// Delete a message. The author or the server owner may delete.
    pub async fn delete_message(
        &self,
        channel_id: &str,
        message_id: MessageId,
        actor_id: &str,
    ) -> ChatResult<()> {
        let server_id = self.registry.channel_server(channel_id)?;
        self.require_member(&server_id, actor_id)?;

        let mut writer = self.locked_writer(channel_id, &server_id, actor_id).await?;
        let original = writer.get(message_id).await?;
        let is_owner = self.registry.owner_of(&server_id).as_deref() == Some(actor_id);
        if original.author_id != actor_id && !is_owner {
            return Err(ChatError::denied(
                "only the author or the server owner can delete a message",
            ));
        }

        writer.delete(message_id).await?;
        self.hub.publish(
            channel_id,
            ChannelEvent::MessageDeleted {
                channel_id: channel_id.to_string(),
                id: message_id,
            },
        );
        drop(writer);

        info!(%channel_id, %message_id, %actor_id, "message deleted");
        Ok(())
    }

    /// History after a cursor, ascending. `limit` defaults and is clamped to the
    /// configured bounds; `has_more` tells the caller to page from the last ID.
    pub async fn list_since(
        &self,
        channel_id: &str,
        reader_id: &str,
        after: MessageId,
        limit: Option<usize>,
    ) -> ChatResult<HistoryPage> {
        let server_id = self.registry.channel_server(channel_id)?;
        self.require_member(&server_id, reader_id)?;

        let limit = limit
            .unwrap_or(self.limits.default_history_limit)
            .min(self.limits.max_history_limit);
        let mut messages = self
            .store
            .list_since(channel_id, after, limit.saturating_add(1))
            .await?;
        let has_more = messages.len() > limit;
        messages.truncate(limit);
        Ok(HistoryPage { messages, has_more })
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Subscribe a connection to a channel's live stream.
    pub fn join_channel(
        &self,
        channel_id: &str,
        user_id: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> ChatResult<SubscriptionHandle> {
        let server_id = self.registry.channel_server(channel_id)?;
        self.require_member(&server_id, user_id)?;

        let handle = self.hub.subscribe(&server_id, channel_id, subscriber)?;

        // A concurrent removal may have finished between the check and the
        // subscribe; its revocation sweep would then have missed this handle.
        if self.registry.channel(channel_id).is_none() {
            self.hub.close(handle.id, CloseReason::ChannelDeleted);
            return Err(ChatError::not_found(format!("channel {channel_id}")));
        }
        if !self.registry.is_member(&server_id, user_id) {
            self.hub.close(handle.id, CloseReason::MembershipRevoked);
            return Err(ChatError::denied("not a member of this server"));
        }

        info!(%channel_id, %user_id, subscription_id = %handle.id, "joined channel");
        Ok(handle)
    }

    /// Idempotent. Returns false if the subscription was already closed.
    pub fn leave_channel(&self, handle: &SubscriptionHandle) -> bool {
        self.hub.unsubscribe(handle)
    }

    // ── Membership ──────────────────────────────────────────────────

    /// Open join. Joining twice is a no-op.
    pub async fn join_server(&self, server_id: &str, user_id: &str) -> ChatResult<()> {
        self.registry.add_member(server_id, user_id).await
    }

    /// Remove a member and immediately close every subscription they hold on
    /// the server's channels. Returns the number of closed subscriptions.
    pub async fn remove_member_cascade(&self, server_id: &str, user_id: &str) -> ChatResult<usize> {
        self.registry.remove_member(server_id, user_id).await?;
        Ok(self.hub.revoke_member(server_id, user_id))
    }

    /// Remove `user_id` from a server. The owner may remove anyone but
    /// themself; any member may remove themself.
    pub async fn kick_member(
        &self,
        server_id: &str,
        actor_id: &str,
        user_id: &str,
    ) -> ChatResult<usize> {
        let owner_id = self.owner_of(server_id)?;
        if user_id == owner_id {
            return Err(ChatError::Conflict(
                "the server owner cannot be removed".into(),
            ));
        }
        if actor_id != owner_id && actor_id != user_id {
            return Err(ChatError::denied("only the server owner can remove members"));
        }
        self.remove_member_cascade(server_id, user_id).await
    }

    /// Member IDs, sorted. Only visible to members.
    pub fn members(&self, server_id: &str, reader_id: &str) -> ChatResult<Vec<UserId>> {
        self.owner_of(server_id)?;
        self.require_member(server_id, reader_id)?;
        Ok(self.registry.members(server_id))
    }

    // ── Directory ───────────────────────────────────────────────────

    pub async fn create_server(
        &self,
        owner_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> ChatResult<ServerInfo> {
        self.registry.create_server(name, owner_id, description).await
    }

    /// Owner only. Cascades to every channel, its messages and subscriptions.
    pub async fn delete_server(&self, actor_id: &str, server_id: &str) -> ChatResult<()> {
        self.require_owner(server_id, actor_id)?;

        let mut writers = Vec::new();
        for channel in self.registry.list_channels(server_id) {
            writers.push(self.store.writer(&channel.id).await);
        }

        let channel_ids = self.registry.delete_server(server_id).await?;
        for channel_id in &channel_ids {
            self.store.forget_channel(channel_id);
            self.hub.close_channel(channel_id, CloseReason::ChannelDeleted);
        }
        drop(writers);

        warn!(%server_id, %actor_id, channels = channel_ids.len(), "server deleted");
        Ok(())
    }

    pub fn servers_for(&self, user_id: &str) -> Vec<ServerInfo> {
        self.registry.servers_for(user_id)
    }

    /// Owner only.
    pub async fn create_channel(
        &self,
        actor_id: &str,
        server_id: &str,
        name: &str,
        kind: ChannelKind,
    ) -> ChatResult<ChannelInfo> {
        self.require_owner(server_id, actor_id)?;
        self.registry.create_channel(server_id, name, kind).await
    }

    /// Owner only. No append is in flight while the channel is removed.
    pub async fn delete_channel(&self, actor_id: &str, channel_id: &str) -> ChatResult<()> {
        let server_id = self.registry.channel_server(channel_id)?;
        self.require_owner(&server_id, actor_id)?;

        let writer = self.store.writer(channel_id).await;
        self.registry.delete_channel(channel_id).await?;
        self.store.forget_channel(channel_id);
        let closed = self.hub.close_channel(channel_id, CloseReason::ChannelDeleted);
        drop(writer);

        info!(%channel_id, %actor_id, closed, "channel deleted");
        Ok(())
    }

    /// Channels of a server, sorted by name. Only visible to members.
    pub fn list_channels(&self, server_id: &str, reader_id: &str) -> ChatResult<Vec<ChannelInfo>> {
        self.owner_of(server_id)?;
        self.require_member(server_id, reader_id)?;
        Ok(self.registry.list_channels(server_id))
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn owner_of(&self, server_id: &str) -> ChatResult<UserId> {
        self.registry
            .owner_of(server_id)
            .ok_or_else(|| ChatError::not_found(format!("server {server_id}")))
    }

    fn require_member(&self, server_id: &str, user_id: &str) -> ChatResult<()> {
        if self.registry.is_member(server_id, user_id) {
            Ok(())
        } else {
            Err(ChatError::denied("not a member of this server"))
        }
    }

    fn require_owner(&self, server_id: &str, actor_id: &str) -> ChatResult<()> {
        if self.owner_of(server_id)? == actor_id {
            Ok(())
        } else {
            Err(ChatError::denied("only the server owner can do that"))
        }
    }

    /// Take the channel's write lock, then re-check that the channel still
    /// exists and the actor is still a member. Both may change while waiting.
    async fn locked_writer(
        &self,
        channel_id: &str,
        server_id: &ServerId,
        actor_id: &str,
    ) -> ChatResult<ChannelWriter> {
        let writer = self.store.writer(channel_id).await;
        if self.registry.channel(channel_id).is_none() {
            return Err(ChatError::not_found(format!("channel {channel_id}")));
        }
        self.require_member(server_id, actor_id)?;
        Ok(writer)
    }
}
