use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};

use super::connection::{Subscriber, SubscriptionHandle};
use super::events::{ChannelEvent, ChannelId, CloseReason, ConnectionId, SubscriptionId};

/// Lifecycle of a subscription. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Closed,
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub revoked: usize,
}

struct Entry {
    handle: SubscriptionHandle,
    subscriber: Arc<dyn Subscriber>,
}

/// Tracks live subscriptions and fans channel events out to them.
///
/// Fan-out is best-effort: a subscriber that cannot take an event right away
/// is revoked instead of blocking the publisher. Lost events stay in the
/// message store.
#[derive(Default)]
pub struct SubscriptionHub {
    /// Active subscriptions per channel.
    channels: DashMap<ChannelId, HashMap<SubscriptionId, Arc<Entry>>>,
    /// Every active subscription by ID. Absence means `Closed`.
    by_id: DashMap<SubscriptionId, Arc<Entry>>,
    /// Active subscriptions per connection, for prompt teardown on disconnect.
    by_connection: DashMap<ConnectionId, HashSet<SubscriptionId>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a channel. Membership must already be checked.
    /// A connection may hold at most one active subscription per channel.
    pub fn subscribe(
        &self,
        server_id: &str,
        channel_id: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> ChatResult<SubscriptionHandle> {
        let connection_id = subscriber.connection_id();
        let handle = SubscriptionHandle {
            id: Uuid::new_v4(),
            channel_id: channel_id.to_string(),
            server_id: server_id.to_string(),
            user_id: subscriber.user_id().to_string(),
            connection_id,
        };

        // Lock order: by_connection, then by_id, then channels.
        let mut conn_subs = self.by_connection.entry(connection_id).or_default();
        let duplicate = conn_subs.iter().any(|id| {
            self.by_id
                .get(id)
                .map(|e| e.handle.channel_id == channel_id)
                .unwrap_or(false)
        });
        if duplicate {
            return Err(ChatError::Conflict(format!(
                "connection already subscribed to channel {channel_id}"
            )));
        }

        let entry = Arc::new(Entry {
            handle: handle.clone(),
            subscriber,
        });
        conn_subs.insert(handle.id);
        self.by_id.insert(handle.id, entry.clone());
        self.channels
            .entry(channel_id.to_string())
            .or_default()
            .insert(handle.id, entry);
        drop(conn_subs);

        debug!(subscription_id = %handle.id, %channel_id, user_id = %handle.user_id, "subscribed");
        Ok(handle)
    }

    /// Close a subscription. Idempotent: returns false if it was already closed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.close(handle.id, CloseReason::Unsubscribed)
    }

    pub fn state(&self, handle: &SubscriptionHandle) -> SubscriptionState {
        if self.by_id.contains_key(&handle.id) {
            SubscriptionState::Active
        } else {
            SubscriptionState::Closed
        }
    }

    /// Deliver an event to every active subscriber of the channel, in call order.
    /// Subscribers that fail delivery are revoked; the publisher never blocks.
    pub fn publish(&self, channel_id: &str, event: ChannelEvent) -> PublishReport {
        let event = Arc::new(event);
        let mut report = PublishReport::default();
        let mut failed = Vec::new();

        if let Some(subs) = self.channels.get(channel_id) {
            for entry in subs.values() {
                match entry.subscriber.on_message(&entry.handle, event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => failed.push((entry.handle.id, e)),
                }
            }
        }

        for (subscription_id, err) in failed {
            warn!(%subscription_id, %channel_id, error = %err, "delivery failed, revoking subscription");
            if self.close(subscription_id, err.into()) {
                report.revoked += 1;
            }
        }
        report
    }

    /// Close every subscription held by a connection.
    pub fn close_connection(&self, connection_id: ConnectionId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .by_connection
            .remove(&connection_id)
            .map(|(_, ids)| ids.into_iter().collect())
            .unwrap_or_default();
        let closed = self.close_all(ids, CloseReason::Disconnected);
        if closed > 0 {
            info!(%connection_id, closed, "closed subscriptions for connection");
        }
        closed
    }

    /// Close every subscription a user holds on channels of a server.
    pub fn revoke_member(&self, server_id: &str, user_id: &str) -> usize {
        let ids: Vec<SubscriptionId> = self
            .by_id
            .iter()
            .filter(|e| e.handle.server_id == server_id && e.handle.user_id == user_id)
            .map(|e| e.handle.id)
            .collect();
        let closed = self.close_all(ids, CloseReason::MembershipRevoked);
        if closed > 0 {
            warn!(%server_id, %user_id, closed, "revoked subscriptions after membership removal");
        }
        closed
    }

    /// Close every subscription to a channel.
    pub fn close_channel(&self, channel_id: &str, reason: CloseReason) -> usize {
        let ids: Vec<SubscriptionId> = self
            .channels
            .get(channel_id)
            .map(|subs| subs.keys().copied().collect())
            .unwrap_or_default();
        self.close_all(ids, reason)
    }

    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.channels.get(channel_id).map(|s| s.len()).unwrap_or(0)
    }

    fn close_all(&self, ids: Vec<SubscriptionId>, reason: CloseReason) -> usize {
        ids.into_iter().filter(|id| self.close(*id, reason)).count()
    }

    /// Transition a subscription to `Closed` and notify its subscriber once.
    pub fn close(&self, subscription_id: SubscriptionId, reason: CloseReason) -> bool {
        let Some((_, entry)) = self.by_id.remove(&subscription_id) else {
            return false;
        };
        let channel_id = &entry.handle.channel_id;
        let connection_id = entry.handle.connection_id;

        let channel_empty = match self.channels.get_mut(channel_id) {
            Some(mut subs) => {
                subs.remove(&subscription_id);
                subs.is_empty()
            }
            None => false,
        };
        if channel_empty {
            self.channels.remove_if(channel_id, |_, subs| subs.is_empty());
        }

        let connection_empty = match self.by_connection.get_mut(&connection_id) {
            Some(mut ids) => {
                ids.remove(&subscription_id);
                ids.is_empty()
            }
            None => false,
        };
        if connection_empty {
            self.by_connection
                .remove_if(&connection_id, |_, ids| ids.is_empty());
        }

        entry.subscriber.on_closed(&entry.handle, reason);
        debug!(%subscription_id, %channel_id, ?reason, "subscription closed");
        true
    }
}
