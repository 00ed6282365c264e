use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use super::events::{
    ChannelEvent, ChannelId, CloseReason, ConnectionId, ServerId, SubscriptionId, UserId,
};

/// Default queued outbound events per connection (slow client protection).
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// A live subscription of one connection to one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub channel_id: ChannelId,
    pub server_id: ServerId,
    pub user_id: UserId,
    pub connection_id: ConnectionId,
}

/// Why a single delivery could not be handed off.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound buffer full")]
    Lagging,
    #[error("connection gone")]
    Gone,
}

impl From<DeliveryError> for CloseReason {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Lagging => CloseReason::Lagging,
            DeliveryError::Gone => CloseReason::Disconnected,
        }
    }
}

/// Push callbacks invoked by the subscription hub.
///
/// `on_message` must never block: it either hands the event off or fails,
/// and a failure revokes the subscription.
pub trait Subscriber: Send + Sync {
    fn connection_id(&self) -> ConnectionId;

    fn user_id(&self) -> &str;

    fn on_message(
        &self,
        subscription: &SubscriptionHandle,
        event: Arc<ChannelEvent>,
    ) -> Result<(), DeliveryError>;

    /// The subscription reached `Closed`. Called exactly once per subscription.
    fn on_closed(&self, subscription: &SubscriptionHandle, reason: CloseReason);
}

/// One event queued for a connection's write loop.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subscription_id: SubscriptionId,
    pub event: Arc<ChannelEvent>,
}

/// A subscription that was closed, reported to the connection's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSubscription {
    pub subscription_id: SubscriptionId,
    pub channel_id: ChannelId,
    pub reason: CloseReason,
}

/// A connected client session. Transport-agnostic: the gateway owns the socket
/// and drains the receiver returned by [`Connection::new`].
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    /// Bounded queue feeding the connection's write loop.
    outbound: mpsc::Sender<Delivery>,
    /// Closures are kept out of the bounded queue so they survive a full buffer.
    closed: Mutex<Vec<ClosedSubscription>>,
    closed_notify: Notify,
}

impl Connection {
    pub fn new(user_id: impl Into<UserId>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            outbound: tx,
            closed: Mutex::new(Vec::new()),
            closed_notify: Notify::new(),
        });
        (conn, rx)
    }

    /// Wait until at least one subscription closure is pending.
    pub async fn closures_pending(&self) {
        self.closed_notify.notified().await;
    }

    /// Take every closure reported since the last call.
    pub fn take_closures(&self) -> Vec<ClosedSubscription> {
        match self.closed.lock() {
            Ok(mut closed) => std::mem::take(&mut *closed),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Subscriber for Connection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn on_message(
        &self,
        subscription: &SubscriptionHandle,
        event: Arc<ChannelEvent>,
    ) -> Result<(), DeliveryError> {
        self.outbound
            .try_send(Delivery {
                subscription_id: subscription.id,
                event,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Lagging,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Gone,
            })
    }

    fn on_closed(&self, subscription: &SubscriptionHandle, reason: CloseReason) {
        let closure = ClosedSubscription {
            subscription_id: subscription.id,
            channel_id: subscription.channel_id.clone(),
            reason,
        };
        match self.closed.lock() {
            Ok(mut closed) => closed.push(closure),
            Err(poisoned) => poisoned.into_inner().push(closure),
        }
        self.closed_notify.notify_one();
    }
}
