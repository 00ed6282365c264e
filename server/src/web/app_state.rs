use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::engine::channel_service::ChannelService;
use crate::engine::presence::PresenceTracker;

/// Shared state handed to every HTTP and WebSocket handler.
pub struct AppState {
    pub service: Arc<ChannelService>,
    pub presence: Arc<PresenceTracker>,
    /// Per-connection outbound buffer, in events.
    pub outbound_queue: usize,
    /// Cancelled on shutdown; every gateway connection watches it.
    pub shutdown: CancellationToken,
}
