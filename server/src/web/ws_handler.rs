use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::engine::channel_service::ChannelService;
use crate::engine::connection::{Connection, Delivery, SubscriptionHandle};
use crate::engine::events::SubscriptionId;
use crate::engine::hub::SubscriptionState;
use crate::error::ChatResult;

use super::app_state::AppState;
use super::auth_middleware::AuthUser;
use super::protocol::{ClientFrame, ServerFrame};

/// GET /ws: upgrade to the JSON gateway.
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth.user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (connection, deliveries) = Connection::new(user_id.clone(), state.outbound_queue);
    let connection_id = connection.id;
    state.presence.connect(&user_id);
    info!(%connection_id, %user_id, "gateway client connected");

    let (sink, mut stream) = socket.split();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let _ = reply_tx.send(ServerFrame::Ready {
        connection_id,
        user_id: user_id.clone(),
    });

    let write_handle = tokio::spawn(write_loop(sink, reply_rx, deliveries, connection.clone()));

    let mut session = GatewaySession::new(state.service.clone(), connection);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            incoming = stream.next() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    WsMessage::Text(text) => {
                        let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(frame) => session.handle(frame).await,
                            Err(e) => ServerFrame::bad_frame(e),
                        };
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    let closed = state.service.hub().close_connection(connection_id);
    state.presence.disconnect(&user_id);
    write_handle.abort();
    info!(%connection_id, %user_id, closed, "gateway client disconnected");
}

/// Drain replies, live deliveries and subscription closures onto the socket.
async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut replies: mpsc::UnboundedReceiver<ServerFrame>,
    mut deliveries: mpsc::Receiver<Delivery>,
    connection: Arc<Connection>,
) {
    loop {
        let frames: Vec<ServerFrame> = tokio::select! {
            reply = replies.recv() => match reply {
                Some(frame) => vec![frame],
                None => break,
            },
            delivery = deliveries.recv() => match delivery {
                Some(d) => vec![event_frame(d)],
                None => break,
            },
            _ = connection.closures_pending() => {
                // Events queued before the closure go out first.
                let mut frames: Vec<ServerFrame> = std::iter::from_fn(|| deliveries.try_recv().ok())
                    .map(event_frame)
                    .collect();
                frames.extend(connection.take_closures().into_iter().map(ServerFrame::from));
                frames
            }
        };

        for frame in frames {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "failed to encode gateway frame");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                return;
            }
        }
    }
}

fn event_frame(delivery: Delivery) -> ServerFrame {
    ServerFrame::Event {
        subscription_id: delivery.subscription_id,
        event: delivery.event.as_ref().clone(),
    }
}

/// Per-connection request handling, independent of the socket.
pub struct GatewaySession {
    service: Arc<ChannelService>,
    connection: Arc<Connection>,
    subscriptions: HashMap<SubscriptionId, SubscriptionHandle>,
}

impl GatewaySession {
    pub fn new(service: Arc<ChannelService>, connection: Arc<Connection>) -> Self {
        Self {
            service,
            connection,
            subscriptions: HashMap::new(),
        }
    }

    /// Handle one client frame and produce its reply.
    pub async fn handle(&mut self, frame: ClientFrame) -> ServerFrame {
        self.dispatch(frame).await.unwrap_or_else(|e| {
            debug!(connection_id = %self.connection.id, error = %e, "gateway request failed");
            ServerFrame::error(&e)
        })
    }

    async fn dispatch(&mut self, frame: ClientFrame) -> ChatResult<ServerFrame> {
        let user_id = self.connection.user_id.clone();
        let user_id = user_id.as_str();
        match frame {
            ClientFrame::Join { channel_id } => {
                self.prune_closed();
                let handle =
                    self.service
                        .join_channel(&channel_id, user_id, self.connection.clone())?;
                let subscription_id = handle.id;
                self.subscriptions.insert(subscription_id, handle);
                Ok(ServerFrame::Joined {
                    subscription_id,
                    channel_id,
                })
            }
            ClientFrame::Leave { subscription_id } => {
                if let Some(handle) = self.subscriptions.remove(&subscription_id) {
                    self.service.leave_channel(&handle);
                }
                Ok(ServerFrame::Left { subscription_id })
            }
            ClientFrame::Post {
                channel_id,
                content,
                nonce,
            } => {
                let message = self
                    .service
                    .post_message(&channel_id, user_id, &content)
                    .await?;
                Ok(ServerFrame::Posted { message, nonce })
            }
            ClientFrame::Edit {
                channel_id,
                message_id,
                content,
            } => {
                let message = self
                    .service
                    .edit_message(&channel_id, message_id, user_id, &content)
                    .await?;
                Ok(ServerFrame::Edited { message })
            }
            ClientFrame::Delete {
                channel_id,
                message_id,
            } => {
                self.service
                    .delete_message(&channel_id, message_id, user_id)
                    .await?;
                Ok(ServerFrame::Deleted {
                    channel_id,
                    message_id,
                })
            }
            ClientFrame::History {
                channel_id,
                after,
                limit,
            } => {
                let page = self
                    .service
                    .list_since(&channel_id, user_id, after, limit)
                    .await?;
                Ok(ServerFrame::History {
                    channel_id,
                    messages: page.messages,
                    has_more: page.has_more,
                })
            }
        }
    }

    /// Forget handles the hub has already closed (lagging, revoked, deleted).
    fn prune_closed(&mut self) {
        let hub = self.service.hub();
        self.subscriptions
            .retain(|_, handle| hub.state(handle) == SubscriptionState::Active);
    }
}
