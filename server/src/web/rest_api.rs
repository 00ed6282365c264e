use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::engine::events::{ChannelKind, MemberInfo, MessageId};
use crate::error::ChatError;

use super::app_state::AppState;
use super::auth_middleware::AuthUser;

/// A `ChatError` rendered as an HTTP response.
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

pub fn status_for(err: &ChatError) -> StatusCode {
    match err {
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        ChatError::Conflict(_) => StatusCode::CONFLICT,
        ChatError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "online_users": state.presence.online_count(),
    }))
}

// ── Servers ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// GET /api/servers: servers the caller belongs to.
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> impl IntoResponse {
    Json(state.service.servers_for(&auth.user_id))
}

/// POST /api/servers: create a server owned by the caller.
pub async fn create_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateServerRequest>,
) -> ApiResult<impl IntoResponse> {
    let server = state
        .service
        .create_server(&auth.user_id, &body.name, body.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(server)))
}

/// DELETE /api/servers/:id: owner only.
pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .service
        .delete_server(&auth.user_id, &server_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/servers/:id/members: members with online/offline presence.
pub async fn list_server_members(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
) -> ApiResult<Json<Vec<MemberInfo>>> {
    let members = state
        .service
        .members(&server_id, &auth.user_id)?
        .into_iter()
        .map(|user_id| MemberInfo {
            online: state.presence.is_online(&user_id),
            user_id,
        })
        .collect();
    Ok(Json(members))
}

/// PUT /api/servers/:id/members/:user_id: join (self) or add (owner).
pub async fn add_server_member(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((server_id, user_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if auth.user_id != user_id {
        let owner = state
            .service
            .registry()
            .owner_of(&server_id)
            .ok_or_else(|| ChatError::not_found(format!("server {server_id}")))?;
        if owner != auth.user_id {
            return Err(ChatError::denied("only the server owner can add other users").into());
        }
    }
    state.service.join_server(&server_id, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/servers/:id/members/:user_id: leave (self) or kick (owner).
pub async fn remove_server_member(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((server_id, user_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .service
        .kick_member(&server_id, &auth.user_id, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Channels ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub kind: ChannelKind,
}

/// GET /api/servers/:id/channels
pub async fn list_server_channels(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let channels = state.service.list_channels(&server_id, &auth.user_id)?;
    Ok(Json(channels))
}

/// POST /api/servers/:id/channels: owner only.
pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(server_id): Path<String>,
    Json(body): Json<CreateChannelRequest>,
) -> ApiResult<impl IntoResponse> {
    let channel = state
        .service
        .create_channel(&auth.user_id, &server_id, &body.name, body.kind)
        .await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

/// DELETE /api/channels/:id: owner only.
pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(channel_id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .service
        .delete_channel(&auth.user_id, &channel_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Messages ────────────────────────────────────────────

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub after: MessageId,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct MessageBody {
    pub content: String,
}

/// GET /api/channels/:id/messages?after=&limit=: ascending history after a cursor.
pub async fn get_channel_history(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(channel_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<impl IntoResponse> {
    let page = state
        .service
        .list_since(&channel_id, &auth.user_id, params.after, params.limit)
        .await?;
    Ok(Json(page))
}

/// POST /api/channels/:id/messages
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(channel_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .service
        .post_message(&channel_id, &auth.user_id, &body.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// PATCH /api/channels/:id/messages/:message_id: author only.
pub async fn edit_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((channel_id, message_id)): Path<(String, MessageId)>,
    Json(body): Json<MessageBody>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .service
        .edit_message(&channel_id, message_id, &auth.user_id, &body.content)
        .await?;
    Ok(Json(message))
}

/// DELETE /api/channels/:id/messages/:message_id: author or server owner.
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((channel_id, message_id)): Path<(String, MessageId)>,
) -> ApiResult<StatusCode> {
    state
        .service
        .delete_message(&channel_id, message_id, &auth.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&ChatError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&ChatError::denied("x")), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&ChatError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&ChatError::Unavailable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ChatError::InvalidArgument("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ChatError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
