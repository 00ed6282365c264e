use std::sync::Arc;

use axum::extract::{FromRequestParts, Query};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::app_state::AppState;

/// Header set by the fronting identity provider.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Maximum accepted user ID length.
const MAX_USER_ID_LENGTH: usize = 128;

#[derive(Deserialize)]
struct IdentityQuery {
    user_id: Option<String>,
}

/// Authenticated caller. The identity provider in front of this service has
/// already verified credentials and passes the user ID through; browsers that
/// cannot set headers on a WebSocket upgrade use the `user_id` query parameter.
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let user_id = match from_header {
            Some(id) => Some(id),
            None => Query::<IdentityQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|q| q.0.user_id),
        };

        match user_id.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() && id.len() <= MAX_USER_ID_LENGTH => {
                Ok(AuthUser { user_id: id })
            }
            _ => Err((StatusCode::UNAUTHORIZED, "Not authenticated").into_response()),
        }
    }
}
