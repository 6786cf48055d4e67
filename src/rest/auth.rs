// rest/auth.rs — Bearer API-key authentication.
//
// Keys are resolved against the stored SHA-256 hashes; the extractor yields
// the owning user, so every handler is user-scoped by construction.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::storage::UserRow;
use crate::AppContext;

pub struct AuthedUser(pub UserRow);

impl FromRequestParts<Arc<AppContext>> for AuthedUser {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .filter(|k| !k.is_empty())
            .ok_or_else(unauthorized)?;

        match ctx.storage.user_by_api_key(key).await {
            Ok(Some(user)) => Ok(AuthedUser(user)),
            Ok(None) => Err(unauthorized()),
            Err(e) => Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )),
        }
    }
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "missing or invalid API key" })),
    )
}
