// rest/routes/events.rs — The event feed collaborators post into.
//
// The transaction-sync service (or anything else at the boundary) fires
// `{event, payload}` here; matching triggers fan out to the queue.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::engine_error;
use crate::engine::matcher;
use crate::rest::auth::AuthedUser;
use crate::AppContext;

#[derive(Deserialize)]
pub struct PostEventRequest {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

pub async fn post_event(
    State(ctx): State<Arc<AppContext>>,
    AuthedUser(user): AuthedUser,
    Json(body): Json<PostEventRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let queued = matcher::match_event(&ctx.storage, &user.id, &body.event, &body.payload)
        .await
        .map_err(engine_error)?;
    Ok(Json(json!({ "queued": queued.len() })))
}
