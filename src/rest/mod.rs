// rest/mod.rs — Public REST API server.
//
// Axum HTTP server, local only by default. Every endpoint except /health
// requires `Authorization: Bearer <api-key>`.
//
// Endpoints:
//   GET  /health
//   GET  POST /functions
//   GET  POST DELETE /functions/{id}
//   POST /functions/{id}/test
//   GET  POST /triggers
//   GET  POST DELETE /triggers/{id}
//   GET  /triggers/queue
//   POST /triggers/queue/process
//   GET  /triggers/log
//   POST /events

pub mod auth;
pub mod routes;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(routes::health::health))
        // Functions
        .route(
            "/functions",
            get(routes::functions::list_functions).post(routes::functions::create_function),
        )
        .route(
            "/functions/{id}",
            get(routes::functions::get_function)
                .post(routes::functions::update_function)
                .delete(routes::functions::delete_function),
        )
        .route("/functions/{id}/test", post(routes::functions::test_function))
        // Triggers
        .route(
            "/triggers",
            get(routes::triggers::list_triggers).post(routes::triggers::create_trigger),
        )
        .route("/triggers/queue", get(routes::triggers::list_queue))
        .route(
            "/triggers/queue/process",
            post(routes::triggers::process_queue),
        )
        .route("/triggers/log", get(routes::triggers::list_log))
        .route(
            "/triggers/{id}",
            get(routes::triggers::get_trigger)
                .post(routes::triggers::update_trigger)
                .delete(routes::triggers::delete_trigger),
        )
        // Events (collaborator boundary, e.g. the transaction sync service)
        .route("/events", post(routes::events::post_event))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
