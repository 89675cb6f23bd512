//! Optional HTTP API: state snapshot and input injection.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rumba_core::Controller;
use rumba_proto::ActionId;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct InputQuery {
    /// JSON-encoded action argument.
    value: Option<String>,
}

fn router(ctl: Arc<Controller>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/input/:action", get(post_input).post(post_input))
        .layer(CorsLayer::permissive())
        .with_state(ctl)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    ctl: Arc<Controller>,
) -> tokio::task::JoinHandle<()> {
    let token = ctl.cancellation_token();
    let app = router(ctl);

    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        info!("HTTP API listening on http://{}", addr);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to bind HTTP API on {}: {}", addr, e);
                return;
            }
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            warn!("HTTP API error: {}", e);
        }
    })
}

async fn get_state(State(ctl): State<Arc<Controller>>) -> Response {
    Json(ctl.snapshot().await).into_response()
}

async fn post_input(
    State(ctl): State<Arc<Controller>>,
    Path(action): Path<String>,
    Query(query): Query<InputQuery>,
) -> Response {
    if let Err(e) = ActionId::parse(&action) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    let value = match query.value.as_deref().map(serde_json::from_str::<serde_json::Value>) {
        None => None,
        Some(Ok(v)) => Some(v),
        Some(Err(e)) => {
            return (StatusCode::BAD_REQUEST, format!("value is not JSON: {}", e)).into_response()
        }
    };
    if ctl.is_closed() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ctl.on_input(&action, value).await;
    StatusCode::NO_CONTENT.into_response()
}
