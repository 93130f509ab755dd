//! HTTP routes
//!
//! `GET /stream` subscribes a new client and streams its MP4 bytes as a
//! chunked response. Anything else is a 404, HEAD included, since axum would
//! otherwise answer HEAD with the GET handler and admit a client.

use std::io;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{stream, StreamExt};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::registry::ClientRegistry;

/// Size of the first read from a new subscription
const FIRST_CHUNK_SIZE: usize = 64 * 1024;

const NOT_FOUND_BODY: &str = "<h1>404 Not found</h1>";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: ClientRegistry,
}

/// Build the router
pub fn router(registry: ClientRegistry) -> Router {
    Router::new()
        .route(
            "/stream",
            get(stream_handler).head(not_found).fallback(not_found),
        )
        .fallback(not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(AppState { registry })
}

async fn log_request(request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".into());
    tracing::info!(
        method = %request.method(),
        peer = %peer,
        path = %request.uri().path(),
        "Serving request"
    );
    next.run(request).await
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, axum::response::Html(NOT_FOUND_BODY)).into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::response::Html("<h1>500 Internal server error</h1>"),
    )
        .into_response()
}

async fn stream_handler(State(state): State<AppState>) -> Response {
    let mut subscription = match state.registry.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to subscribe");
            return internal_error();
        }
    };
    let client_id = subscription.id();

    // Hold the status line until the container actually starts
    let mut first = vec![0u8; FIRST_CHUNK_SIZE];
    let n = match subscription.read(&mut first).await {
        Ok(0) => {
            tracing::warn!(client_id = client_id, "Stream ended before any data");
            return internal_error();
        }
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(client_id = client_id, error = %e, "Failed to read stream");
            return internal_error();
        }
    };
    first.truncate(n);

    tracing::debug!(client_id = client_id, "Streaming to client");

    let head = stream::once(async move { Ok::<_, io::Error>(Bytes::from(first)) });
    let body = Body::from_stream(head.chain(ReaderStream::new(subscription)));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "video/mp4"),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        ],
        body,
    )
        .into_response()
}
