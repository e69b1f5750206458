//! Live stream handler
//!
//! Answers on a single route with the bytes of the live pipeline. The feed
//! is single-pass, so only the first GET receives it; later GETs get
//! `409 Conflict`. HEAD requests describe the stream without consuming it.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tidecast_core::FeedSlot;
use tracing::{debug, info, warn};

/// Shared state of the live route.
#[derive(Debug, Clone)]
pub struct LiveState {
    /// Claim-once consumer end of the live pipeline
    pub feed: FeedSlot,
    /// Request path announced to the controller
    pub route: String,
    /// Content type derived from the logical stream name
    pub content_type: HeaderValue,
}

impl LiveState {
    /// Creates state for `route`, guessing the content type from its extension.
    pub fn new(feed: FeedSlot, route: impl Into<String>) -> Self {
        let route = route.into();
        let mime = mime_guess::from_path(&route).first_or_octet_stream();
        let content_type = HeaderValue::from_str(mime.essence_str())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

        Self {
            feed,
            route,
            content_type,
        }
    }
}

/// Serves the live feed on its announced route.
///
/// Any other path is `404 Not Found` and methods other than GET and HEAD are
/// `405 Method Not Allowed`.
pub async fn serve_live(State(state): State<LiveState>, method: Method, uri: Uri) -> Response {
    if uri.path() != state.route {
        debug!(path = uri.path(), route = %state.route, "Request outside live route");
        return StatusCode::NOT_FOUND.into_response();
    }

    match method {
        Method::HEAD => stream_headers(&state, Body::empty()),
        Method::GET => match state.feed.claim() {
            Some(feed) => {
                info!(route = %state.route, "Controller started fetching live stream");
                stream_headers(&state, Body::from_stream(feed.into_stream()))
            }
            None => {
                warn!(route = %state.route, "Live stream already being served");
                (
                    StatusCode::CONFLICT,
                    "Live stream is already being served to another client",
                )
                    .into_response()
            }
        },
        _ => (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
        )
            .into_response(),
    }
}

fn stream_headers(state: &LiveState, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, state.content_type.clone()),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        body,
    )
        .into_response()
}
