//! Origin server
//!
//! Binds a TCP listener before the origin address is announced, so the
//! address always carries the port that is actually listening, then serves a
//! single piece of content until cancelled.

use std::net::SocketAddr;

use axum::Router;
use tidecast_core::config::ServerConfig;
use tidecast_core::{CastError, FeedSlot, FileSource};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{LiveState, serve_live};

/// Content served by the origin.
#[derive(Debug)]
pub enum OriginContent {
    /// Regular file, answered on any path with range support
    File(FileSource),
    /// Single-pass live feed answered on one route
    Live {
        /// Consumer end of the live pipeline
        feed: FeedSlot,
        /// Path component of the announced origin address
        route: String,
    },
}

/// Builds the router for `content`.
pub fn router(content: OriginContent) -> Router {
    let app = match content {
        OriginContent::File(file) => {
            Router::new().fallback_service(ServeFile::new(file.path()))
        }
        OriginContent::Live { feed, route } => Router::new()
            .fallback(serve_live)
            .with_state(LiveState::new(feed, route)),
    };

    app.layer(TraceLayer::new_for_http())
}

/// Bound, not yet serving, origin listener.
#[derive(Debug)]
pub struct OriginServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl OriginServer {
    /// Binds the configured interface and port.
    ///
    /// # Errors
    ///
    /// - `CastError::Transport` - Address invalid or already in use
    pub async fn bind(config: &ServerConfig) -> Result<Self, CastError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| CastError::Transport {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| CastError::Transport {
            addr,
            reason: e.to_string(),
        })?;

        info!(%local_addr, "Origin server listening");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound, including an ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `content` until `cancel` fires.
    ///
    /// In-flight responses are allowed to finish once cancellation starts.
    ///
    /// # Errors
    ///
    /// - `CastError::Transport` - Accept loop failed
    pub async fn serve(
        self,
        content: OriginContent,
        cancel: CancellationToken,
    ) -> Result<(), CastError> {
        let addr = self.local_addr;
        axum::serve(self.listener, router(content))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| CastError::Transport {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;

        info!(%addr, "Origin server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use tidecast_core::spawn_live_pipeline;
    use tower::ServiceExt;

    use super::*;

    fn live_content(bytes: &'static [u8], route: &str) -> OriginContent {
        let pipeline = spawn_live_pipeline(bytes, 4, 2, CancellationToken::new());
        OriginContent::Live {
            feed: FeedSlot::new(pipeline.feed),
            route: route.to_string(),
        }
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_file_served_on_any_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"movie bytes").unwrap();
        let source = FileSource::open(file.path()).await.unwrap();
        let app = router(OriginContent::File(source));

        for uri in ["/movie.mp4", "/", "/some/other/path"] {
            let response = app.clone().oneshot(request(Method::GET, uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{uri}");
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&body[..], b"movie bytes");
        }
    }

    #[tokio::test]
    async fn test_live_route_served_once() {
        let app = router(live_content(b"0123456789", "/out.mp4"));

        let first = app
            .clone()
            .oneshot(request(Method::GET, "/out.mp4"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[header::CONTENT_TYPE], "video/mp4");
        let body = to_bytes(first.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"0123456789");

        let second = app.oneshot(request(Method::GET, "/out.mp4")).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_live_read_failure_aborts_body() {
        let reader = tokio_test::io::Builder::new()
            .read(b"abcdefgh")
            .read_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder crashed",
            ))
            .build();
        let pipeline = spawn_live_pipeline(reader, 2048, 2, CancellationToken::new());
        let app = router(OriginContent::Live {
            feed: FeedSlot::new(pipeline.feed),
            route: "/out.mp4".to_string(),
        });

        let response = app.oneshot(request(Method::GET, "/out.mp4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
        assert!(pipeline.producer.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_live_other_paths_not_found() {
        let app = router(live_content(b"abc", "/out.mp4"));

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/other.mp4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(request(Method::GET, "/out.mp4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stream_marker_route_is_root() {
        let app = router(live_content(b"abc", "/"));

        let response = app.oneshot(request(Method::GET, "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abc");
    }

    #[tokio::test]
    async fn test_bind_conflict_is_transport_error() {
        let config = ServerConfig {
            bind_host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let first = OriginServer::bind(&config).await.unwrap();

        let taken = ServerConfig {
            port: first.local_addr().port(),
            ..config
        };
        let error = OriginServer::bind(&taken).await.unwrap_err();
        assert_eq!(error.exit_code(), 4);
    }
}
