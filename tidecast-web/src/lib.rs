//! Tidecast Web - HTTP origin server

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! Serves one local byte sequence over HTTP so a remote playback controller
//! can fetch it. File content supports repeated and ranged fetches; live
//! content is single-pass and answers exactly one request.

pub mod handlers;
pub mod server;

// Re-export main types
pub use server::{OriginContent, OriginServer, router};
