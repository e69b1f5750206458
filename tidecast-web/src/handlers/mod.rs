//! HTTP request handlers

pub mod live;

pub use live::{LiveState, serve_live};
