//! HTTP API Module
//!
//! Provides a REST API for node status and singleton value reads.

mod http;

pub use http::{AppState, HttpServer};
