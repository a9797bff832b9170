//! HTTP API Module
//!
//! Coordination server exposing lock records over REST.

mod http;

pub use http::{AppState, HttpServer};
