//! HTTP/REST API layer for flowrun.
//!
//! Axum-based REST API at `/api/v1/` with an envelope response format,
//! Server-Sent Events for run event streams, and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
