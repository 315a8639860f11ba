//! Pieces shared by every route module: auth guard, CSRF, ownership
//! resolution, cookie helpers and request tracing hooks.

pub mod csrf;
pub mod middleware;
pub mod ownership;
pub mod request_tracing;
pub mod utils;

use serde::Serialize;

/// Body for operations that have nothing else to return.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
