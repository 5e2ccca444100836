//! Gateway error types and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::domain::events::EventBusError;
use crate::domain::foundation::AuthError;

/// Errors raised while opening or driving a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Handshake credential missing or invalid. Terminal, before any
    /// subscription is made.
    #[error("Connection rejected: {0}")]
    Rejected(AuthError),

    /// The connection was closed while the operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The bus refused a registration; partial registrations were rolled back.
    #[error("Subscription failed: {0}")]
    Subscribe(#[from] EventBusError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::Rejected(AuthError::ServiceUnavailable(msg)) => {
                tracing::error!("Auth service unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "AUTH_UNAVAILABLE",
                    "Authentication service unavailable",
                )
            }
            GatewayError::Rejected(AuthError::TokenExpired) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Token expired")
            }
            GatewayError::Rejected(AuthError::MissingCredential) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "Authentication required",
            ),
            GatewayError::Rejected(_) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Invalid token")
            }
            GatewayError::ConnectionClosed => {
                (StatusCode::GONE, "CONNECTION_CLOSED", "Connection closed")
            }
            GatewayError::Subscribe(e) => {
                tracing::error!(error = %e, "Event subscription unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "EVENTS_UNAVAILABLE",
                    "Event delivery unavailable",
                )
            }
        };

        (
            status,
            Json(serde_json::json!({
                "error": message,
                "code": code
            })),
        )
            .into_response()
    }
}
