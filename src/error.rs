use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

// Errors raised while reading or validating the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failures of the dispatch engine.
///
/// The first variant is fatal at startup, the others are scoped to a single
/// inbound request and never touch other requests.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("no outbound path available (neither direct access nor a working proxy)")]
    NoOutboundPathAvailable,

    #[error("all API keys are currently rate limited")]
    RateLimitExhausted,

    #[error("gateway is shutting down, gave up waiting for an API key")]
    Cancelled,

    #[error("failed to forward request: {0}")]
    UpstreamUnreachable(#[source] reqwest::Error),

    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NoOutboundPathAvailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RateLimitExhausted => StatusCode::TOO_MANY_REQUESTS,
            // shutdown began while the request waited for a key
            GatewayError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidTarget(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            GatewayError::NoOutboundPathAvailable => "No available clients",
            GatewayError::RateLimitExhausted => "Rate limit exceeded",
            GatewayError::Cancelled => "Gateway shutting down",
            GatewayError::UpstreamUnreachable(_) => "Failed to forward request",
            GatewayError::InvalidTarget(_) => "Internal Server Error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(GatewayError::RateLimitExhausted.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            GatewayError::InvalidTarget("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::NoOutboundPathAvailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_shutdown_during_key_wait_is_unavailable() {
        let resp = GatewayError::Cancelled.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Gateway shutting down");
    }

    #[test]
    fn test_into_response_keeps_status() {
        let resp = GatewayError::RateLimitExhausted.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
