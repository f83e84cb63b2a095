//! Forwarding gateway that spreads inbound HTTP traffic over a pool of API
//! keys and a pool of outbound paths (direct or proxied), each rate limited
//! with its own fixed one-second window.

pub mod config;
pub mod error;
pub mod handlers;
pub mod key_selector;
pub mod load_balancer;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod state;
pub mod transport;

pub use config::{GatewayConfig, KeyQuota};
pub use error::{ConfigError, GatewayError};
pub use state::AppState;
