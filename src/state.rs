use axum::http::HeaderName;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::key_selector::KeySelector;
use crate::load_balancer::OutboundPool;
use crate::rate_limit::LimiterRegistry;
// app's shared state, built once at startup and shared by every request

pub struct AppState {
    pub domain: String,
    pub key_header: HeaderName,
    pub keys: KeySelector,
    pub pool: OutboundPool,
    pub shutdown: CancellationToken, // cancels pending key waits on shutdown
}

impl AppState {
    pub fn new(cfg: &GatewayConfig, pool: OutboundPool, shutdown: CancellationToken) -> Self {
        let keys = KeySelector::new(
            cfg.key_quotas.clone(),
            Arc::new(LimiterRegistry::new()),
            cfg.tuning.key_retry_delay,
            cfg.tuning.key_attempts,
        );
        Self {
            domain: cfg.domain.clone(),
            key_header: cfg.key_header.clone(),
            keys,
            pool,
            shutdown,
        }
    }

    // Fails when no outbound path could be built
    pub fn from_config(cfg: &GatewayConfig, shutdown: CancellationToken) -> Result<Self> {
        let pool = OutboundPool::from_config(cfg)?;
        Ok(Self::new(cfg, pool, shutdown))
    }
}
