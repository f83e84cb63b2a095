use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::PATH_FALLBACKS;
use crate::rate_limit::FixedWindowLimiter;
use crate::transport;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

pub const DIRECT_IDENTITY: &str = "direct";

// One way of reaching the upstream: direct or through a proxy

pub struct OutboundPath {
    pub identity: String,
    pub is_direct: bool,
    pub client: reqwest::Client,
    limiter: FixedWindowLimiter,
}

impl OutboundPath {
    pub fn new(identity: String, is_direct: bool, client: reqwest::Client, quota: u32) -> Self {
        Self {
            identity,
            is_direct,
            client,
            limiter: FixedWindowLimiter::new(quota),
        }
    }

    pub fn limiter(&self) -> &FixedWindowLimiter {
        &self.limiter
    }

    pub fn kind(&self) -> &'static str {
        if self.is_direct { "direct" } else { "proxy" }
    }
}

// Outbound pool with a shared round-robin cursor

pub struct OutboundPool {
    paths: Vec<Arc<OutboundPath>>,
    // index the next scan starts from
    cursor: AtomicUsize,
    fallback_delay: Duration,
}

impl OutboundPool {
    pub fn new(paths: Vec<OutboundPath>, fallback_delay: Duration) -> Result<Self> {
        if paths.is_empty() {
            return Err(GatewayError::NoOutboundPathAvailable);
        }
        Ok(Self {
            paths: paths.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
            fallback_delay,
        })
    }

    /// Direct path first (when enabled), then one path per proxy that could be
    /// built. Broken proxies are logged and left out for the process lifetime.
    pub fn from_config(cfg: &GatewayConfig) -> Result<Self> {
        let mut paths = Vec::with_capacity(cfg.proxies.len() + 1);

        if let Some(quota) = cfg.direct_access {
            match transport::direct_client(&cfg.tuning) {
                Ok(client) => {
                    paths.push(OutboundPath::new(DIRECT_IDENTITY.to_string(), true, client, quota));
                    info!(quota, "added direct access path");
                }
                Err(e) => error!(error = %e, "failed to build direct access client"),
            }
        }

        for proxy_url in &cfg.proxies {
            let identity = unique_identity(&paths, transport::redact(proxy_url));
            match transport::proxy_client(proxy_url, &cfg.tuning) {
                Ok(client) => {
                    info!(proxy = %identity, quota = cfg.proxy_quota, "added proxy path");
                    paths.push(OutboundPath::new(identity, false, client, cfg.proxy_quota));
                }
                Err(e) => error!(proxy = %identity, error = %e, "failed to create proxy client, skipping"),
            }
        }

        let pool = Self::new(paths, cfg.tuning.path_fallback_delay)?;
        info!("outbound pool initialized with {} paths", pool.len());
        for (i, p) in pool.paths.iter().enumerate() {
            info!("  [{}] {} ({})", i + 1, p.identity, p.kind());
        }
        Ok(pool)
    }

    /// Round robin with skip.
    ///
    /// Scans at most one full turn from the cursor and takes the first path
    /// whose limiter allows (consuming its quota). When every path is over
    /// quota it waits `fallback_delay` and hands out the path at the cursor
    /// anyway: path limits throttle, they never reject.
    pub async fn select_path(&self) -> Arc<OutboundPath> {
        let len = self.paths.len();
        let start = self.cursor.load(Ordering::Relaxed) % len;

        for i in 0..len {
            let idx = (start + i) % len;
            let path = &self.paths[idx];
            if path.limiter.allow() {
                self.cursor.store((idx + 1) % len, Ordering::Relaxed);
                return Arc::clone(path);
            }
        }

        sleep(self.fallback_delay).await;
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        let path = &self.paths[idx];
        PATH_FALLBACKS.inc();
        warn!(path = %path.identity, "all outbound paths rate limited, forwarding anyway");
        Arc::clone(path)
    }

    pub fn paths(&self) -> &[Arc<OutboundPath>] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

// Redacted URLs of proxies that differ only in credentials collide, the
// later one gets its pool position appended
fn unique_identity(paths: &[OutboundPath], identity: String) -> String {
    let taken = |candidate: &str| paths.iter().any(|p| p.identity == candidate);
    if !taken(&identity) {
        return identity;
    }
    let mut n = paths.len();
    loop {
        let candidate = format!("{identity}#{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
