use crate::config::KeyQuota;
use crate::error::{GatewayError, Result};
use crate::rate_limit::LimiterRegistry;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Picks an API key with quota left in its current window.
///
/// Selection only checks (`is_limited`); the caller consumes quota afterwards
/// through the registry. Keys the registry has never seen count as free.
/// Each scan starts one key further than the previous one so load spreads
/// over the pool instead of draining the first key.
pub struct KeySelector {
    keys: Vec<KeyQuota>,
    registry: Arc<LimiterRegistry>,
    start: AtomicUsize,
    retry_delay: Duration,
    attempts: u32,
}

impl KeySelector {
    pub fn new(
        keys: Vec<KeyQuota>,
        registry: Arc<LimiterRegistry>,
        retry_delay: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            keys,
            registry,
            start: AtomicUsize::new(0),
            retry_delay,
            attempts: attempts.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    pub async fn select_key(&self, cancel: &CancellationToken) -> Result<KeyQuota> {
        for attempt in 1..=self.attempts {
            if let Some(key) = self.scan() {
                return Ok(key);
            }
            if attempt == self.attempts {
                break;
            }
            debug!(attempt, "all API keys limited, waiting before next scan");
            tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = sleep(self.retry_delay) => {}
            }
        }
        Err(GatewayError::RateLimitExhausted)
    }

    fn scan(&self) -> Option<KeyQuota> {
        let len = self.keys.len();
        if len == 0 {
            return None;
        }
        let start = self.start.fetch_add(1, Ordering::Relaxed) % len;
        (0..len)
            .map(|i| &self.keys[(start + i) % len])
            .find(|candidate| match self.registry.get(&candidate.key) {
                None => true,
                Some(limiter) => !limiter.is_limited(),
            })
            .cloned()
    }
}

// Short hash of an API key, what logs show instead of the key itself
pub fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn keys(list: &[(&str, u32)]) -> Vec<KeyQuota> {
        list.iter()
            .map(|(key, quota)| KeyQuota { key: key.to_string(), quota: *quota })
            .collect()
    }

    fn selector(list: &[(&str, u32)]) -> KeySelector {
        KeySelector::new(
            keys(list),
            Arc::new(LimiterRegistry::new()),
            Duration::from_millis(100),
            3,
        )
    }

    #[test]
    fn test_fingerprint_hides_key() {
        let fp = fingerprint("sk-live-123");
        assert_eq!(fp.len(), 12);
        assert_eq!(fp, fingerprint("sk-live-123"));
        assert_ne!(fp, fingerprint("sk-live-124"));
        assert!(!fp.contains("sk-live"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unused_key_is_available() {
        let selector = selector(&[("a", 1)]);
        let key = selector.select_key(&CancellationToken::new()).await.unwrap();
        assert_eq!(key.key, "a");
        // selection does not create or consume
        assert!(selector.registry().get("a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_exhausted_key() {
        let selector = selector(&[("a", 1), ("b", 1)]);
        assert!(selector.registry().get_or_create("a", 1).allow());
        for _ in 0..4 {
            let key = selector.select_key(&CancellationToken::new()).await.unwrap();
            assert_eq!(key.key, "b");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotates_start_between_free_keys() {
        let selector = selector(&[("a", 5), ("b", 5), ("c", 5)]);
        let token = CancellationToken::new();
        let mut picked = Vec::new();
        for _ in 0..3 {
            picked.push(selector.select_key(&token).await.unwrap().key);
        }
        assert_eq!(picked, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_three_attempts() {
        let selector = selector(&[("only", 1)]);
        assert!(selector.registry().get_or_create("only", 1).allow());

        let started = Instant::now();
        let err = selector.select_key(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimitExhausted));
        // three scans, two waits in between
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_when_window_rolls_during_wait() {
        let selector = KeySelector::new(
            keys(&[("only", 1)]),
            Arc::new(LimiterRegistry::new()),
            Duration::from_millis(600),
            3,
        );
        assert!(selector.registry().get_or_create("only", 1).allow());
        let key = selector.select_key(&CancellationToken::new()).await.unwrap();
        assert_eq!(key.key, "only");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_cancellable() {
        let selector = selector(&[("only", 1)]);
        assert!(selector.registry().get_or_create("only", 1).allow());

        let token = CancellationToken::new();
        token.cancel();
        let started = Instant::now();
        let err = selector.select_key(&token).await.unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
