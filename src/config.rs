use crate::error::ConfigError;
use axum::http::{HeaderName, HeaderValue};
use clap::Parser;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "key-relay")]
#[command(about = "Rate limited forwarding gateway over a pool of API keys and proxies")]
pub struct Args {
    // Path to the JSON config file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    // Logging level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    // Address the forwarding listener binds to
    #[arg(short, long, default_value = "0.0.0.0:3003")]
    pub listen: SocketAddr,

    // Optional address for /health and /metrics
    #[arg(long)]
    pub metrics_listen: Option<SocketAddr>,
}

// Config file layout, field names follow the deployed config.json files
#[derive(Deserialize, Debug, Default)]
struct RawConfig {
    #[serde(default)]
    domain: String,
    #[serde(rename = "KEY", default)]
    key: String,
    // entries keep file order, also between keys of one object
    #[serde(rename = "VALUES", default)]
    values: Vec<Map<String, Value>>,
    #[serde(rename = "DIRECT_ACCESS", default)]
    direct_access: bool,
    #[serde(rename = "DIRECT_ACCESS_TPS", default)]
    direct_access_tps: i64,
    #[serde(rename = "PROXY_TPS", default)]
    proxy_tps: i64,
    #[serde(rename = "PROXIES", default)]
    proxies: Vec<String>,
    // legacy, the scheme of each proxy URL decides the proxy type
    #[serde(rename = "PROXY_TYPE", default)]
    #[allow(dead_code)]
    proxy_type: Option<String>,
}

/// One API key and its per-second quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyQuota {
    pub key: String,
    pub quota: u32,
}

/// Finalized, validated configuration consumed by the dispatch engine.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub domain: String,
    pub key_header: HeaderName,
    pub key_quotas: Vec<KeyQuota>,
    pub direct_access: Option<u32>,
    pub proxy_quota: u32,
    pub proxies: Vec<String>,
    pub tuning: DispatchTuning,
}

/// Retry and timeout knobs of the dispatch engine.
#[derive(Debug, Clone, Copy)]
pub struct DispatchTuning {
    pub key_retry_delay: Duration,
    pub key_attempts: u32,
    pub path_fallback_delay: Duration,
    pub connect_timeout: Duration,
    pub tcp_keepalive: Duration,
    pub pool_idle_timeout: Duration,
    pub direct_request_timeout: Duration,
}

impl Default for DispatchTuning {
    fn default() -> Self {
        Self {
            key_retry_delay: Duration::from_millis(100),
            key_attempts: 3,
            path_fallback_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(30),
            tcp_keepalive: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            direct_request_timeout: Duration::from_secs(30),
        }
    }
}

pub fn load_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let data = std::fs::read_to_string(path)?;
    parse_config(&data)
}

pub fn parse_config(data: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = serde_json::from_str(data)?;
    validate(raw)
}

fn validate(raw: RawConfig) -> Result<GatewayConfig, ConfigError> {
    if raw.domain.trim().is_empty() {
        return Err(ConfigError::Invalid("domain is required".into()));
    }
    if raw.key.trim().is_empty() {
        return Err(ConfigError::Invalid("KEY is required".into()));
    }
    let key_header = HeaderName::from_bytes(raw.key.trim().as_bytes())
        .map_err(|e| ConfigError::Invalid(format!("KEY is not a valid header name: {e}")))?;

    let mut seen = HashSet::new();
    let mut key_quotas = Vec::new();
    for (key, quota) in raw.values.into_iter().flatten() {
        let quota = quota
            .as_i64()
            .and_then(positive_quota)
            .ok_or_else(|| ConfigError::Invalid(format!("quota for key #{} must be positive", key_quotas.len() + 1)))?;
        if !seen.insert(key.clone()) {
            return Err(ConfigError::Invalid(format!(
                "API key #{} is listed more than once",
                key_quotas.len() + 1
            )));
        }
        if HeaderValue::from_str(&key).is_err() {
            return Err(ConfigError::Invalid(format!(
                "API key #{} is not a valid header value",
                key_quotas.len() + 1
            )));
        }
        key_quotas.push(KeyQuota { key, quota });
    }
    if key_quotas.is_empty() {
        return Err(ConfigError::Invalid(
            "VALUES is required and must not be empty".into(),
        ));
    }

    let direct_access = if raw.direct_access {
        let quota = positive_quota(raw.direct_access_tps).ok_or_else(|| {
            ConfigError::Invalid("DIRECT_ACCESS_TPS must be positive when DIRECT_ACCESS is true".into())
        })?;
        Some(quota)
    } else {
        None
    };

    let proxy_quota = if raw.proxies.is_empty() {
        0
    } else {
        u32::try_from(raw.proxy_tps)
            .map_err(|_| ConfigError::Invalid("PROXY_TPS cannot be negative".into()))?
    };

    Ok(GatewayConfig {
        domain: raw.domain.trim().to_string(),
        key_header,
        key_quotas,
        direct_access,
        proxy_quota,
        proxies: raw.proxies,
        tuning: DispatchTuning::default(),
    })
}

fn positive_quota(value: i64) -> Option<u32> {
    u32::try_from(value).ok().filter(|q| *q > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"{
        "domain": "https://api.example.com",
        "PROXY_TYPE": "socks5",
        "KEY": "X-Api-Key",
        "VALUES": [{"key-one": 5}, {"key-two": 2}],
        "DIRECT_ACCESS": true,
        "DIRECT_ACCESS_TPS": 10,
        "PROXY_TPS": 3,
        "PROXIES": ["socks5://127.0.0.1:1080", "http://user:pw@10.0.0.1:8080"]
    }"#;

    #[test]
    fn test_parse_full_config() {
        let cfg = parse_config(FULL).unwrap();
        assert_eq!(cfg.domain, "https://api.example.com");
        assert_eq!(cfg.key_header.as_str(), "x-api-key");
        assert_eq!(
            cfg.key_quotas,
            vec![
                KeyQuota { key: "key-one".into(), quota: 5 },
                KeyQuota { key: "key-two".into(), quota: 2 },
            ]
        );
        assert_eq!(cfg.direct_access, Some(10));
        assert_eq!(cfg.proxy_quota, 3);
        assert_eq!(cfg.proxies.len(), 2);
    }

    #[test]
    fn test_values_keep_file_order() {
        let cfg = parse_config(
            r#"{"domain": "http://x", "KEY": "X-Api-Key",
                "VALUES": [{"zeta": 1, "alpha": 2}, {"mid": 3}]}"#,
        )
        .unwrap();
        let order: Vec<_> = cfg.key_quotas.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(order, vec!["zeta", "alpha", "mid"]);
        assert_eq!(cfg.key_quotas[1].quota, 2);
    }

    #[test]
    fn test_non_integer_quota() {
        let err = parse_config(
            r#"{"domain": "http://x", "KEY": "X-Api-Key", "VALUES": [{"k": "five"}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }

    #[test]
    fn test_missing_domain() {
        let err = parse_config(r#"{"KEY": "X-Api-Key", "VALUES": [{"k": 1}]}"#).unwrap_err();
        assert!(err.to_string().contains("domain is required"));
    }

    #[test]
    fn test_missing_key_header() {
        let err = parse_config(r#"{"domain": "http://x", "VALUES": [{"k": 1}]}"#).unwrap_err();
        assert!(err.to_string().contains("KEY is required"));
    }

    #[test]
    fn test_empty_values() {
        let err =
            parse_config(r#"{"domain": "http://x", "KEY": "X-Api-Key", "VALUES": []}"#).unwrap_err();
        assert!(err.to_string().contains("VALUES"));
    }

    #[test]
    fn test_non_positive_key_quota() {
        let err = parse_config(r#"{"domain": "http://x", "KEY": "X-Api-Key", "VALUES": [{"k": 0}]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = parse_config(
            r#"{"domain": "http://x", "KEY": "X-Api-Key", "VALUES": [{"k": 1}, {"k": 2}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_key_must_fit_in_header() {
        let err = parse_config(
            r#"{"domain": "http://x", "KEY": "X-Api-Key", "VALUES": [{"bad\nkey": 1}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("header value"));
    }

    #[test]
    fn test_direct_access_requires_quota() {
        let err = parse_config(
            r#"{"domain": "http://x", "KEY": "X-Api-Key", "VALUES": [{"k": 1}], "DIRECT_ACCESS": true}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("DIRECT_ACCESS_TPS"));
    }

    #[test]
    fn test_negative_proxy_quota() {
        let err = parse_config(
            r#"{"domain": "http://x", "KEY": "X-Api-Key", "VALUES": [{"k": 1}],
                "PROXY_TPS": -1, "PROXIES": ["http://p:1"]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("PROXY_TPS"));
    }

    #[test]
    fn test_zero_proxy_quota_allowed() {
        let cfg = parse_config(
            r#"{"domain": "http://x", "KEY": "X-Api-Key", "VALUES": [{"k": 1}],
                "PROXY_TPS": 0, "PROXIES": ["http://p:1"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.proxy_quota, 0);
        assert_eq!(cfg.direct_access, None);
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let cfg = load_from_path(file.path()).unwrap();
        assert_eq!(cfg.key_quotas.len(), 2);

        let err = load_from_path(Path::new("/nonexistent/key-relay.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(parse_config("{not json"), Err(ConfigError::Parse(_))));
    }
}
