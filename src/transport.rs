use crate::config::DispatchTuning;
use reqwest::{Client, Proxy, Url};
use thiserror::Error;

const PROXY_SCHEMES: [&str; 4] = ["socks5", "socks5h", "http", "https"];

#[derive(Error, Debug)]
pub enum ProxySetupError {
    #[error("invalid proxy URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported proxy scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("failed to build proxy client: {0}")]
    Build(#[from] reqwest::Error),
}

// Client for the direct path, environment proxies are ignored
pub fn direct_client(tuning: &DispatchTuning) -> Result<Client, reqwest::Error> {
    Client::builder()
        .no_proxy()
        .connect_timeout(tuning.connect_timeout)
        .tcp_keepalive(tuning.tcp_keepalive)
        .pool_idle_timeout(tuning.pool_idle_timeout)
        .timeout(tuning.direct_request_timeout)
        .build()
}

/// Build a client that tunnels every request through `proxy_url`.
///
/// `socks5`/`socks5h` go through SOCKS, `http`/`https` through CONNECT.
/// Credentials embedded in the URL are used for proxy auth.
pub fn proxy_client(proxy_url: &str, tuning: &DispatchTuning) -> Result<Client, ProxySetupError> {
    let url = Url::parse(proxy_url).map_err(|e| ProxySetupError::InvalidUrl(e.to_string()))?;
    if !PROXY_SCHEMES.contains(&url.scheme()) {
        return Err(ProxySetupError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none() {
        return Err(ProxySetupError::InvalidUrl(format!("{} has no host", redact(proxy_url))));
    }

    let client = Client::builder()
        .proxy(Proxy::all(url)?)
        .connect_timeout(tuning.connect_timeout)
        .tcp_keepalive(tuning.tcp_keepalive)
        .pool_idle_timeout(tuning.pool_idle_timeout)
        .build()?;
    Ok(client)
}

// Proxy URL without userinfo, safe for logs and limiter identities
pub fn redact(proxy_url: &str) -> String {
    match Url::parse(proxy_url) {
        Ok(mut url) => {
            if !url.username().is_empty() || url.password().is_some() {
                let _ = url.set_username("");
                let _ = url.set_password(None);
            }
            url.to_string()
        }
        Err(_) => proxy_url.to_string(),
    }
}
