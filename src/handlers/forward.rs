use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use reqwest::Url;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use crate::error::{GatewayError, Result};
use crate::key_selector::fingerprint;
use crate::metrics::{
    KEY_RATE_LIMITED, REQUEST_LATENCY, REQUEST_TOTAL, STREAM_COPY_FAILURES, UPSTREAM_ERRORS,
};
use crate::state::AppState;

const FORCED_CONTENT_TYPE: HeaderValue = HeaderValue::from_static("application/json");
const ALLOWED_METHODS: HeaderValue = HeaderValue::from_static("GET, POST, OPTIONS");

// Connection-scoped headers, never copied across the gateway
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Catch-all handler: answers CORS preflights, forwards everything else.
pub async fn forward_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    REQUEST_TOTAL.inc();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    info!(%method, %path, "received request");

    let mut response = if method == Method::OPTIONS {
        debug!(%path, "answered preflight");
        StatusCode::OK.into_response()
    } else {
        match forward(&state, req).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    GatewayError::RateLimitExhausted => warn!(%method, %path, "{e}"),
                    _ => error!(%method, %path, "{e}"),
                }
                e.into_response()
            }
        }
    };
    apply_cors(response.headers_mut(), &state.key_header);
    response
}

async fn forward(state: &AppState, req: Request) -> Result<Response> {
    let key = state.keys.select_key(&state.shutdown).await.inspect_err(|e| {
        if matches!(e, GatewayError::RateLimitExhausted) {
            KEY_RATE_LIMITED.inc();
        }
    })?;

    // selection only checked, this is where the key's quota is spent
    let limiter = state.keys.registry().get_or_create(&key.key, key.quota);
    if !limiter.allow() {
        KEY_RATE_LIMITED.inc();
        warn!(key = %fingerprint(&key.key), "rate limit exceeded for key");
        return Err(GatewayError::RateLimitExhausted);
    }

    let path = state.pool.select_path().await;
    let target = target_url(&state.domain, req.uri())?;

    let (parts, body) = req.into_parts();
    let headers = outbound_headers(&parts.headers, &state.key_header, &key.key)?;
    let mut outbound = path.client.request(parts.method, target.clone()).headers(headers);
    if carries_body(&parts.headers) {
        outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    debug!(
        via = path.kind(),
        path = %path.identity,
        target = %target,
        key = %fingerprint(&key.key),
        "forwarding request"
    );

    // dropping this future (client went away) aborts the upstream exchange
    let started = Instant::now();
    let upstream = outbound.send().await.map_err(|e| {
        UPSTREAM_ERRORS.inc();
        GatewayError::UpstreamUnreachable(e)
    })?;
    REQUEST_LATENCY.observe(started.elapsed().as_secs_f64());

    debug!(status = upstream.status().as_u16(), via = path.kind(), "upstream responded");
    Ok(stream_response(upstream, path.identity.clone()))
}

/// Upstream URL for an inbound URI: the configured domain with the inbound
/// path appended to its base path and the inbound query kept as is.
fn target_url(domain: &str, uri: &Uri) -> Result<Url> {
    let mut url = Url::parse(domain)
        .map_err(|e| GatewayError::InvalidTarget(format!("failed to parse target URL: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(GatewayError::InvalidTarget(format!("{domain} cannot be a base URL")));
    }
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}{}", uri.path()));
    url.set_query(uri.query());
    Ok(url)
}

fn outbound_headers(inbound: &HeaderMap, key_header: &HeaderName, key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 3);
    for (name, value) in inbound {
        if name == key_header || name == header::HOST || HOP_BY_HOP.contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    let key_value = HeaderValue::from_str(key)
        .map_err(|_| GatewayError::InvalidTarget("API key is not a valid header value".into()))?;
    headers.insert(key_header.clone(), key_value);
    headers.insert(header::ACCEPT, FORCED_CONTENT_TYPE);
    headers.insert(header::CONTENT_TYPE, FORCED_CONTENT_TYPE);
    Ok(headers)
}

fn carries_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

// Status and headers go out first, the body follows chunk by chunk. A failure
// after that point can only cut the body short.
fn stream_response(upstream: reqwest::Response, via: String) -> Response {
    let status = upstream.status();
    let mut headers = HeaderMap::with_capacity(upstream.headers().len());
    for (name, value) in upstream.headers() {
        if !HOP_BY_HOP.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let body = upstream.bytes_stream().inspect_err(move |e| {
        STREAM_COPY_FAILURES.inc();
        error!(via = %via, error = %e, "failed to copy response");
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn apply_cors(headers: &mut HeaderMap, key_header: &HeaderName) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS);
    let allowed = format!("Content-Type, {}", key_header.as_str());
    if let Ok(value) = HeaderValue::from_str(&allowed) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, value);
    }
}
