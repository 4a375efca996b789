use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use tokio::time::Duration;
use tracing::debug;

use crate::models::CrawlData;
use crate::proxy::Proxy;
use crate::stealth::fingerprint::Profile;

const MAX_REDIRECTS: usize = 5;

/// Build a one-shot fetch client bound to a proxy and profile. A `None`
/// proxy yields a direct-connection client.
pub fn build_client(
    proxy: Option<&Proxy>,
    profile: &Profile,
    timeout: Duration,
) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&profile.user_agent).context("Invalid user agent header")?,
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&profile.language).context("Invalid accept-language header")?,
    );

    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));

    if let Some(proxy) = proxy {
        let mut upstream = reqwest::Proxy::all(proxy.url())
            .context(format!("Invalid proxy URL: {}", proxy.url()))?;
        if let (Some(username), Some(password)) = (&proxy.username, &proxy.password) {
            upstream = upstream.basic_auth(username, password);
        }
        builder = builder.proxy(upstream);
    }

    builder.build().context("Failed to build HTTP client")
}

/// Perform a single GET and capture status, headers (first value per name)
/// and up to `max_body_bytes` of the body. Anything beyond the cap is
/// dropped silently; `body_len` and `truncated` make that observable.
pub async fn fetch(
    client: &reqwest::Client,
    url: &str,
    max_body_bytes: usize,
) -> Result<CrawlData> {
    let response = client
        .get(url)
        .send()
        .await
        .context(format!("Request failed for {}", url))?;

    let status_code = response.status().as_u16();

    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if headers.contains_key(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }

    let mut body = Vec::new();
    let mut truncated = false;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read response body")?;
        let remaining = max_body_bytes - body.len();
        if chunk.len() > remaining {
            body.extend_from_slice(&chunk[..remaining]);
            truncated = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }

    debug!(
        "Fetched {} ({}, {} bytes{})",
        url,
        status_code,
        body.len(),
        if truncated { ", truncated" } else { "" }
    );

    Ok(CrawlData {
        url: url.to_string(),
        status_code,
        headers,
        body_len: body.len(),
        truncated,
        body,
        links: vec![],
        images: vec![],
        metadata: HashMap::new(),
        timestamp: Utc::now(),
    })
}
