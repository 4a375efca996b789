use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PoolSettings, ProxySettings};
use crate::error::ProxyError;
use crate::models::ProxyInfo;

/// A proxy is skipped once its consecutive-fail count reaches this value,
/// even if a probe has not yet flipped the healthy flag.
const MAX_FAIL_COUNT: u32 = 5;

/// Timeout applied to each health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// One upstream proxy. Health state is owned by the health checker and
/// serialized under the per-proxy lock; identity fields are immutable.
#[derive(Debug)]
pub struct Proxy {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub pool_type: String,
    pub country: Option<String>,
    pub provider: String,
    state: Mutex<ProxyState>,
}

#[derive(Debug, Clone)]
struct ProxyState {
    healthy: bool,
    fail_count: u32,
    last_used: Option<Instant>,
}

impl Proxy {
    /// Usable means a worker may route a request through this proxy.
    pub fn usable(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.healthy && state.fail_count < MAX_FAIL_COUNT
    }

    pub fn healthy(&self) -> bool {
        self.state.lock().unwrap().healthy
    }

    pub fn fail_count(&self) -> u32 {
        self.state.lock().unwrap().fail_count
    }

    pub fn last_used(&self) -> Option<Instant> {
        self.state.lock().unwrap().last_used
    }

    /// Record the outcome of a health probe. Success resets the fail
    /// counter; failure increments it and marks the proxy unhealthy.
    pub fn record_probe(&self, success: bool) {
        let mut state = self.state.lock().unwrap();
        if success {
            state.healthy = true;
            state.fail_count = 0;
        } else {
            state.healthy = false;
            state.fail_count += 1;
        }
    }

    fn mark_used(&self) {
        self.state.lock().unwrap().last_used = Some(Instant::now());
    }

    /// Proxy URL for the HTTP client; credentials are applied separately.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn info(&self) -> ProxyInfo {
        let state = self.state.lock().unwrap();
        ProxyInfo {
            id: self.id.clone(),
            host: self.host.clone(),
            port: self.port,
            pool_type: self.pool_type.clone(),
            country: self.country.clone(),
            provider: self.provider.clone(),
            healthy: state.healthy,
            fail_count: state.fail_count,
        }
    }

    #[cfg(test)]
    fn set_state(&self, healthy: bool, fail_count: u32) {
        let mut state = self.state.lock().unwrap();
        state.healthy = healthy;
        state.fail_count = fail_count;
    }
}

/// A named, ordered pool of proxies with a shared rotation cursor.
pub struct Pool {
    pub name: String,
    pub pool_type: String,
    proxies: Vec<Arc<Proxy>>,
    cursor: Mutex<usize>,
}

impl Pool {
    /// Round-robin selection of the next usable proxy. The cursor only
    /// advances when a proxy is handed out, so a fully unhealthy pool
    /// leaves it where it started.
    fn next_usable(&self) -> std::result::Result<Arc<Proxy>, ProxyError> {
        let mut cursor = self.cursor.lock().unwrap();
        let len = self.proxies.len();

        for offset in 0..len {
            let index = (*cursor + offset) % len;
            let proxy = &self.proxies[index];
            if proxy.usable() {
                *cursor = (index + 1) % len;
                proxy.mark_used();
                return Ok(proxy.clone());
            }
        }

        Err(ProxyError::NoHealthyProxy(self.name.clone()))
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.proxies.len(),
            healthy: self.proxies.iter().filter(|p| p.healthy()).count(),
            pool_type: self.pool_type.clone(),
        }
    }

    #[cfg(test)]
    fn cursor_position(&self) -> usize {
        *self.cursor.lock().unwrap()
    }
}

/// Per-pool aggregate reported by the control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub healthy: usize,
    #[serde(rename = "type")]
    pub pool_type: String,
}

/// Outcome of an ad-hoc proxy probe requested through the control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyProbe {
    pub host: String,
    pub port: u16,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Manages named proxy pools and the background health checker.
///
/// Lock order is pool cursor, then proxy state; neither lock is ever held
/// across I/O.
pub struct ProxyManager {
    config: ProxySettings,
    pools: Vec<Pool>,
}

impl ProxyManager {
    pub fn new(config: ProxySettings) -> Result<Self> {
        let mut pools = Vec::with_capacity(config.pools.len());
        for pool_config in &config.pools {
            let pool = Self::build_pool(pool_config)
                .context(format!("Failed to create proxy pool {}", pool_config.name))?;
            pools.push(pool);
        }

        if config.enabled {
            info!(
                "Proxy manager initialized with {} pool(s), {} proxies",
                pools.len(),
                pools.iter().map(|p| p.proxies.len()).sum::<usize>()
            );
        }

        Ok(Self { config, pools })
    }

    fn build_pool(config: &PoolSettings) -> Result<Pool> {
        let mut proxies = Vec::with_capacity(config.endpoints.len());
        for (index, endpoint) in config.endpoints.iter().enumerate() {
            let (username, password, host, port) = parse_endpoint(endpoint)?;
            proxies.push(Arc::new(Proxy {
                id: format!("{}-{}", config.name, index),
                host,
                port,
                username,
                password,
                pool_type: config.pool_type.clone(),
                country: None,
                provider: config.providers.first().cloned().unwrap_or_else(|| config.name.clone()),
                state: Mutex::new(ProxyState {
                    healthy: true,
                    fail_count: 0,
                    last_used: None,
                }),
            }));
        }

        Ok(Pool {
            name: config.name.clone(),
            pool_type: config.pool_type.clone(),
            proxies,
            cursor: Mutex::new(0),
        })
    }

    /// Hand out a usable proxy for the target URL, or `None` when the proxy
    /// subsystem is disabled (workers then connect directly).
    ///
    /// Pool selection is currently first-pool-wins in configuration order;
    /// geographic and load-aware selection are reserved refinements.
    pub fn get_proxy(
        &self,
        target_url: &str,
    ) -> std::result::Result<Option<Arc<Proxy>>, ProxyError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let pool = self.select_pool(target_url)?;
        let proxy = pool.next_usable()?;
        debug!("Selected proxy {} from pool {}", proxy.id, pool.name);
        Ok(Some(proxy))
    }

    fn select_pool(&self, _target_url: &str) -> std::result::Result<&Pool, ProxyError> {
        self.pools.first().ok_or(ProxyError::NoPools)
    }

    /// Per-pool totals for the stats endpoint.
    pub fn stats(&self) -> HashMap<String, PoolStats> {
        self.pools
            .iter()
            .map(|pool| (pool.name.clone(), pool.stats()))
            .collect()
    }

    /// Snapshot of every proxy across all pools.
    pub fn list_proxies(&self) -> Vec<ProxyInfo> {
        self.pools
            .iter()
            .flat_map(|pool| pool.proxies.iter().map(|p| p.info()))
            .collect()
    }

    /// Probe an arbitrary endpoint once, for the control API.
    pub async fn test_endpoint(&self, host: &str, port: u16) -> ProxyProbe {
        let started = Instant::now();
        let outcome = probe(&format!("http://{}:{}", host, port), None, &self.config.test_url).await;

        match outcome {
            Ok(()) => ProxyProbe {
                host: host.to_string(),
                port,
                healthy: true,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => ProxyProbe {
                host: host.to_string(),
                port,
                healthy: false,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Start the background health checker. It sweeps every configured
    /// interval until the token is cancelled; individual probes run
    /// concurrently.
    pub fn spawn_health_checker(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            if manager.pools.iter().all(|p| p.proxies.is_empty()) {
                return;
            }

            let period = Duration::from_secs(manager.config.health_check_interval.max(1));
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Health checker stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.check_all_proxies().await;
                    }
                }
            }
        })
    }

    /// Probe every proxy in every pool. State updates happen after each
    /// probe completes, under that proxy's lock only.
    pub async fn check_all_proxies(&self) {
        let mut probes = Vec::new();

        for pool in &self.pools {
            for proxy in &pool.proxies {
                let proxy = proxy.clone();
                let test_url = self.config.test_url.clone();
                probes.push(tokio::spawn(async move {
                    let auth = proxy
                        .username
                        .as_deref()
                        .zip(proxy.password.as_deref())
                        .map(|(u, p)| (u.to_string(), p.to_string()));
                    let result = probe(&proxy.url(), auth, &test_url).await;
                    match &result {
                        Ok(()) => debug!("Proxy {} healthy", proxy.id),
                        Err(e) => warn!("Proxy {} failed health check: {}", proxy.id, e),
                    }
                    proxy.record_probe(result.is_ok());
                }));
            }
        }

        for handle in probes {
            let _ = handle.await;
        }
    }
}

/// Issue one GET through the given proxy URL and report success iff the
/// response is 2xx within the probe timeout.
async fn probe(proxy_url: &str, auth: Option<(String, String)>, test_url: &str) -> Result<()> {
    let mut proxy = reqwest::Proxy::all(proxy_url)
        .context(format!("Invalid proxy URL: {}", proxy_url))?;
    if let Some((username, password)) = auth {
        proxy = proxy.basic_auth(&username, &password);
    }

    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .proxy(proxy)
        .build()
        .context("Failed to build probe client")?;

    let response = client.get(test_url).send().await.context("Probe request failed")?;
    if !response.status().is_success() {
        anyhow::bail!("Probe returned status {}", response.status());
    }

    Ok(())
}

/// Parse `host:port` or `user:pass@host:port`.
fn parse_endpoint(
    endpoint: &str,
) -> std::result::Result<(Option<String>, Option<String>, String, u16), ProxyError> {
    let invalid = || ProxyError::InvalidEndpoint(endpoint.to_string());

    let (credentials, address) = match endpoint.rsplit_once('@') {
        Some((creds, addr)) => (Some(creds), addr),
        None => (None, endpoint),
    };

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;

    let (username, password) = match credentials {
        Some(creds) => {
            let (user, pass) = creds.split_once(':').ok_or_else(invalid)?;
            (Some(user.to_string()), Some(pass.to_string()))
        }
        None => (None, None),
    };

    Ok((username, password, host.to_string(), port))
}
