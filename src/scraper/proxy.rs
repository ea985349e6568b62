// proxy.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::scraper::ScraperError;

/// The primary is skipped after this many consecutive failures, while the
/// last one is within the cool-down window.
pub const PRIMARY_FAILURE_THRESHOLD: u32 = 3;
pub const PRIMARY_COOLDOWN_MINUTES: i64 = 5;
pub const BACKUP_FAILURE_THRESHOLD: u32 = 5;
pub const BACKUP_COOLDOWN_MINUTES: i64 = 30;

pub const DEFAULT_PROBE_URL: &str = "https://httpbin.org/ip";
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }
}

impl FromStr for ProxyProtocol {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyProtocol::Http),
            "https" => Ok(ProxyProtocol::Https),
            "socks5" | "socks" => Ok(ProxyProtocol::Socks5),
            other => Err(ScraperError::Config(format!(
                "unsupported proxy protocol: {other}"
            ))),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

// Keep passwords out of logs.
impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub credentials: Option<ProxyCredentials>,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            credentials: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Parses `proto://[user:pass@]host:port`.
    pub fn parse(raw: &str) -> Result<Self, ScraperError> {
        let url = Url::parse(raw.trim())
            .map_err(|e| ScraperError::Config(format!("invalid proxy url: {e}")))?;
        let protocol = url.scheme().parse()?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ScraperError::Config("proxy url has no host".into()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ScraperError::Config(format!("proxy {host} has no port")))?;

        let mut endpoint = ProxyEndpoint::new(host, port, protocol);
        if !url.username().is_empty() {
            endpoint = endpoint.with_credentials(url.username(), url.password().unwrap_or(""));
        }
        Ok(endpoint)
    }

    /// Value for Chromium's `--proxy-server` flag. Credentials are answered
    /// through the auth challenge instead.
    pub fn server_arg(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }

    /// Full url including percent-encoded credentials, for HTTP clients.
    pub fn to_url(&self) -> Result<Url, ScraperError> {
        let mut url = Url::parse(&self.server_arg())
            .map_err(|e| ScraperError::Config(format!("invalid proxy {self}: {e}")))?;
        if let Some(c) = &self.credentials {
            url.set_username(&c.username)
                .and_then(|_| url.set_password(Some(&c.password)))
                .map_err(|_| {
                    ScraperError::Config(format!("proxy {self} cannot carry credentials"))
                })?;
        }
        Ok(url)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.server_arg())
    }
}

/// Index of an endpoint inside its pool; 0 is the primary when one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProxyId(pub usize);

#[derive(Debug, Clone, Default)]
struct Health {
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    total_requests: u64,
    total_failures: u64,
    last_used_at: Option<DateTime<Utc>>,
}

impl Health {
    fn cooling_down(&self, threshold: u32, cooldown: ChronoDuration, now: DateTime<Utc>) -> bool {
        if self.consecutive_failures < threshold {
            return false;
        }
        match self.last_failure_at {
            Some(at) => now - at < cooldown,
            None => false,
        }
    }
}

#[derive(Debug)]
struct PoolState {
    health: Vec<Health>,
    // Next backup index to try, relative to the backup ring.
    backup_cursor: usize,
}

/// Candidate egress endpoints with health tracking.
///
/// Endpoints are never removed; an unhealthy one is only deprioritized.
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    has_primary: bool,
    state: Mutex<PoolState>,
    probe_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub id: ProxyId,
    pub endpoint: String,
    pub protocol: ProxyProtocol,
    pub is_primary: bool,
    pub authenticated: bool,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub total_requests: u64,
    pub total_failures: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStats {
    pub configured: bool,
    pub endpoints: Vec<EndpointStats>,
}

impl ProxyPool {
    pub fn new(primary: Option<ProxyEndpoint>, backups: Vec<ProxyEndpoint>) -> Self {
        let has_primary = primary.is_some();
        let endpoints: Vec<ProxyEndpoint> = primary.into_iter().chain(backups).collect();
        let health = vec![Health::default(); endpoints.len()];

        Self {
            endpoints,
            has_primary,
            state: Mutex::new(PoolState {
                health,
                backup_cursor: 0,
            }),
            probe_url: DEFAULT_PROBE_URL.to_string(),
        }
    }

    /// A pool without endpoints; every browser connects directly.
    pub fn direct() -> Self {
        Self::new(None, Vec::new())
    }

    pub fn with_probe_url(mut self, probe_url: impl Into<String>) -> Self {
        self.probe_url = probe_url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.endpoints.is_empty()
    }

    pub fn endpoint(&self, id: ProxyId) -> Option<&ProxyEndpoint> {
        self.endpoints.get(id.0)
    }

    pub fn select(&self) -> Option<(ProxyId, ProxyEndpoint)> {
        self.select_at(Utc::now())
    }

    /// Picks the endpoint to use at `now`.
    ///
    /// Primary first unless it is cooling down, then the backup ring, and
    /// when everything is cooling down the endpoint with the fewest
    /// consecutive failures. Only an empty pool yields `None`.
    pub fn select_at(&self, now: DateTime<Utc>) -> Option<(ProxyId, ProxyEndpoint)> {
        if self.endpoints.is_empty() {
            return None;
        }

        let mut state = self.lock_state();
        let primary_cooldown = ChronoDuration::minutes(PRIMARY_COOLDOWN_MINUTES);
        let backup_cooldown = ChronoDuration::minutes(BACKUP_COOLDOWN_MINUTES);

        if self.has_primary
            && !state.health[0].cooling_down(PRIMARY_FAILURE_THRESHOLD, primary_cooldown, now)
        {
            return Some(self.mark_used(&mut state, 0, now));
        }

        let first_backup = usize::from(self.has_primary);
        let ring_len = self.endpoints.len() - first_backup;
        for step in 0..ring_len {
            let offset = (state.backup_cursor + step) % ring_len;
            let idx = first_backup + offset;
            if state.health[idx].cooling_down(BACKUP_FAILURE_THRESHOLD, backup_cooldown, now) {
                continue;
            }
            state.backup_cursor = (offset + 1) % ring_len;
            if self.has_primary {
                info!(proxy = %self.endpoints[idx], "primary proxy cooling down, using backup");
            }
            return Some(self.mark_used(&mut state, idx, now));
        }

        // Everything is cooling down: degrade to the least-failed endpoint.
        let idx = state
            .health
            .iter()
            .enumerate()
            .min_by_key(|(i, h)| (h.consecutive_failures, *i))
            .map(|(i, _)| i)
            .unwrap_or(0);
        warn!(proxy = %self.endpoints[idx], "all proxies cooling down, using least-failed");
        Some(self.mark_used(&mut state, idx, now))
    }

    /// Whether a browser pinned to `id` should move: the endpoint is cooling
    /// down and at least one other endpoint is not.
    pub fn should_fail_over(&self, id: ProxyId) -> bool {
        self.should_fail_over_at(id, Utc::now())
    }

    pub fn should_fail_over_at(&self, id: ProxyId, now: DateTime<Utc>) -> bool {
        let state = self.lock_state();
        if !self.is_cooling_down(&state, id.0, now) {
            return false;
        }
        (0..self.endpoints.len()).any(|i| i != id.0 && !self.is_cooling_down(&state, i, now))
    }

    pub fn report_failure(&self, id: ProxyId) {
        self.report_failure_at(id, Utc::now());
    }

    pub fn report_failure_at(&self, id: ProxyId, now: DateTime<Utc>) {
        let mut state = self.lock_state();
        if let Some(h) = state.health.get_mut(id.0) {
            h.consecutive_failures += 1;
            h.total_failures += 1;
            h.last_failure_at = Some(now);
            debug!(
                proxy = %self.endpoints[id.0],
                failures = h.consecutive_failures,
                "proxy failure recorded"
            );
        }
    }

    pub fn report_success(&self, id: ProxyId) {
        let mut state = self.lock_state();
        if let Some(h) = state.health.get_mut(id.0) {
            h.consecutive_failures = 0;
        }
    }

    pub fn stats(&self) -> ProxyStats {
        let state = self.lock_state();
        let endpoints = self
            .endpoints
            .iter()
            .zip(state.health.iter())
            .enumerate()
            .map(|(i, (e, h))| EndpointStats {
                id: ProxyId(i),
                endpoint: format!("{}:{}", e.host, e.port),
                protocol: e.protocol,
                is_primary: self.has_primary && i == 0,
                authenticated: e.credentials.is_some(),
                consecutive_failures: h.consecutive_failures,
                last_failure_at: h.last_failure_at,
                total_requests: h.total_requests,
                total_failures: h.total_failures,
                last_used_at: h.last_used_at,
            })
            .collect();

        ProxyStats {
            configured: self.is_configured(),
            endpoints,
        }
    }

    /// GETs the echo endpoint through one proxy and records the outcome.
    pub async fn probe(&self, id: ProxyId) -> Result<(), ScraperError> {
        let endpoint = self
            .endpoint(id)
            .ok_or_else(|| ScraperError::Config(format!("unknown proxy id {}", id.0)))?;

        match probe_endpoint(endpoint, &self.probe_url).await {
            // Setup errors are not endpoint failures.
            Err(e @ ScraperError::Config(_)) => {
                warn!(proxy = %endpoint, error = %e, "proxy health check could not be set up");
                Err(e)
            }
            Ok(()) => {
                self.report_success(id);
                debug!(proxy = %endpoint, "proxy probe ok");
                Ok(())
            }
            Err(e) => {
                self.report_failure(id);
                warn!(proxy = %endpoint, error = %e, "proxy probe failed");
                Err(e)
            }
        }
    }

    /// Probes every endpoint; returns how many answered.
    pub async fn probe_all(&self) -> usize {
        let mut healthy = 0;
        for i in 0..self.endpoints.len() {
            if self.probe(ProxyId(i)).await.is_ok() {
                healthy += 1;
            }
        }
        healthy
    }

    /// Runs [`ProxyPool::probe_all`] every `interval`, independent of
    /// scraping traffic.
    pub fn spawn_health_probe(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !self.is_configured() {
                    continue;
                }
                let healthy = self.probe_all().await;
                info!(healthy, total = self.endpoints.len(), "proxy health probe finished");
            }
        })
    }

    fn mark_used(
        &self,
        state: &mut PoolState,
        idx: usize,
        now: DateTime<Utc>,
    ) -> (ProxyId, ProxyEndpoint) {
        let h = &mut state.health[idx];
        h.total_requests += 1;
        h.last_used_at = Some(now);
        (ProxyId(idx), self.endpoints[idx].clone())
    }

    fn is_cooling_down(&self, state: &PoolState, idx: usize, now: DateTime<Utc>) -> bool {
        let Some(h) = state.health.get(idx) else {
            return false;
        };
        if self.has_primary && idx == 0 {
            h.cooling_down(
                PRIMARY_FAILURE_THRESHOLD,
                ChronoDuration::minutes(PRIMARY_COOLDOWN_MINUTES),
                now,
            )
        } else {
            h.cooling_down(
                BACKUP_FAILURE_THRESHOLD,
                ChronoDuration::minutes(BACKUP_COOLDOWN_MINUTES),
                now,
            )
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // A poisoned lock only means a panic elsewhere; the counters are still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn probe_endpoint(endpoint: &ProxyEndpoint, probe_url: &str) -> Result<(), ScraperError> {
    let proxy = reqwest::Proxy::all(endpoint.to_url()?)
        .map_err(|e| ScraperError::Config(format!("invalid proxy {endpoint}: {e}")))?;

    let client = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|e| ScraperError::Network(e.to_string()))?;

    let resp = client
        .get(probe_url)
        .send()
        .await
        .map_err(|e| ScraperError::Network(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(ScraperError::Network(format!(
            "probe returned HTTP {}",
            resp.status()
        )));
    }
    Ok(())
}
