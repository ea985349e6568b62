// config.rs
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::domain::listing::{AreaProvenance, Listing, ListingDraft, Source};
use crate::scraper::extract::ExtractOptions;
use crate::scraper::orchestrator::{OrchestratorSettings, ScrapeMode};
use crate::scraper::proxy::{ProxyEndpoint, ProxyPool, ProxyProtocol, DEFAULT_PROBE_URL};
use crate::scraper::session::SessionSettings;
use crate::scraper::stealth::Fingerprint;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid proxy configuration: {0}")]
    Proxy(String),

    #[error("failed to load fallback catalog {path}: {reason}")]
    Catalog { path: String, reason: String },
}

/// Process configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub proxy_primary: Option<ProxyEndpoint>,
    pub proxy_backups: Vec<ProxyEndpoint>,
    pub proxy_probe_url: String,
    /// `None` disables the periodic probe.
    pub proxy_probe_interval: Option<Duration>,
    pub scraping_timeout: Duration,
    pub max_properties_per_source: usize,
    pub max_results_per_source: HashMap<Source, usize>,
    pub mode: ScrapeMode,
    pub page_pool_size: usize,
    pub browser_rotation: Duration,
    pub chromium_path: Option<String>,
    pub browser_headless: bool,
    pub assume_area_from_room_count: bool,
    pub allow_synthetic_fallback: bool,
    pub fallback_catalog_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; used directly by tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(&lookup);

        let proxy_enabled = env.bool("PROXY_ENABLED", true)?;
        let (proxy_primary, proxy_backups) = if proxy_enabled {
            (primary_proxy(&env)?, backup_proxies(&env)?)
        } else {
            (None, Vec::new())
        };

        let max_properties_per_source = env.parse("MAX_PROPERTIES_PER_SOURCE", 10usize)?;
        let mut max_results_per_source = HashMap::new();
        for (key, source) in [
            ("MAX_RESULTS_ZONAPROP", Source::Zonaprop),
            ("MAX_RESULTS_ARGENPROP", Source::Argenprop),
            ("MAX_RESULTS_MERCADOLIBRE", Source::MercadoLibre),
        ] {
            if let Some(n) = env.optional::<usize>(key)? {
                max_results_per_source.insert(source, n);
            }
        }

        let source_delay = Duration::from_millis(env.parse("SOURCE_DELAY_MS", 3000u64)?);
        let mode = match env.string("SCRAPER_MODE").as_deref().map(str::trim) {
            None | Some("") | Some("sequential") => ScrapeMode::Sequential { delay: source_delay },
            Some("concurrent") => ScrapeMode::Concurrent,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SCRAPER_MODE",
                    value: other.to_string(),
                    reason: "expected sequential or concurrent".into(),
                })
            }
        };

        let probe_secs = env.parse("PROXY_PROBE_INTERVAL_SECS", 300u64)?;

        Ok(Self {
            bind_addr: env.parse("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            proxy_primary,
            proxy_backups,
            proxy_probe_url: env
                .string("PROXY_PROBE_URL")
                .unwrap_or_else(|| DEFAULT_PROBE_URL.to_string()),
            proxy_probe_interval: (probe_secs > 0).then(|| Duration::from_secs(probe_secs)),
            scraping_timeout: Duration::from_millis(env.parse("SCRAPING_TIMEOUT_MS", 120_000u64)?),
            max_properties_per_source,
            max_results_per_source,
            mode,
            page_pool_size: env.parse("PAGE_POOL_SIZE", 3usize)?,
            browser_rotation: Duration::from_secs(
                60 * env.parse("BROWSER_ROTATION_MINUTES", 30u64)?,
            ),
            chromium_path: env.string("CHROMIUM_PATH"),
            browser_headless: env.bool("BROWSER_HEADLESS", true)?,
            assume_area_from_room_count: env.bool("ASSUME_AREA_FROM_ROOM_COUNT", false)?,
            allow_synthetic_fallback: env.bool("ALLOW_SYNTHETIC_FALLBACK", false)?,
            fallback_catalog_path: env.string("FALLBACK_CATALOG_PATH").map(PathBuf::from),
        })
    }

    pub fn proxy_pool(&self) -> ProxyPool {
        ProxyPool::new(self.proxy_primary.clone(), self.proxy_backups.clone())
            .with_probe_url(self.proxy_probe_url.clone())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            pool_size: self.page_pool_size,
            rotation_interval: self.browser_rotation,
            fingerprint: Fingerprint::random(),
        }
    }

    pub fn orchestrator_settings(&self, fallback_catalog: Vec<Listing>) -> OrchestratorSettings {
        let default_extract = ExtractOptions {
            max_candidates: self.max_properties_per_source,
            assume_area_from_room_count: self.assume_area_from_room_count,
            ..ExtractOptions::default()
        };
        let per_source_extract = self
            .max_results_per_source
            .iter()
            .map(|(source, max)| {
                (
                    *source,
                    ExtractOptions {
                        max_candidates: *max,
                        ..default_extract.clone()
                    },
                )
            })
            .collect();

        OrchestratorSettings {
            mode: self.mode,
            deadline: self.scraping_timeout,
            allow_synthetic_fallback: self.allow_synthetic_fallback,
            fallback_catalog,
            default_extract,
            per_source_extract,
            ..OrchestratorSettings::default()
        }
    }

    /// Reads the fallback catalog, or an empty one when none is configured.
    pub fn load_fallback_catalog(&self) -> Result<Vec<Listing>, ConfigError> {
        let Some(path) = &self.fallback_catalog_path else {
            return Ok(Vec::new());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Catalog {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        parse_catalog(&raw).map_err(|reason| ConfigError::Catalog {
            path: path.display().to_string(),
            reason,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    title: String,
    url: String,
    total_price: u64,
    area_m2: u32,
    source: Source,
    neighborhood: String,
    #[serde(default)]
    is_owner_listed: bool,
    published_at: Option<DateTime<Utc>>,
}

/// Catalog entries go through the same validation as scraped ones; invalid
/// entries are skipped.
pub fn parse_catalog(raw: &str) -> Result<Vec<Listing>, String> {
    let entries: Vec<CatalogEntry> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let now = Utc::now();

    Ok(entries
        .into_iter()
        .filter_map(|e| {
            let title = e.title.clone();
            Listing::new(ListingDraft {
                title: e.title,
                url: e.url,
                total_price: e.total_price,
                area_m2: e.area_m2,
                area_provenance: AreaProvenance::Measured,
                source: e.source,
                neighborhood: e.neighborhood,
                is_owner_listed: e.is_owner_listed,
                published_at: e.published_at.unwrap_or(now),
            })
            .map_err(|err| warn!(%title, error = %err, "skipping invalid catalog entry"))
            .ok()
        })
        .collect())
}

struct Lookup<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    /// Trimmed value; blank counts as unset.
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn optional<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(None),
            Some(v) => v.parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value: v,
            }),
        }
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    fn bool(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key,
                    value: v,
                    reason: "expected a boolean".into(),
                }),
            },
        }
    }
}

/// Missing host or port means a direct connection, not an error.
fn primary_proxy<F: Fn(&str) -> Option<String>>(
    env: &Lookup<'_, F>,
) -> Result<Option<ProxyEndpoint>, ConfigError> {
    let host = env.string("PROXY_HOST");
    let port = env.optional::<u16>("PROXY_PORT")?;
    let (Some(host), Some(port)) = (host, port) else {
        return Ok(None);
    };

    let protocol: ProxyProtocol = env
        .string("PROXY_PROTOCOL")
        .unwrap_or_else(|| "http".into())
        .parse()
        .map_err(|e: crate::scraper::ScraperError| ConfigError::Proxy(e.to_string()))?;

    let (Some(user), Some(password)) = (env.string("PROXY_USERNAME"), env.string("PROXY_PASSWORD"))
    else {
        warn!(host = %host, "proxy credentials missing, using a direct connection");
        return Ok(None);
    };

    Ok(Some(
        ProxyEndpoint::new(host, port, protocol).with_credentials(user, password),
    ))
}

fn backup_proxies<F: Fn(&str) -> Option<String>>(
    env: &Lookup<'_, F>,
) -> Result<Vec<ProxyEndpoint>, ConfigError> {
    let Some(raw) = env.string("PROXY_BACKUPS") else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| ProxyEndpoint::parse(s).map_err(|e| ConfigError::Proxy(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let c = config(&[]).unwrap();
        assert_eq!(c.bind_addr.to_string(), "127.0.0.1:3000");
        assert!(c.proxy_primary.is_none());
        assert_eq!(c.scraping_timeout, Duration::from_secs(120));
        assert_eq!(c.max_properties_per_source, 10);
        assert_eq!(c.mode, ScrapeMode::Sequential { delay: Duration::from_secs(3) });
        assert_eq!(c.page_pool_size, 3);
        assert_eq!(c.browser_rotation, Duration::from_secs(1800));
        assert_eq!(c.proxy_probe_interval, Some(Duration::from_secs(300)));
        assert!(c.browser_headless);
        assert!(!c.assume_area_from_room_count);
        assert!(!c.allow_synthetic_fallback);
        assert!(!c.proxy_pool().is_configured());
    }

    #[test]
    fn proxy_and_overrides_from_environment() {
        let c = config(&[
            ("PROXY_HOST", "brd.superproxy.io"),
            ("PROXY_PORT", "22225"),
            ("PROXY_USERNAME", "customer-1"),
            ("PROXY_PASSWORD", "secret"),
            ("PROXY_BACKUPS", "http://b1.example:8000, socks5://b2.example:1080"),
            ("SCRAPER_MODE", "concurrent"),
            ("MAX_RESULTS_ARGENPROP", "8"),
            ("PROXY_PROBE_INTERVAL_SECS", "0"),
        ])
        .unwrap();

        let primary = c.proxy_primary.as_ref().unwrap();
        assert_eq!(primary.server_arg(), "http://brd.superproxy.io:22225");
        assert_eq!(primary.credentials.as_ref().unwrap().username, "customer-1");
        assert_eq!(c.proxy_backups.len(), 2);
        assert_eq!(c.mode, ScrapeMode::Concurrent);
        assert_eq!(c.proxy_probe_interval, None);

        let settings = c.orchestrator_settings(Vec::new());
        assert_eq!(settings.extract_options(Source::Argenprop).max_candidates, 8);
        assert_eq!(settings.extract_options(Source::Zonaprop).max_candidates, 10);
    }

    #[test]
    fn disabled_proxy_means_direct() {
        let c = config(&[
            ("PROXY_ENABLED", "false"),
            ("PROXY_HOST", "brd.superproxy.io"),
            ("PROXY_PORT", "22225"),
        ])
        .unwrap();
        assert!(c.proxy_primary.is_none());
    }

    #[test]
    fn primary_proxy_needs_both_credentials() {
        let c = config(&[("PROXY_HOST", "brd.superproxy.io"), ("PROXY_PORT", "22225")]).unwrap();
        assert!(c.proxy_primary.is_none());

        let c = config(&[
            ("PROXY_HOST", "brd.superproxy.io"),
            ("PROXY_PORT", "22225"),
            ("PROXY_USERNAME", "customer-1"),
        ])
        .unwrap();
        assert!(c.proxy_primary.is_none());

        let c = config(&[
            ("PROXY_HOST", "brd.superproxy.io"),
            ("PROXY_PORT", "22225"),
            ("PROXY_PASSWORD", "secret"),
        ])
        .unwrap();
        assert!(c.proxy_primary.is_none());
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(
            config(&[("SCRAPING_TIMEOUT_MS", "two minutes")]),
            Err(ConfigError::Invalid { key: "SCRAPING_TIMEOUT_MS", .. })
        ));
        assert!(config(&[("PROXY_HOST", "h"), ("PROXY_PORT", "99999")]).is_err());
        assert!(config(&[
            ("PROXY_HOST", "h"),
            ("PROXY_PORT", "1"),
            ("PROXY_PROTOCOL", "ftp"),
        ])
        .is_err());
        assert!(config(&[("SCRAPER_MODE", "parallel")]).is_err());
        assert!(config(&[("BROWSER_HEADLESS", "maybe")]).is_err());
    }

    #[test]
    fn catalog_entries_are_validated() {
        let raw = r#"[
          {"title": "Depto 2 ambientes Palermo", "url": "https://www.zonaprop.com.ar/propiedades/a.html",
           "totalPrice": 150000, "areaM2": 50, "source": "Zonaprop", "neighborhood": "Palermo", "isOwnerListed": true},
          {"title": "Sin superficie", "url": "https://www.argenprop.com/departamento-b",
           "totalPrice": 150000, "areaM2": 0, "source": "Argenprop", "neighborhood": "Belgrano"}
        ]"#;
        let listings = parse_catalog(raw).unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].price_per_area(), 3000);
        assert!(listings[0].is_owner_listed());

        assert!(parse_catalog("not json").is_err());
    }
}
