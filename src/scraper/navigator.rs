// navigator.rs
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::scraper::proxy::ProxyPool;
use crate::scraper::session::Session;
use crate::scraper::ScraperError;

/// Phrases that mark an anti-bot interstitial instead of a real page.
const BLOCK_MARKERS: &[&str] = &["blocked", "captcha", "robot", "access denied", "forbidden"];

/// How much of the body is scanned for block markers.
const BODY_SCAN_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy)]
pub struct NavigateOptions {
    pub max_retries: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(60),
            backoff_base: Duration::from_secs(5),
        }
    }
}

/// Which marker matched and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSignal {
    pub marker: &'static str,
    pub in_title: bool,
}

impl fmt::Display for BlockSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let place = if self.in_title { "title" } else { "body" };
        write!(f, "'{}' in page {}", self.marker, place)
    }
}

/// Looks for anti-bot markers in the title, then in the start of the body.
pub fn detect_block(title: &str, body: &str) -> Option<BlockSignal> {
    let title = title.to_lowercase();
    if let Some(marker) = BLOCK_MARKERS.iter().copied().find(|m| title.contains(m)) {
        return Some(BlockSignal { marker, in_title: true });
    }

    let head: String = body.chars().take(BODY_SCAN_CHARS).collect::<String>().to_lowercase();
    BLOCK_MARKERS
        .iter()
        .copied()
        .find(|m| head.contains(m))
        .map(|marker| BlockSignal { marker, in_title: false })
}

/// Loads pages with retries and block detection, feeding the outcome
/// back into the proxy pool.
pub struct Navigator {
    proxies: Arc<ProxyPool>,
}

impl Navigator {
    pub fn new(proxies: Arc<ProxyPool>) -> Self {
        Self { proxies }
    }

    pub async fn navigate(
        &self,
        session: &Session,
        url: &str,
        opts: NavigateOptions,
    ) -> Result<(), ScraperError> {
        let attempts = opts.max_retries.max(1);
        let mut last_err = ScraperError::Navigation(format!("{url}: no attempt made"));

        for attempt in 1..=attempts {
            debug!(url, attempt, attempts, "navigating");

            match self.attempt(session, url, opts.timeout).await {
                Ok(()) => {
                    if let Some(id) = session.proxy() {
                        self.proxies.report_success(id);
                    }
                    info!(url, attempt, "page loaded");
                    return Ok(());
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "navigation attempt failed");
                    let retry = e.is_transient();
                    last_err = e;
                    if !retry {
                        break;
                    }
                }
            }

            if attempt < attempts {
                tokio::time::sleep(opts.backoff_base * attempt).await;
            }
        }

        if let Some(id) = session.proxy() {
            self.proxies.report_failure(id);
        }
        Err(last_err)
    }

    async fn attempt(
        &self,
        session: &Session,
        url: &str,
        timeout: Duration,
    ) -> Result<(), ScraperError> {
        let page = session.page();
        page.goto(url, timeout).await?;

        let title = page.title().await.unwrap_or_default();
        let body = page.body_text().await.unwrap_or_default();

        match detect_block(&title, &body) {
            Some(signal) => {
                warn!(url, %signal, "block page detected");
                Err(ScraperError::Blocked(signal.to_string()))
            }
            None => Ok(()),
        }
    }
}
