use thiserror::Error;

use crate::domain::listing::Source;

#[derive(Debug, Clone, Error)]
pub enum ScraperError {
    /// The page loaded but carries an anti-bot signal (captcha, bot wall).
    #[error("Blocked by site: {0}")]
    Blocked(String),

    /// Timeout, DNS, TLS or DOM-wait failure while loading a page.
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// One candidate node could not be turned into a listing.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// A whole source gave up after its retries.
    #[error("Source {site} failed: {reason}")]
    SourceFailure { site: Source, reason: String },

    #[error("Global scraping deadline of {0} ms exceeded")]
    GlobalTimeout(u64),

    /// Browser launch or CDP command failure.
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("No browser session available: {0}")]
    NoSession(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScraperError {
    /// Whether another attempt at the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScraperError::Blocked(_) | ScraperError::Navigation(_))
    }

    pub fn into_source_failure(self, site: Source) -> ScraperError {
        match self {
            ScraperError::SourceFailure { .. } => self,
            other => ScraperError::SourceFailure {
                site,
                reason: other.to_string(),
            },
        }
    }
}
