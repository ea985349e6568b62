// orchestrator.rs
use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::domain::criteria::SearchCriteria;
use crate::domain::listing::{Listing, Source};
use crate::domain::logic::process;
use crate::scraper::extract::{ExtractOptions, SiteExtractor};
use crate::scraper::navigator::Navigator;
use crate::scraper::session::SessionManager;
use crate::scraper::ScraperError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeMode {
    /// One source after another with a pause in between, easy on a shared proxy.
    Sequential { delay: Duration },
    /// All sources at once, bounded by the session pool.
    Concurrent,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub mode: ScrapeMode,
    pub deadline: Duration,
    pub allow_synthetic_fallback: bool,
    pub fallback_catalog: Vec<Listing>,
    pub default_extract: ExtractOptions,
    pub per_source_extract: HashMap<Source, ExtractOptions>,
    /// Random pause after each source, in milliseconds. `(0, 0)` disables it.
    pub jitter_ms: (u64, u64),
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            mode: ScrapeMode::Sequential {
                delay: Duration::from_millis(3000),
            },
            deadline: Duration::from_millis(120_000),
            allow_synthetic_fallback: false,
            fallback_catalog: Vec::new(),
            default_extract: ExtractOptions::default(),
            per_source_extract: HashMap::new(),
            jitter_ms: (1000, 3000),
        }
    }
}

impl OrchestratorSettings {
    pub fn extract_options(&self, source: Source) -> &ExtractOptions {
        self.per_source_extract
            .get(&source)
            .unwrap_or(&self.default_extract)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceStatus {
    Completed,
    Failed,
    /// Started but still running when the deadline hit.
    TimedOut,
    /// Never started before the deadline.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source: Source,
    pub status: SourceStatus,
    pub count: usize,
    pub took_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub listings: Vec<Listing>,
    pub sources: Vec<SourceReport>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Overrides the configured fallback default for this search.
    pub allow_synthetic_fallback: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub listings: Vec<Listing>,
    pub took_ms: u64,
    pub raw_count: usize,
    pub sources: Vec<SourceReport>,
    pub timed_out: bool,
    pub used_fallback: bool,
}

/// Shared state each source run writes into. Only completed sources
/// append listings, so a deadline never leaves half a source behind.
#[derive(Default)]
struct Collector {
    listings: Mutex<Vec<Listing>>,
    reports: Mutex<Vec<SourceReport>>,
    started: Mutex<HashSet<Source>>,
}

/// Runs the site extractors under one global deadline and feeds the
/// combined result through the filter pipeline.
pub struct Orchestrator {
    sessions: Arc<SessionManager>,
    navigator: Arc<Navigator>,
    extractors: Vec<Arc<dyn SiteExtractor>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionManager>,
        navigator: Arc<Navigator>,
        extractors: Vec<Arc<dyn SiteExtractor>>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            sessions,
            navigator,
            extractors,
            settings,
        }
    }

    pub async fn search(&self, criteria: &SearchCriteria, options: SearchOptions) -> SearchOutcome {
        let started = Instant::now();
        let report = self.run(criteria, self.settings.deadline).await;

        let allow_fallback = options
            .allow_synthetic_fallback
            .unwrap_or(self.settings.allow_synthetic_fallback);
        let use_fallback =
            allow_fallback
                && report.listings.is_empty()
                && !self.settings.fallback_catalog.is_empty();

        let raw = if use_fallback {
            info!(
                catalog = self.settings.fallback_catalog.len(),
                "no live listings, using fallback catalog"
            );
            self.settings.fallback_catalog.clone()
        } else {
            report.listings
        };

        let raw_count = raw.len();
        let listings = process(raw, criteria);
        let took_ms = elapsed_ms(started);

        info!(
            raw = raw_count,
            kept = listings.len(),
            took_ms,
            timed_out = report.timed_out,
            "🏁 search finished"
        );

        SearchOutcome {
            listings,
            took_ms,
            raw_count,
            sources: report.sources,
            timed_out: report.timed_out,
            used_fallback: use_fallback,
        }
    }

    /// Runs every extractor and returns whatever finished before `deadline`.
    pub async fn run(&self, criteria: &SearchCriteria, deadline: Duration) -> RunReport {
        let collector = Collector::default();

        let work = async {
            match self.settings.mode {
                ScrapeMode::Sequential { delay } => {
                    for (i, extractor) in self.extractors.iter().enumerate() {
                        if i > 0 && !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        self.run_source(extractor.as_ref(), criteria, &collector).await;
                    }
                }
                ScrapeMode::Concurrent => {
                    let runs = self
                        .extractors
                        .iter()
                        .map(|e| self.run_source(e.as_ref(), criteria, &collector));
                    futures::future::join_all(runs).await;
                }
            }
        };

        let timed_out = tokio::time::timeout(deadline, work).await.is_err();
        if timed_out {
            warn!(
                "{}",
                ScraperError::GlobalTimeout(u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX))
            );
        }

        let listings = std::mem::take(&mut *lock(&collector.listings));
        let mut reports = std::mem::take(&mut *lock(&collector.reports));
        let started = std::mem::take(&mut *lock(&collector.started));

        let mut sources = Vec::with_capacity(self.extractors.len());
        for extractor in &self.extractors {
            let source = extractor.source();
            match reports.iter().position(|r| r.source == source) {
                Some(pos) => sources.push(reports.swap_remove(pos)),
                None => sources.push(SourceReport {
                    source,
                    status: if started.contains(&source) {
                        SourceStatus::TimedOut
                    } else {
                        SourceStatus::Skipped
                    },
                    count: 0,
                    took_ms: 0,
                    error: None,
                }),
            }
        }

        RunReport {
            listings,
            sources,
            timed_out,
        }
    }

    async fn run_source(
        &self,
        extractor: &dyn SiteExtractor,
        criteria: &SearchCriteria,
        collector: &Collector,
    ) {
        let source = extractor.source();
        lock(&collector.started).insert(source);
        let started = Instant::now();
        let options = self.settings.extract_options(source);

        let outcome = match self.sessions.get_session().await {
            Ok(session) => extractor
                .extract(&session, &self.navigator, criteria, options)
                .await
                .into_result(),
            Err(e) => Err(e),
        };

        let report = match outcome {
            Ok(listings) => {
                let count = listings.len();
                lock(&collector.listings).extend(listings);
                info!(%source, count, "source completed");
                SourceReport {
                    source,
                    status: SourceStatus::Completed,
                    count,
                    took_ms: elapsed_ms(started),
                    error: None,
                }
            }
            Err(e) => {
                let e = e.into_source_failure(source);
                warn!(error = %e, "❌ source failed");
                SourceReport {
                    source,
                    status: SourceStatus::Failed,
                    count: 0,
                    took_ms: elapsed_ms(started),
                    error: Some(e.to_string()),
                }
            }
        };
        lock(&collector.reports).push(report);

        let (lo, hi) = self.settings.jitter_ms;
        if hi > 0 {
            let pause = rand::thread_rng().gen_range(lo.min(hi)..=hi);
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
