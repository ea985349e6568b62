use crate::domain::criteria::SearchCriteria;
use crate::domain::listing::Listing;
use crate::errors::{ResultResp, ServerError};
use crate::responses::{json_response, text_response};
use crate::scraper::orchestrator::{
    Orchestrator, SearchOptions, SearchOutcome, SourceReport, SourceStatus,
};
use crate::scraper::proxy::ProxyPool;
use crate::scraper::session::SessionManager;
use astra::Request;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info};

/// Search bodies are small; anything bigger is rejected.
const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Everything a request handler needs. The server threads are blocking, so
/// async work is driven through `runtime`.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub proxies: Arc<ProxyPool>,
    pub sessions: Arc<SessionManager>,
    pub runtime: tokio::runtime::Handle,
}

pub fn handle(req: Request, state: &AppState) -> ResultResp {
    let method = req.method().as_str().to_owned();
    let path = req.uri().path().to_owned();
    debug!(%method, %path, "request");

    match (method.as_str(), path.as_str()) {
        ("POST", "/api/search-properties") => search_properties(req, state),
        ("GET", "/api/proxy-status") => proxy_status(state),
        ("GET", "/health") => text_response(200, "ok"),

        (_, "/api/search-properties" | "/api/proxy-status" | "/health") => {
            Err(ServerError::MethodNotAllowed)
        }
        _ => Err(ServerError::NotFound),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NeighborhoodPrice {
    neighborhood: String,
    max_price_per_m2: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    #[serde(default)]
    neighborhoods: Vec<String>,
    #[serde(default)]
    neighborhood_prices: Vec<NeighborhoodPrice>,
    #[serde(default)]
    per_neighborhood_max_price_per_area: HashMap<String, u32>,
    global_max_price_per_m2: Option<u32>,
    #[serde(default)]
    owner_only: bool,
    allow_synthetic_fallback: Option<bool>,
}

impl SearchRequest {
    fn into_criteria(self) -> Result<(SearchCriteria, SearchOptions), ServerError> {
        let mut criteria = SearchCriteria::new(&self.neighborhoods)
            .ok_or_else(|| ServerError::BadRequest("at least one neighborhood is required".into()))?
            .with_global_max(self.global_max_price_per_m2)
            .owner_only(self.owner_only);

        for (neighborhood, max) in &self.per_neighborhood_max_price_per_area {
            criteria = criteria.with_neighborhood_max(neighborhood, *max);
        }
        // The list form wins over the map form for the same neighborhood.
        for price in &self.neighborhood_prices {
            criteria = criteria.with_neighborhood_max(&price.neighborhood, price.max_price_per_m2);
        }

        let options = SearchOptions {
            allow_synthetic_fallback: self.allow_synthetic_fallback,
        };
        Ok((criteria, options))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    success: bool,
    properties: Vec<Listing>,
    count: usize,
    took_ms: u64,
    sources: Vec<SourceReport>,
    timed_out: bool,
    used_fallback: bool,
    message: String,
}

impl From<SearchOutcome> for SearchResponse {
    fn from(outcome: SearchOutcome) -> Self {
        let message = outcome_message(&outcome);
        Self {
            success: true,
            count: outcome.listings.len(),
            properties: outcome.listings,
            took_ms: outcome.took_ms,
            sources: outcome.sources,
            timed_out: outcome.timed_out,
            used_fallback: outcome.used_fallback,
            message,
        }
    }
}

fn outcome_message(outcome: &SearchOutcome) -> String {
    let count = outcome.listings.len();
    if count > 0 {
        let suffix = if outcome.used_fallback { " (from the fallback catalog)" } else { "" };
        return format!("Found {count} listings{suffix}");
    }

    let none_completed = outcome
        .sources
        .iter()
        .all(|s| s.status != SourceStatus::Completed);

    if outcome.raw_count > 0 {
        "No listings matched the filters; try other neighborhoods or a higher price ceiling".into()
    } else if none_completed && outcome.timed_out {
        "The search timed out before any source finished".into()
    } else if none_completed {
        "No source could be scraped right now; please retry later".into()
    } else {
        "The sources returned no listings for these neighborhoods".into()
    }
}

fn search_properties(req: Request, state: &AppState) -> ResultResp {
    let mut raw = String::new();
    req.into_body()
        .reader()
        .take(MAX_BODY_BYTES)
        .read_to_string(&mut raw)
        .map_err(|e| ServerError::BadRequest(format!("unreadable body: {e}")))?;

    let body: SearchRequest = serde_json::from_str(&raw)
        .map_err(|e| ServerError::BadRequest(format!("invalid search body: {e}")))?;
    let (criteria, options) = body.into_criteria()?;

    info!(
        neighborhoods = ?criteria.neighborhoods(),
        owner_only = criteria.is_owner_only(),
        "🔎 search requested"
    );

    let outcome = state
        .runtime
        .block_on(state.orchestrator.search(&criteria, options));

    json_response(200, &SearchResponse::from(outcome))
}

fn proxy_status(state: &AppState) -> ResultResp {
    #[derive(Serialize)]
    struct Status {
        proxies: crate::scraper::proxy::ProxyStats,
        sessions: crate::scraper::session::SessionStats,
    }

    let status = Status {
        proxies: state.proxies.stats(),
        sessions: state.runtime.block_on(state.sessions.stats()),
    };
    json_response(200, &status)
}
