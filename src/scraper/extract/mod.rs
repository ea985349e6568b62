// extract/mod.rs
//
// One `SiteExtractor` per listing site. Sites differ only in their search
// url and their `SiteProfile` (selector cascades and url markers); the
// card pipeline below is shared.

mod argenprop;
pub mod heuristics;
mod mercadolibre;
mod zonaprop;

pub use argenprop::ArgenpropExtractor;
pub use mercadolibre::MercadoLibreExtractor;
pub use zonaprop::ZonapropExtractor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::criteria::SearchCriteria;
use crate::domain::listing::{price_per_area, AreaProvenance, Listing, ListingDraft, Source};
use crate::scraper::navigator::{NavigateOptions, Navigator};
use crate::scraper::session::Session;
use crate::scraper::ScraperError;
use heuristics::{
    area_from_room_count, extract_area, extract_price, infer_neighborhood, is_owner_listed,
    looks_like_price_or_area, parse_published_at, title_from_lines, Bands,
};

/// Generic fallback cards must have text within these lengths.
const FALLBACK_MIN_CHARS: usize = 100;
const FALLBACK_MAX_CHARS: usize = 2000;

/// Static description of how one site lays out its result cards.
#[derive(Debug)]
pub struct SiteProfile {
    pub source: Source,
    /// Origin used to resolve relative links.
    pub base_url: &'static str,
    /// Tried in order; the first selector with any match defines the cards.
    pub card_selectors: &'static [&'static str],
    pub title_selectors: &'static [&'static str],
    pub link_selectors: &'static [&'static str],
    /// A posting url must contain at least one of these.
    pub url_markers: &'static [&'static str],
    /// Exclusive length bounds for the title line scan.
    pub title_line_chars: (usize, usize),
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub max_candidates: usize,
    pub assume_area_from_room_count: bool,
    pub bands: Bands,
    pub navigate: NavigateOptions,
    /// How long to wait for a card selector before reading the page anyway.
    pub wait_timeout: Duration,
    pub scroll_steps: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_candidates: 10,
            assume_area_from_room_count: false,
            bands: Bands::default(),
            navigate: NavigateOptions::default(),
            wait_timeout: Duration::from_secs(15),
            scroll_steps: 3,
        }
    }
}

#[async_trait]
pub trait SiteExtractor: Send + Sync {
    fn source(&self) -> Source;

    fn profile(&self) -> &SiteProfile;

    fn search_url(&self, criteria: &SearchCriteria) -> String;

    /// Turns a results page into listings. Pure; never touches the network.
    fn parse(
        &self,
        html: &str,
        criteria: &SearchCriteria,
        options: &ExtractOptions,
    ) -> Vec<Listing> {
        parse_cards(self.profile(), html, criteria, options, Utc::now())
    }

    async fn try_extract(
        &self,
        session: &Session,
        navigator: &Navigator,
        criteria: &SearchCriteria,
        options: &ExtractOptions,
    ) -> Result<Vec<Listing>, ScraperError> {
        let url = self.search_url(criteria);
        info!(source = %self.source(), %url, "🔎 searching");

        navigator.navigate(session, &url, options.navigate).await?;

        let page = session.page();
        match page.wait_for_any(self.profile().card_selectors, options.wait_timeout).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(source = %self.source(), "no card selector appeared before timeout")
            }
            Err(e) => debug!(source = %self.source(), error = %e, "waiting for cards failed"),
        }
        if let Err(e) = page.scroll(options.scroll_steps).await {
            debug!(source = %self.source(), error = %e, "scroll failed");
        }

        let html = page.content().await?;
        let listings = self.parse(&html, criteria, options);
        info!(source = %self.source(), count = listings.len(), "✅ extracted listings");
        Ok(listings)
    }

    /// Like [`SiteExtractor::try_extract`] but never fails: errors are
    /// logged and yield no listings, with the cause kept in `failure`.
    async fn extract(
        &self,
        session: &Session,
        navigator: &Navigator,
        criteria: &SearchCriteria,
        options: &ExtractOptions,
    ) -> Extraction {
        match self.try_extract(session, navigator, criteria, options).await {
            Ok(listings) => Extraction {
                listings,
                failure: None,
            },
            Err(e) => {
                warn!(source = %self.source(), error = %e, "extraction failed");
                Extraction {
                    listings: Vec::new(),
                    failure: Some(e),
                }
            }
        }
    }
}

/// Listings from one site. `failure` is set when they were degraded to
/// empty.
#[derive(Debug, Default)]
pub struct Extraction {
    pub listings: Vec<Listing>,
    pub failure: Option<ScraperError>,
}

impl Extraction {
    pub fn into_result(self) -> Result<Vec<Listing>, ScraperError> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.listings),
        }
    }
}

pub fn extractor_for(source: Source) -> Arc<dyn SiteExtractor> {
    match source {
        Source::Zonaprop => Arc::new(ZonapropExtractor),
        Source::Argenprop => Arc::new(ArgenpropExtractor),
        Source::MercadoLibre => Arc::new(MercadoLibreExtractor),
    }
}

/// All three extractors, in the order they are searched.
pub fn default_extractors() -> Vec<Arc<dyn SiteExtractor>> {
    Source::ALL.into_iter().map(extractor_for).collect()
}

/// Lowercase, accent-free, dash-separated form of a neighborhood name.
pub(crate) fn slugify(name: &str) -> String {
    heuristics::fold(name.trim())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

pub(crate) fn parse_cards(
    profile: &SiteProfile,
    html: &str,
    criteria: &SearchCriteria,
    options: &ExtractOptions,
    now: DateTime<Utc>,
) -> Vec<Listing> {
    let doc = Html::parse_document(html);
    let cards = find_cards(profile, &doc);
    debug!(source = %profile.source, candidates = cards.len(), "found candidate cards");

    let mut seen_urls = HashSet::new();
    let mut listings = Vec::new();

    for card in cards.into_iter().take(options.max_candidates) {
        match build_listing(profile, card, criteria, options, now) {
            Ok(listing) => {
                if seen_urls.insert(listing.url().to_string()) {
                    listings.push(listing);
                } else {
                    debug!(source = %profile.source, url = listing.url(), "duplicate posting url");
                }
            }
            Err(e) => debug!(source = %profile.source, error = %e, "candidate rejected"),
        }
    }

    listings
}

fn find_cards<'a>(profile: &SiteProfile, doc: &'a Html) -> Vec<ElementRef<'a>> {
    for raw in profile.card_selectors {
        let Ok(sel) = Selector::parse(raw) else {
            warn!(selector = raw, "invalid card selector");
            continue;
        };
        let found: Vec<ElementRef> = doc.select(&sel).collect();
        if !found.is_empty() {
            debug!(
                source = %profile.source,
                selector = raw,
                count = found.len(),
                "card selector matched"
            );
            return found;
        }
    }

    generic_cards(doc)
}

/// Innermost `div`s whose text carries a currency marker and an area unit.
fn generic_cards(doc: &Html) -> Vec<ElementRef<'_>> {
    let Ok(div) = Selector::parse("div") else {
        return Vec::new();
    };

    let qualifying: Vec<ElementRef> = doc
        .select(&div)
        .filter(|el| {
            let text = node_text(*el);
            let len = text.chars().count();
            let has_currency = text.contains("USD") || text.contains("U$S") || text.contains('$');
            let has_area = text.contains("m²") || text.contains("m2");
            has_currency && has_area && len > FALLBACK_MIN_CHARS && len < FALLBACK_MAX_CHARS
        })
        .collect();

    let ids: HashSet<_> = qualifying.iter().map(|el| el.id()).collect();
    qualifying
        .into_iter()
        .filter(|el| !el.descendants().skip(1).any(|n| ids.contains(&n.id())))
        .collect()
}

/// Text nodes joined by newlines so line-based heuristics see one
/// line per node.
fn node_text(el: ElementRef) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn build_listing(
    profile: &SiteProfile,
    card: ElementRef,
    criteria: &SearchCriteria,
    options: &ExtractOptions,
    now: DateTime<Utc>,
) -> Result<Listing, ScraperError> {
    let text = node_text(card);

    let title = resolve_title(profile, card, &text)
        .ok_or_else(|| ScraperError::Extraction("no title".into()))?;
    let url = resolve_url(profile, card)
        .ok_or_else(|| ScraperError::Extraction(format!("no posting url for {title:?}")))?;
    let total_price = extract_price(&text, options.bands.price)
        .ok_or_else(|| ScraperError::Extraction(format!("no plausible price for {title:?}")))?;

    let (area_m2, area_provenance) = match extract_area(&text, options.bands.area) {
        Some(area) => (area, AreaProvenance::Measured),
        None if options.assume_area_from_room_count => area_from_room_count(&title)
            .map(|area| (area, AreaProvenance::AssumedFromRoomCount))
            .ok_or_else(|| ScraperError::Extraction(format!("no area for {title:?}")))?,
        None => return Err(ScraperError::Extraction(format!("no area for {title:?}"))),
    };

    let ppa = price_per_area(total_price, area_m2);
    if !options.bands.price_per_area.contains(u64::from(ppa)) {
        return Err(ScraperError::Extraction(format!(
            "implausible price per m² {ppa} for {title:?}"
        )));
    }

    Listing::new(ListingDraft {
        neighborhood: infer_neighborhood(&title, &text, criteria.neighborhoods()),
        is_owner_listed: is_owner_listed(&text),
        published_at: parse_published_at(&text, now).unwrap_or(now),
        title,
        url,
        total_price,
        area_m2,
        area_provenance,
        source: profile.source,
    })
}

fn resolve_title(profile: &SiteProfile, card: ElementRef, text: &str) -> Option<String> {
    for raw in profile.title_selectors {
        let Ok(sel) = Selector::parse(raw) else { continue };
        if let Some(el) = card.select(&sel).next() {
            let candidate = collapse(&el.text().collect::<String>());
            if !candidate.is_empty() && !looks_like_price_or_area(&candidate) {
                return Some(candidate);
            }
        }
    }

    // Links often carry the full title as an attribute.
    if let Ok(sel) = Selector::parse("a[title]") {
        let from_attr = card
            .select(&sel)
            .filter_map(|a| a.value().attr("title"))
            .map(collapse)
            .find(|t| !t.is_empty());
        if from_attr.is_some() {
            return from_attr;
        }
    }

    let (min, max) = profile.title_line_chars;
    title_from_lines(text, min, max)
}

fn resolve_url(profile: &SiteProfile, card: ElementRef) -> Option<String> {
    let mut hrefs: Vec<String> = Vec::new();

    for raw in profile.link_selectors {
        let Ok(sel) = Selector::parse(raw) else { continue };
        hrefs.extend(
            card.select(&sel)
                .filter_map(|a| {
                    a.value()
                        .attr("href")
                        .or_else(|| a.value().attr("data-to-posting"))
                })
                .map(str::to_string),
        );
    }

    // Some cards put the posting path on the card element itself.
    if let Some(path) = card.value().attr("data-to-posting") {
        hrefs.push(path.to_string());
    }

    if let Ok(sel) = Selector::parse("a[href]") {
        hrefs.extend(
            card.select(&sel)
                .filter_map(|a| a.value().attr("href"))
                .map(str::to_string),
        );
    }

    let base = Url::parse(profile.base_url).ok()?;
    hrefs
        .iter()
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(|u| u.to_string())
        .find(|u| profile.url_markers.iter().any(|m| u.contains(m)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: SiteProfile = SiteProfile {
        source: Source::Zonaprop,
        base_url: "https://www.zonaprop.com.ar",
        card_selectors: &[".card"],
        title_selectors: &["h2"],
        link_selectors: &["a.link"],
        url_markers: &["/propiedades/"],
        title_line_chars: (10, 100),
    };

    fn criteria() -> SearchCriteria {
        SearchCriteria::new(["Palermo"]).unwrap()
    }

    fn parse(html: &str, options: &ExtractOptions) -> Vec<Listing> {
        parse_cards(&PROFILE, html, &criteria(), options, Utc::now())
    }

    #[test]
    fn rejects_candidates_missing_area_unless_opted_in() {
        let html = r#"
            <div class="card">
              <h2>Departamento 2 ambientes en Palermo</h2>
              <a class="link" href="/propiedades/depto-palermo-1.html">ver</a>
              <span>USD 120.000</span>
            </div>"#;

        assert!(parse(html, &ExtractOptions::default()).is_empty());

        let opted_in = ExtractOptions {
            assume_area_from_room_count: true,
            ..ExtractOptions::default()
        };
        let listings = parse(html, &opted_in);
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].area_m2(), 55);
        assert_eq!(listings[0].area_provenance(), AreaProvenance::AssumedFromRoomCount);
    }

    #[test]
    fn price_per_area_gate_drops_malformed_extractions() {
        // 4.900.000 / 20 m² = 245.000 per m², far outside the band.
        let html = r#"
            <div class="card">
              <h2>Cochera en Palermo</h2>
              <a class="link" href="/propiedades/cochera-1.html">ver</a>
              <span>USD 4.900.000</span><span>20 m²</span>
            </div>"#;
        assert!(parse(html, &ExtractOptions::default()).is_empty());
    }

    #[test]
    fn repeated_urls_are_emitted_once_and_candidates_capped() {
        let card = r#"
            <div class="card">
              <h2>Departamento en Palermo</h2>
              <a class="link" href="/propiedades/same.html">ver</a>
              <span>USD 150.000</span><span>50 m²</span>
            </div>"#;
        let html = card.repeat(3);
        assert_eq!(parse(&html, &ExtractOptions::default()).len(), 1);

        let many: String = (0..15)
            .map(|i| {
                format!(
                    r#"<div class="card"><h2>Departamento {i} en Palermo</h2>
                       <a class="link" href="/propiedades/d-{i}.html">ver</a>
                       <span>USD 150.000</span><span>50 m²</span></div>"#
                )
            })
            .collect();
        let capped = ExtractOptions {
            max_candidates: 4,
            ..ExtractOptions::default()
        };
        assert_eq!(parse(&many, &capped).len(), 4);
    }

    #[test]
    fn generic_scan_picks_innermost_priced_divs() {
        let filler = "Luminoso, balcón al frente, cocina integrada, cerca del subte.";
        let html = format!(
            r#"<html><body><div id="wrap">
              <div><p>Departamento 3 ambientes Palermo Soho</p><p>USD 240.000</p><p>80 m²</p><p>{filler}</p>
                   <a href="https://www.zonaprop.com.ar/propiedades/a.html">ver</a></div>
              <div><p>Departamento 2 ambientes Palermo Chico</p><p>USD 180.000</p><p>60 m²</p><p>{filler}</p>
                   <a href="https://www.zonaprop.com.ar/propiedades/b.html">ver</a></div>
            </div></body></html>"#
        );

        let listings = parse(&html, &ExtractOptions::default());
        let prices: Vec<u64> = listings.iter().map(|l| l.total_price()).collect();
        assert_eq!(prices, vec![240_000, 180_000]);
        assert_eq!(listings[0].title(), "Departamento 3 ambientes Palermo Soho");
        assert_eq!(listings[0].neighborhood(), "Palermo");
    }

    #[test]
    fn links_without_site_marker_are_ignored() {
        let html = r#"
            <div class="card">
              <h2>Departamento en Palermo</h2>
              <a href="https://wa.me/5491100000000">WhatsApp</a>
              <span>USD 150.000</span><span>50 m²</span>
            </div>"#;
        assert!(parse(html, &ExtractOptions::default()).is_empty());
    }

    #[test]
    fn slugify_folds_accents_and_spaces() {
        assert_eq!(slugify("Villa Crespo"), "villa-crespo");
        assert_eq!(slugify(" Núñez "), "nunez");
    }

    #[tokio::test]
    async fn blocked_site_degrades_to_empty_with_cause() {
        use crate::scraper::proxy::ProxyPool;
        use crate::scraper::session::{SessionManager, SessionSettings};
        use crate::tests::fakes::{FakeLauncher, FakeRoute};

        let launcher = FakeLauncher::new();
        launcher.route(
            "zonaprop.com.ar",
            FakeRoute::html("Access denied", "<html><body>Access denied</body></html>"),
        );
        let proxies = Arc::new(ProxyPool::direct());
        let sessions = SessionManager::new(
            Arc::new(launcher),
            Arc::clone(&proxies),
            SessionSettings::default(),
        );
        let navigator = Navigator::new(proxies);
        let options = ExtractOptions {
            navigate: NavigateOptions {
                max_retries: 1,
                timeout: Duration::from_secs(1),
                backoff_base: Duration::from_millis(1),
            },
            wait_timeout: Duration::from_millis(10),
            ..ExtractOptions::default()
        };

        let session = sessions.get_session().await.unwrap();
        let extraction = ZonapropExtractor
            .extract(&session, &navigator, &criteria(), &options)
            .await;

        assert!(extraction.listings.is_empty());
        assert!(matches!(extraction.failure, Some(ScraperError::Blocked(_))));
        assert!(extraction.into_result().is_err());
    }
}
