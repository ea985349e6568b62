// src/domain/listing.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::scraper::ScraperError;

/// The listing sites we crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    Zonaprop,
    Argenprop,
    MercadoLibre,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Zonaprop, Source::Argenprop, Source::MercadoLibre];

    /// Lowercase prefix used in listing ids and config keys.
    pub fn slug(&self) -> &'static str {
        match self {
            Source::Zonaprop => "zonaprop",
            Source::Argenprop => "argenprop",
            Source::MercadoLibre => "mercadolibre",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::Zonaprop => "Zonaprop",
            Source::Argenprop => "Argenprop",
            Source::MercadoLibre => "MercadoLibre",
        };
        f.write_str(name)
    }
}

/// Where a listing's area came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AreaProvenance {
    /// Parsed from an "N m²" token on the posting.
    Measured,
    /// Substituted from room-count keywords in the title.
    AssumedFromRoomCount,
}

/// A single normalized apartment posting.
///
/// Fields are private so a `Listing` can only come out of [`Listing::new`],
/// which refuses partially extracted candidates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    id: String,
    title: String,
    url: String,
    total_price: u64,
    area_m2: u32,
    price_per_area: u32,
    source: Source,
    neighborhood: String,
    is_owner_listed: bool,
    published_at: DateTime<Utc>,
    area_provenance: AreaProvenance,
}

/// Everything an extractor resolved for one candidate node.
#[derive(Debug, Clone)]
pub struct ListingDraft {
    pub title: String,
    pub url: String,
    pub total_price: u64,
    pub area_m2: u32,
    pub area_provenance: AreaProvenance,
    pub source: Source,
    pub neighborhood: String,
    pub is_owner_listed: bool,
    pub published_at: DateTime<Utc>,
}

impl Listing {
    /// Builds a listing once title, absolute url, price and area are all resolved.
    pub fn new(draft: ListingDraft) -> Result<Self, ScraperError> {
        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(ScraperError::Extraction("missing title".into()));
        }

        let url = Url::parse(draft.url.trim())
            .map_err(|e| ScraperError::Extraction(format!("invalid url {:?}: {e}", draft.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ScraperError::Extraction(format!(
                "url is not http(s): {url}"
            )));
        }

        if draft.total_price == 0 {
            return Err(ScraperError::Extraction("missing price".into()));
        }
        if draft.area_m2 == 0 {
            return Err(ScraperError::Extraction("missing area".into()));
        }

        let url = url.to_string();
        Ok(Self {
            id: listing_id(draft.source, &url),
            price_per_area: price_per_area(draft.total_price, draft.area_m2),
            title,
            url,
            total_price: draft.total_price,
            area_m2: draft.area_m2,
            source: draft.source,
            neighborhood: draft.neighborhood,
            is_owner_listed: draft.is_owner_listed,
            published_at: draft.published_at,
            area_provenance: draft.area_provenance,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn total_price(&self) -> u64 {
        self.total_price
    }

    pub fn area_m2(&self) -> u32 {
        self.area_m2
    }

    pub fn price_per_area(&self) -> u32 {
        self.price_per_area
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn neighborhood(&self) -> &str {
        &self.neighborhood
    }

    pub fn is_owner_listed(&self) -> bool {
        self.is_owner_listed
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn area_provenance(&self) -> AreaProvenance {
        self.area_provenance
    }
}

/// Total price divided by area, rounded half away from zero.
pub fn price_per_area(total_price: u64, area_m2: u32) -> u32 {
    if area_m2 == 0 {
        return 0;
    }
    let area = u64::from(area_m2);
    let rounded = (total_price + area / 2) / area;
    u32::try_from(rounded).unwrap_or(u32::MAX)
}

/// Source-prefixed id, stable across runs for the same posting url.
fn listing_id(source: Source, url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("{}-{hex}", source.slug())
}

#[cfg(test)]
pub(crate) fn sample_listing(
    title: &str,
    neighborhood: &str,
    total_price: u64,
    area_m2: u32,
    is_owner_listed: bool,
) -> Listing {
    let slug: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    Listing::new(ListingDraft {
        title: title.to_string(),
        url: format!("https://www.zonaprop.com.ar/propiedades/{slug}-{total_price}.html"),
        total_price,
        area_m2,
        area_provenance: AreaProvenance::Measured,
        source: Source::Zonaprop,
        neighborhood: neighborhood.to_string(),
        is_owner_listed,
        published_at: Utc::now(),
    })
    .expect("sample listing must be valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ListingDraft {
        ListingDraft {
            title: "Departamento 2 ambientes en Palermo".to_string(),
            url: "https://www.zonaprop.com.ar/propiedades/depto-palermo-123.html".to_string(),
            total_price: 165_000,
            area_m2: 58,
            area_provenance: AreaProvenance::Measured,
            source: Source::Zonaprop,
            neighborhood: "Palermo".to_string(),
            is_owner_listed: true,
            published_at: Utc::now(),
        }
    }

    #[test]
    fn price_per_area_is_rounded() {
        assert_eq!(price_per_area(165_000, 58), 2845);
        assert_eq!(price_per_area(100_001, 2), 50_001);
        assert_eq!(price_per_area(100, 0), 0);
    }

    #[test]
    fn new_listing_derives_id_and_price_per_area() {
        let listing = Listing::new(draft()).unwrap();
        assert_eq!(listing.price_per_area(), 2845);
        assert!(listing.id().starts_with("zonaprop-"));
        assert_eq!(listing.id().len(), "zonaprop-".len() + 12);

        // Same url, same id.
        let again = Listing::new(draft()).unwrap();
        assert_eq!(listing.id(), again.id());
    }

    #[test]
    fn partial_candidates_are_rejected() {
        let mut no_title = draft();
        no_title.title = "   ".into();
        assert!(Listing::new(no_title).is_err());

        let mut relative = draft();
        relative.url = "/propiedades/depto.html".into();
        assert!(Listing::new(relative).is_err());

        let mut free = draft();
        free.total_price = 0;
        assert!(Listing::new(free).is_err());

        let mut no_area = draft();
        no_area.area_m2 = 0;
        assert!(Listing::new(no_area).is_err());
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let listing = Listing::new(draft()).unwrap();
        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["pricePerArea"], 2845);
        assert_eq!(json["areaM2"], 58);
        assert_eq!(json["isOwnerListed"], true);
        assert_eq!(json["source"], "Zonaprop");
        assert_eq!(json["areaProvenance"], "measured");
    }
}
