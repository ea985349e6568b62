// argenprop.rs
use async_trait::async_trait;

use super::{slugify, SiteExtractor, SiteProfile};
use crate::domain::criteria::SearchCriteria;
use crate::domain::listing::Source;

const BASE_URL: &str = "https://www.argenprop.com";

static PROFILE: SiteProfile = SiteProfile {
    source: Source::Argenprop,
    base_url: BASE_URL,
    card_selectors: &[
        ".listing-item",
        ".card-property",
        ".property-item",
        ".listing__item",
        "[data-item-id]",
        "article",
    ],
    title_selectors: &[
        ".title a",
        "h2 a",
        "h3 a",
        ".listing__title a",
        ".card-title a",
        ".card__title",
        ".title",
        "h2",
        "h3",
        ".listing__title",
        ".card-title",
    ],
    link_selectors: &[
        ".title a",
        "h2 a",
        "h3 a",
        r#"a[href*="/departamento-"]"#,
        r#"a[href*="/inmueble/"]"#,
        "a.card",
    ],
    url_markers: &["/departamento-", "/inmueble/"],
    title_line_chars: (15, 150),
};

pub struct ArgenpropExtractor;

#[async_trait]
impl SiteExtractor for ArgenpropExtractor {
    fn source(&self) -> Source {
        Source::Argenprop
    }

    fn profile(&self) -> &SiteProfile {
        &PROFILE
    }

    fn search_url(&self, criteria: &SearchCriteria) -> String {
        format!(
            "{BASE_URL}/departamento-venta-localidad-capital-federal-barrio-{}",
            slugify(criteria.first_neighborhood())
        )
    }
}
