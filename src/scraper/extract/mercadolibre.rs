// mercadolibre.rs
use async_trait::async_trait;

use super::{slugify, SiteExtractor, SiteProfile};
use crate::domain::criteria::SearchCriteria;
use crate::domain::listing::Source;

const BASE_URL: &str = "https://inmuebles.mercadolibre.com.ar";

static PROFILE: SiteProfile = SiteProfile {
    source: Source::MercadoLibre,
    base_url: BASE_URL,
    card_selectors: &[
        ".ui-search-result",
        ".ui-search-layout__item",
        ".results-item",
        ".andes-card",
        "article",
    ],
    title_selectors: &[
        ".ui-search-item__title a",
        ".ui-search-result__content-title a",
        "h2 a",
        ".ui-search-item__title",
        ".ui-search-result__content-title",
        ".poly-component__title",
    ],
    link_selectors: &[
        ".ui-search-item__title a",
        ".ui-search-result__content-title a",
        "h2 a",
        "a.poly-component__title",
        r#"a[href*="MLA-"]"#,
        r#"a[href*="inmuebles.mercadolibre"]"#,
    ],
    url_markers: &["MLA-", "inmuebles.mercadolibre"],
    title_line_chars: (15, 150),
};

pub struct MercadoLibreExtractor;

#[async_trait]
impl SiteExtractor for MercadoLibreExtractor {
    fn source(&self) -> Source {
        Source::MercadoLibre
    }

    fn profile(&self) -> &SiteProfile {
        &PROFILE
    }

    fn search_url(&self, criteria: &SearchCriteria) -> String {
        format!(
            "{BASE_URL}/departamentos/venta/capital-federal/{}/",
            slugify(criteria.first_neighborhood())
        )
    }
}
