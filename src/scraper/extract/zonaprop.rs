// zonaprop.rs
use async_trait::async_trait;

use super::{slugify, SiteExtractor, SiteProfile};
use crate::domain::criteria::SearchCriteria;
use crate::domain::listing::Source;

const BASE_URL: &str = "https://www.zonaprop.com.ar";

static PROFILE: SiteProfile = SiteProfile {
    source: Source::Zonaprop,
    base_url: BASE_URL,
    card_selectors: &[
        r#"[data-qa="posting PROPERTY"]"#,
        ".posting-card",
        ".postingCard",
        ".posting-container",
        "[data-to-posting]",
        "article",
        ".list-card",
    ],
    title_selectors: &[
        r#"[data-qa="POSTING_TITLE"]"#,
        ".posting-title",
        "h2",
        "h3",
        ".title",
        ".postingCard-title",
    ],
    link_selectors: &[
        r#"a[data-qa="POSTING_TITLE"]"#,
        r#"a[href*="/propiedades/"]"#,
        r#"a[href*="/departamento-"]"#,
        "a[data-to-posting]",
        ".posting-title a",
        "h2 a",
        "h3 a",
    ],
    url_markers: &["/propiedades/", "/departamento-"],
    title_line_chars: (10, 100),
};

/// Zonaprop only has landing pages for some neighborhoods.
const SLUGS: &[(&str, &str)] = &[
    ("palermo", "palermo"),
    ("belgrano", "belgrano"),
    ("recoleta", "recoleta"),
    ("puerto-madero", "puerto-madero"),
    ("san-telmo", "san-telmo"),
    ("villa-crespo", "villa-crespo"),
    ("caballito", "caballito"),
    ("flores", "flores"),
    ("almagro", "almagro"),
    ("barracas", "barracas"),
];

pub struct ZonapropExtractor;

#[async_trait]
impl SiteExtractor for ZonapropExtractor {
    fn source(&self) -> Source {
        Source::Zonaprop
    }

    fn profile(&self) -> &SiteProfile {
        &PROFILE
    }

    fn search_url(&self, criteria: &SearchCriteria) -> String {
        let slug = criteria.neighborhoods().iter().find_map(|n| {
            let key = slugify(n);
            SLUGS.iter().find(|(k, _)| *k == key).map(|(_, slug)| *slug)
        });

        match slug {
            Some(slug) => format!("{BASE_URL}/departamentos-venta-{slug}.html"),
            None => format!("{BASE_URL}/departamentos-venta-capital-federal.html"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::listing::AreaProvenance;
    use crate::scraper::extract::ExtractOptions;

    const FIXTURE: &str = r#"
    <html><body>
      <div data-qa="posting PROPERTY" data-to-posting="/propiedades/depto-2-amb-palermo-5100.html">
        <div data-qa="POSTING_CARD_PRICE">USD 165.000</div>
        <div>Expensas $ 95.000</div>
        <div data-qa="POSTING_CARD_FEATURES"><span>58 m² tot.</span><span>2 amb.</span><span>Piso 7</span></div>
        <h2 data-qa="POSTING_TITLE">Departamento 2 ambientes en Palermo Hollywood</h2>
        <div>Publicado hace 3 días · Dueño directo</div>
        <div>Tel 11 4567-8901</div>
      </div>
      <div data-qa="posting PROPERTY">
        <div>U$S 99.000</div>
        <span>36 m²</span>
        <a title="Monoambiente luminoso en Belgrano" href="/propiedades/monoambiente-belgrano-5101.html">Ver</a>
        <div>Inmobiliaria Sur</div>
      </div>
      <div data-qa="posting PROPERTY">
        <div>Consultar precio</div>
        <span>70 m²</span>
        <a href="/propiedades/sin-precio-5102.html">Departamento sin precio en Palermo</a>
      </div>
    </body></html>"#;

    fn criteria(neighborhoods: &[&str]) -> SearchCriteria {
        SearchCriteria::new(neighborhoods.iter().copied()).unwrap()
    }

    #[test]
    fn search_url_uses_first_known_slug() {
        let ex = ZonapropExtractor;
        assert_eq!(
            ex.search_url(&criteria(&["Núñez", "Villa Crespo"])),
            "https://www.zonaprop.com.ar/departamentos-venta-villa-crespo.html"
        );
        assert_eq!(
            ex.search_url(&criteria(&["Chacarita"])),
            "https://www.zonaprop.com.ar/departamentos-venta-capital-federal.html"
        );
    }

    #[test]
    fn parses_injected_values_and_ignores_noise() {
        let listings =
            ZonapropExtractor.parse(FIXTURE, &criteria(&["Palermo"]), &ExtractOptions::default());
        assert_eq!(listings.len(), 2);

        let first = &listings[0];
        assert_eq!(first.title(), "Departamento 2 ambientes en Palermo Hollywood");
        assert_eq!(
            first.url(),
            "https://www.zonaprop.com.ar/propiedades/depto-2-amb-palermo-5100.html"
        );
        assert_eq!(first.total_price(), 165_000);
        assert_eq!(first.area_m2(), 58);
        assert_eq!(first.price_per_area(), 2845);
        assert_eq!(first.area_provenance(), AreaProvenance::Measured);
        assert_eq!(first.neighborhood(), "Palermo");
        assert!(first.is_owner_listed());
        assert!(first.id().starts_with("zonaprop-"));

        let second = &listings[1];
        assert_eq!(second.title(), "Monoambiente luminoso en Belgrano");
        assert_eq!(second.total_price(), 99_000);
        assert_eq!(second.area_m2(), 36);
        assert_eq!(second.neighborhood(), "Belgrano");
        assert!(!second.is_owner_listed());
    }

    #[test]
    fn every_listing_is_within_bands() {
        let options = ExtractOptions::default();
        for l in ZonapropExtractor.parse(FIXTURE, &criteria(&["Palermo"]), &options) {
            assert!(l.total_price() > 0);
            assert!(l.area_m2() > 0);
            assert!(options.bands.price_per_area.contains(u64::from(l.price_per_area())));
        }
    }
}
