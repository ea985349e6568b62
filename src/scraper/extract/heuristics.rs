// heuristics.rs
//
// Text heuristics shared by every site extractor: price and area regexes
// with plausibility bands, ownership and neighborhood inference, title
// line scanning and relative publication dates.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Inclusive plausibility range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Band {
    pub min: u64,
    pub max: u64,
}

impl Band {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bands {
    pub price: Band,
    pub area: Band,
    pub price_per_area: Band,
}

impl Default for Bands {
    fn default() -> Self {
        Self {
            price: Band::new(50_000, 5_000_000),
            area: Band::new(15, 500),
            price_per_area: Band::new(500, 15_000),
        }
    }
}

/// Catch-all label when no neighborhood can be inferred.
pub const DEFAULT_NEIGHBORHOOD: &str = "CABA";

pub const GAZETTEER: &[&str] = &[
    "Palermo",
    "Belgrano",
    "Recoleta",
    "Puerto Madero",
    "San Telmo",
    "La Boca",
    "Villa Crespo",
    "Caballito",
    "Flores",
    "Almagro",
    "Balvanera",
    "Retiro",
    "Microcentro",
    "Monserrat",
    "Barracas",
    "Villa Urquiza",
    "Núñez",
    "Colegiales",
    "Chacarita",
    "Villa Devoto",
];

const OWNER_KEYWORDS: &[&str] = &["dueno", "directo", "particular"];
const TITLE_KEYWORDS: &[&str] = &["departamento", "ambiente", "monoambiente", "venta"];

// Tried in order; the first match inside the band wins.
static PRICE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)USD?\s*([\d.,]+)",
        r"(?i)U\$S\s*([\d.,]+)",
        r"\$\s*([\d.,]+)",
        r"(?i)([\d.,]+)\s*USD",
        r"(?i)([\d.,]+)\s*d[oó]lares",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static AREA_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(\d+(?:[.,]\d+)?)\s*m²",
        r"(?i)(\d+(?:[.,]\d+)?)\s*m2\b",
        r"(?i)superficie[:\s]*(\d+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static ROOM_COUNT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\b([1-3])\s*amb(?:iente)?s?\b").ok());

static HACE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"hace\s+(\d+|un|una)\s+(minuto|hora|dia|semana|mes)").ok()
});

static HOY: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\bhoy\b").ok());
static AYER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\bayer\b").ok());

/// Lowercases and strips Spanish diacritics so "Núñez" matches "nunez".
pub fn fold(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// First currency-marked amount inside the price band. Thousands
/// separators are dropped, so "USD 150.000" reads as 150000.
pub fn extract_price(text: &str, band: Band) -> Option<u64> {
    PRICE_PATTERNS.iter().find_map(|re| {
        re.captures_iter(text).find_map(|caps| {
            let digits: String = caps
                .get(1)?
                .as_str()
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            let value: u64 = digits.parse().ok()?;
            band.contains(value).then_some(value)
        })
    })
}

/// First "<n> m²" style area inside the band, rounded to whole meters.
pub fn extract_area(text: &str, band: Band) -> Option<u32> {
    AREA_PATTERNS.iter().find_map(|re| {
        re.captures_iter(text).find_map(|caps| {
            let raw = caps.get(1)?.as_str().replace(',', ".");
            let value: f64 = raw.parse().ok()?;
            let rounded = value.round();
            if rounded < 0.0 || rounded > f64::from(u32::MAX) {
                return None;
            }
            let area = rounded as u32;
            band.contains(u64::from(area)).then_some(area)
        })
    })
}

/// Area assumed from room-count keywords: monoambiente or 1 ambiente is
/// 35 m², 2 ambientes 55 m², 3 ambientes 75 m². Only used when the
/// caller opted in.
pub fn area_from_room_count(title: &str) -> Option<u32> {
    let folded = fold(title);
    if folded.contains("monoambiente") {
        return Some(35);
    }
    let caps = ROOM_COUNT.as_ref()?.captures(&folded)?;
    match caps.get(1)?.as_str() {
        "1" => Some(35),
        "2" => Some(55),
        "3" => Some(75),
        _ => None,
    }
}

pub fn is_owner_listed(text: &str) -> bool {
    let folded = fold(text);
    OWNER_KEYWORDS.iter().any(|k| folded.contains(k))
}

/// Requested neighborhoods win over the gazetteer, and the title is
/// searched before the rest of the card text.
pub fn infer_neighborhood(title: &str, text: &str, requested: &[String]) -> String {
    let title = fold(title);
    let text = fold(text);

    for haystack in [&title, &text] {
        if let Some(n) = requested.iter().find(|n| haystack.contains(&fold(n))) {
            return n.clone();
        }
    }
    for haystack in [&title, &text] {
        if let Some(n) = GAZETTEER.iter().find(|n| haystack.contains(&fold(n))) {
            return n.to_string();
        }
    }
    DEFAULT_NEIGHBORHOOD.to_string()
}

/// Whether a line is a price or area token rather than prose.
pub fn looks_like_price_or_area(line: &str) -> bool {
    let lower = line.to_lowercase();
    if lower.contains("usd") || lower.contains("u$s") || lower.contains('$') {
        return true;
    }
    if lower.contains("m²") || AREA_PATTERNS.iter().any(|re| re.is_match(&lower)) {
        return true;
    }
    let total = lower.chars().filter(|c| !c.is_whitespace()).count();
    let numeric = lower.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',').count();
    total > 0 && numeric * 2 > total
}

/// Scans text lines for one that reads like a posting title.
/// `min_chars` and `max_chars` are exclusive bounds on the line length.
pub fn title_from_lines(text: &str, min_chars: usize, max_chars: usize) -> Option<String> {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| {
            let len = l.chars().count();
            len > min_chars && len < max_chars
        })
        .find(|l| {
            let folded = fold(l);
            TITLE_KEYWORDS.iter().any(|k| folded.contains(k)) && !looks_like_price_or_area(l)
        })
}

/// Best-effort publication date from relative phrases like "hace 3 días".
pub fn parse_published_at(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let folded = fold(text);

    if let Some(caps) = HACE.as_ref().and_then(|re| re.captures(&folded)) {
        let amount: i64 = match caps.get(1)?.as_str() {
            "un" | "una" => 1,
            n => n.parse().ok()?,
        };
        let delta = match caps.get(2)?.as_str() {
            "minuto" => Duration::minutes(amount),
            "hora" => Duration::hours(amount),
            "dia" => Duration::days(amount),
            "semana" => Duration::weeks(amount),
            "mes" => Duration::days(amount * 30),
            _ => return None,
        };
        return Some(now - delta);
    }
    if AYER.as_ref().is_some_and(|re| re.is_match(&folded)) {
        return Some(now - Duration::days(1));
    }
    if HOY.as_ref().is_some_and(|re| re.is_match(&folded)) {
        return Some(now);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_ignores_noise_outside_band() {
        let b = Bands::default().price;
        assert_eq!(extract_price("USD 150.000 · 2 ambientes", b), Some(150_000));
        assert_eq!(extract_price("U$S 98,500", b), Some(98_500));
        assert_eq!(extract_price("Precio 210.000 USD", b), Some(210_000));
        assert_eq!(extract_price("Tel 11 4567-8901 · USD 12 · USD 320.000", b), Some(320_000));
        assert_eq!(extract_price("Expensas USD 900", b), None);
        assert_eq!(extract_price("Piso 12, 4 dormitorios", b), None);
    }

    #[test]
    fn area_accepts_m2_variants_in_band() {
        let b = Bands::default().area;
        assert_eq!(extract_area("55 m² totales", b), Some(55));
        assert_eq!(extract_area("45,5m2 cubiertos", b), Some(46));
        assert_eq!(extract_area("Superficie: 72", b), Some(72));
        assert_eq!(extract_area("Lote 1200 m² · 80 m²", b), Some(80));
        assert_eq!(extract_area("3 m² de balcón", b), None);
    }

    #[test]
    fn room_count_defaults() {
        assert_eq!(area_from_room_count("Monoambiente en Almagro"), Some(35));
        assert_eq!(area_from_room_count("Depto 1 ambiente"), Some(35));
        assert_eq!(area_from_room_count("Hermoso 2 ambientes con balcón"), Some(55));
        assert_eq!(area_from_room_count("3 amb. reciclado"), Some(75));
        assert_eq!(area_from_room_count("Casa 12 ambientes"), None);
        assert_eq!(area_from_room_count("PH con terraza"), None);
    }

    #[test]
    fn owner_keywords_ignore_accents() {
        assert!(is_owner_listed("Vende DUEÑO directo"));
        assert!(is_owner_listed("Sin comisión, dueno"));
        assert!(is_owner_listed("Particular vende"));
        assert!(!is_owner_listed("Inmobiliaria Pérez"));
    }

    #[test]
    fn neighborhood_prefers_requested_then_gazetteer() {
        let requested = vec!["Villa Crespo".to_string()];
        assert_eq!(
            infer_neighborhood("Depto en Palermo", "Limite con villa crespo", &requested),
            "Villa Crespo"
        );
        assert_eq!(infer_neighborhood("Depto en Palermo", "", &requested), "Palermo");
        assert_eq!(infer_neighborhood("Depto en nunez", "", &[]), "Núñez");
        assert_eq!(infer_neighborhood("Depto luminoso", "sin datos", &[]), DEFAULT_NEIGHBORHOOD);
    }

    #[test]
    fn title_scan_skips_price_lines() {
        let text = "USD 150.000\n  55 m²  \nDepartamento 2 ambientes en Palermo\nVer más";
        assert_eq!(
            title_from_lines(text, 10, 100).as_deref(),
            Some("Departamento 2 ambientes en Palermo")
        );
        assert_eq!(title_from_lines("USD 150.000 departamento venta", 10, 100), None);
        assert_eq!(title_from_lines("venta", 10, 100), None);
    }

    #[test]
    fn relative_dates() {
        let now = Utc::now();
        assert_eq!(
            parse_published_at("Publicado hace 3 días", now),
            Some(now - Duration::days(3))
        );
        assert_eq!(
            parse_published_at("Publicado hace una semana", now),
            Some(now - Duration::weeks(1))
        );
        assert_eq!(parse_published_at("Publicado ayer", now), Some(now - Duration::days(1)));
        assert_eq!(parse_published_at("Publicado hoy", now), Some(now));
        assert_eq!(parse_published_at("Sin fecha", now), None);
    }
}
