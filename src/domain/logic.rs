// src/domain/logic.rs

use std::collections::HashSet;

use crate::domain::criteria::SearchCriteria;
use crate::domain::listing::Listing;

/// Upper bound on listings handed back to the caller.
pub const MAX_RESULTS: usize = 25;

/// Titles are compared on this many normalized characters.
pub const DEDUP_PREFIX_CHARS: usize = 50;

/// Filters, deduplicates, ranks and truncates raw listings.
///
/// The stage order is fixed and each stage only sees the previous stage's
/// output, so running the pipeline on its own output changes nothing.
pub fn process(listings: Vec<Listing>, criteria: &SearchCriteria) -> Vec<Listing> {
    let filtered: Vec<Listing> = listings
        .into_iter()
        .filter(|l| in_requested_neighborhood(l, criteria))
        .filter(|l| !criteria.is_owner_only() || l.is_owner_listed())
        .filter(|l| within_ceiling(l, criteria))
        .collect();

    let mut unique = dedupe_by_title(filtered);

    // `sort_by_key` is stable, so equal prices keep input order.
    unique.sort_by_key(|l| l.price_per_area());
    unique.truncate(MAX_RESULTS);
    unique
}

fn in_requested_neighborhood(listing: &Listing, criteria: &SearchCriteria) -> bool {
    if criteria.wants_neighborhood(listing.neighborhood()) {
        return true;
    }
    let title = listing.title().to_lowercase();
    criteria
        .neighborhoods()
        .iter()
        .any(|n| title.contains(&n.to_lowercase()))
}

fn within_ceiling(listing: &Listing, criteria: &SearchCriteria) -> bool {
    match criteria.ceiling_for(listing.neighborhood()) {
        Some(max) => listing.price_per_area() <= max,
        None => true,
    }
}

/// Keeps the first listing per normalized title, in input order.
fn dedupe_by_title(listings: Vec<Listing>) -> Vec<Listing> {
    let mut seen = HashSet::new();
    listings
        .into_iter()
        .filter(|l| seen.insert(normalize_title(l.title())))
        .collect()
}

/// Lowercase, punctuation stripped, cut to [`DEDUP_PREFIX_CHARS`].
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect::<String>()
        .trim()
        .chars()
        .take(DEDUP_PREFIX_CHARS)
        .collect()
}
