// src/domain/criteria.rs

use std::collections::HashMap;

use serde::Serialize;

/// What the caller is looking for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    /// Requested neighborhoods with set semantics, first-seen order kept
    /// because extractors build their search url from the first entry.
    neighborhoods: Vec<String>,
    per_neighborhood_max_price_per_area: HashMap<String, u32>,
    global_max_price_per_area: Option<u32>,
    owner_only: bool,
}

impl SearchCriteria {
    /// Returns `None` when no usable neighborhood remains after trimming.
    pub fn new<I, S>(neighborhoods: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for n in neighborhoods {
            let n = n.as_ref().trim();
            if n.is_empty() {
                continue;
            }
            if !unique.iter().any(|u| u.eq_ignore_ascii_case(n)) {
                unique.push(n.to_string());
            }
        }

        if unique.is_empty() {
            return None;
        }

        Some(Self {
            neighborhoods: unique,
            per_neighborhood_max_price_per_area: HashMap::new(),
            global_max_price_per_area: None,
            owner_only: false,
        })
    }

    pub fn with_neighborhood_max(mut self, neighborhood: &str, max_price_per_area: u32) -> Self {
        let neighborhood = neighborhood.trim();
        if !neighborhood.is_empty() && max_price_per_area > 0 {
            self.per_neighborhood_max_price_per_area
                .insert(neighborhood.to_lowercase(), max_price_per_area);
        }
        self
    }

    /// A zero ceiling means "no ceiling", as the search form sends it.
    pub fn with_global_max(mut self, max_price_per_area: Option<u32>) -> Self {
        self.global_max_price_per_area = max_price_per_area.filter(|m| *m > 0);
        self
    }

    pub fn owner_only(mut self, owner_only: bool) -> Self {
        self.owner_only = owner_only;
        self
    }

    pub fn neighborhoods(&self) -> &[String] {
        &self.neighborhoods
    }

    pub fn is_owner_only(&self) -> bool {
        self.owner_only
    }

    pub fn first_neighborhood(&self) -> &str {
        // `new` guarantees at least one entry.
        self.neighborhoods.first().map(String::as_str).unwrap_or("")
    }

    /// Case-insensitive membership in the requested set.
    pub fn wants_neighborhood(&self, neighborhood: &str) -> bool {
        self.neighborhoods
            .iter()
            .any(|n| n.to_lowercase() == neighborhood.to_lowercase())
    }

    /// Price-per-area ceiling for a neighborhood: its own entry wins, then
    /// the global max, otherwise no ceiling at all.
    pub fn ceiling_for(&self, neighborhood: &str) -> Option<u32> {
        self.per_neighborhood_max_price_per_area
            .get(&neighborhood.to_lowercase())
            .copied()
            .or(self.global_max_price_per_area)
    }
}
