//! Tradeable catalog: tournaments, sport events and their markets
//!
//! A `Catalog` is built wholesale by one seeding pass and is read-only after
//! that. Consumers read it through `CatalogStore`, which swaps whole snapshots
//! so a reader never observes a catalog mid-rebuild.

mod seeder;
mod validation;

pub use seeder::{CatalogSeeder, TournamentFilter};
pub use validation::{validate_catalog, validate_market, ValidationReport};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SportEvent {
    pub event_id: i64,
    #[serde(default)]
    pub name: String,
    /// Filled in from the markets endpoint during seeding
    #[serde(default)]
    pub markets: Vec<Market>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// One outcome record inside a selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_id: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Ordered outcome records; the first one carries the canonical line id
pub type Selection = Vec<Outcome>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selections: Option<Vec<Selection>>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// A market as delivered by the exchange.
///
/// The exchange uses two distinct layouts; use [`Market::layout`] rather than
/// the raw fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selections: Option<Vec<Selection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_lines: Option<Vec<MarketLine>>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// The structural variant of a market
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarketLayout<'a> {
    /// `selections` directly on the market
    Selections(&'a [Selection]),
    /// `market_lines`, each with its own `selections`
    Lines(&'a [MarketLine]),
    /// Neither field present
    Unstructured,
}

impl Market {
    pub fn layout(&self) -> MarketLayout<'_> {
        if let Some(selections) = &self.selections {
            MarketLayout::Selections(selections)
        } else if let Some(lines) = &self.market_lines {
            MarketLayout::Lines(lines)
        } else {
            MarketLayout::Unstructured
        }
    }

    /// Canonical line ids: the first outcome of every non-empty selection
    pub fn line_ids(&self) -> Vec<&str> {
        match self.layout() {
            MarketLayout::Selections(selections) => first_line_ids(selections),
            MarketLayout::Lines(lines) => lines
                .iter()
                .filter_map(|l| l.selections.as_deref())
                .flat_map(first_line_ids)
                .collect(),
            MarketLayout::Unstructured => Vec::new(),
        }
    }
}

fn first_line_ids(selections: &[Selection]) -> Vec<&str> {
    selections
        .iter()
        .filter_map(|s| s.first())
        .filter_map(|o| o.line_id.as_deref())
        .collect()
}

/// The unit that seeding produces, validation checks and quoting reads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    /// Every tournament the exchange listed in this pass
    pub tournaments: Vec<Tournament>,
    /// Tournaments admitted by the interest filter, keyed by id
    pub my_tournaments: BTreeMap<i64, Tournament>,
    /// Events with their markets, keyed by event id
    pub sport_events: BTreeMap<i64, SportEvent>,
    line_index: BTreeSet<String>,
}

impl Catalog {
    pub fn new(tournaments: Vec<Tournament>) -> Self {
        Self {
            tournaments,
            ..Default::default()
        }
    }

    pub fn market_count(&self) -> usize {
        self.sport_events.values().map(|e| e.markets.len()).sum()
    }

    fn collect_line_ids(&self) -> BTreeSet<String> {
        self.sport_events
            .values()
            .flat_map(|e| e.markets.iter())
            .flat_map(|m| m.line_ids())
            .map(str::to_string)
            .collect()
    }

    /// Sorted, de-duplicated line ids across every market in the catalog
    pub fn supported_line_ids(&self) -> Vec<String> {
        self.collect_line_ids().into_iter().collect()
    }

    /// Build the lookup behind `contains_line`. `CatalogStore::replace` does
    /// this once per published snapshot.
    pub fn index_lines(&mut self) {
        self.line_index = self.collect_line_ids();
    }

    /// Whether a line is priced by this catalog, as of the last `index_lines`
    pub fn contains_line(&self, line_id: &str) -> bool {
        self.line_index.contains(line_id)
    }
}

/// Snapshot holder for the current catalog
#[derive(Debug, Default)]
pub struct CatalogStore {
    current: RwLock<Option<Arc<Catalog>>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest published catalog, if any seeding pass has completed
    pub fn current(&self) -> Option<Arc<Catalog>> {
        self.current.read().clone()
    }

    /// Publish a new catalog, replacing the previous snapshot wholesale
    pub fn replace(&self, mut catalog: Catalog) -> Arc<Catalog> {
        catalog.index_lines();
        let snapshot = Arc::new(catalog);
        *self.current.write() = Some(snapshot.clone());
        snapshot
    }

    pub fn is_seeded(&self) -> bool {
        self.current.read().is_some()
    }
}
