//! Structural validation of a seeded catalog
//!
//! The two market layouts are checked with different strictness: a
//! `selections` market tolerates a missing line id, a `market_lines` market
//! does not. Markets with neither layout are only reported.

use super::{Catalog, Market, MarketLayout};
use crate::error::{Error, Result};
use tracing::{debug, info};

/// Tolerated irregularities found while validating
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub events: usize,
    pub markets: usize,
    /// `selections` markets whose selection is empty or has no line id on its first outcome
    pub missing_line_ids: usize,
    /// Empty selections skipped inside `market_lines`
    pub empty_selections: usize,
    /// Markets with neither `selections` nor `market_lines`
    pub unstructured_markets: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.missing_line_ids == 0 && self.empty_selections == 0 && self.unstructured_markets == 0
    }
}

/// Validate every market of every event. The first hard violation aborts.
pub fn validate_catalog(catalog: &Catalog) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();

    for (event_id, event) in &catalog.sport_events {
        report.events += 1;
        for market in &event.markets {
            validate_market(*event_id, market, &mut report)?;
        }
    }

    info!(
        "[Seed] Validated {} markets across {} events ({} missing line ids, {} empty selections, {} unstructured)",
        report.markets,
        report.events,
        report.missing_line_ids,
        report.empty_selections,
        report.unstructured_markets
    );
    Ok(report)
}

/// Validate a single market, recording tolerated issues in `report`
pub fn validate_market(event_id: i64, market: &Market, report: &mut ValidationReport) -> Result<()> {
    report.markets += 1;

    match market.layout() {
        MarketLayout::Selections(selections) => {
            if selections.is_empty() {
                return Err(violation(event_id, market, "selections is empty"));
            }
            for selection in selections {
                // upstream omits line ids on some selection markets
                if selection.first().and_then(|o| o.line_id.as_ref()).is_none() {
                    report.missing_line_ids += 1;
                }
            }
        }
        MarketLayout::Lines(lines) => {
            for (index, line) in lines.iter().enumerate() {
                let selections = match line.selections.as_deref() {
                    Some(selections) if !selections.is_empty() => selections,
                    _ => {
                        return Err(violation(
                            event_id,
                            market,
                            &format!("market_lines[{}] has no selections", index),
                        ))
                    }
                };
                for selection in selections {
                    let Some(first) = selection.first() else {
                        report.empty_selections += 1;
                        continue;
                    };
                    if first.line_id.is_none() {
                        return Err(violation(
                            event_id,
                            market,
                            &format!("market_lines[{}] selection is missing line_id", index),
                        ));
                    }
                }
            }
        }
        MarketLayout::Unstructured => {
            debug!(
                "[Seed] Market {:?} of event {} has neither selections nor market_lines",
                market.id, event_id
            );
            report.unstructured_markets += 1;
        }
    }

    Ok(())
}

fn violation(event_id: i64, market: &Market, reason: &str) -> Error {
    let reason = match market.id {
        Some(id) => format!("market {}: {}", id, reason),
        None => reason.to_string(),
    };
    Error::Validation { event_id, reason }
}
