//! Pricing policy behind the quote and confirmation handlers

use crate::catalog::Catalog;
use crate::types::{ConfirmAction, LinePrice, LineProbability, PriceConfirmRequest, PriceQuoteRequest, RiskBucket};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// An offer before the responder stamps its validity deadline
#[derive(Debug, Clone, PartialEq)]
pub struct PricedOffer {
    pub odds: i64,
    pub max_risk: Decimal,
    pub estimated_price: Vec<LinePrice>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmDecision {
    pub action: ConfirmAction,
    pub confirmed_odds: i64,
    pub buckets: Vec<RiskBucket>,
}

/// Decides what to offer and how to answer confirmations.
///
/// Called on the event-delivery path with the catalog snapshot current at
/// receipt; implementations must not block.
pub trait PricingModel: Send + Sync {
    fn offers(&self, request: &PriceQuoteRequest, catalog: &Catalog) -> Vec<PricedOffer>;

    fn confirm(&self, request: &PriceConfirmRequest, line_ids: &[String], catalog: &Catalog) -> ConfirmDecision;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceTier {
    pub odds: i64,
    pub max_risk: Decimal,
    /// Probability (and estimated price) assigned to every leg in this tier
    pub line_probability: f64,
}

/// Fixed tiers: one offer per tier, always accept at the requested odds
#[derive(Debug, Clone, PartialEq)]
pub struct TieredPricing {
    tiers: Vec<PriceTier>,
}

impl TieredPricing {
    pub fn new(tiers: Vec<PriceTier>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[PriceTier] {
        &self.tiers
    }
}

impl Default for TieredPricing {
    fn default() -> Self {
        Self::new(vec![
            PriceTier {
                odds: 100_000,
                max_risk: dec!(200),
                line_probability: 0.5,
            },
            PriceTier {
                odds: 800,
                max_risk: dec!(2000),
                line_probability: 0.4,
            },
        ])
    }
}

impl PricingModel for TieredPricing {
    fn offers(&self, request: &PriceQuoteRequest, _catalog: &Catalog) -> Vec<PricedOffer> {
        self.tiers
            .iter()
            .map(|tier| PricedOffer {
                odds: tier.odds,
                max_risk: tier.max_risk,
                estimated_price: request
                    .market_lines
                    .iter()
                    .map(|line| LinePrice {
                        line_id: line.line_id.clone(),
                        price: tier.line_probability,
                    })
                    .collect(),
            })
            .collect()
    }

    fn confirm(&self, request: &PriceConfirmRequest, line_ids: &[String], _catalog: &Catalog) -> ConfirmDecision {
        let buckets = self
            .tiers
            .iter()
            .map(|tier| RiskBucket {
                max_risk: tier.max_risk,
                lines: line_ids
                    .iter()
                    .map(|line_id| LineProbability {
                        line_id: line_id.clone(),
                        probability: tier.line_probability,
                    })
                    .collect(),
            })
            .collect();

        ConfirmDecision {
            action: ConfirmAction::Accept,
            confirmed_odds: request.odds,
            buckets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote_request() -> PriceQuoteRequest {
        serde_json::from_value(json!({
            "parlay_id": "p-1",
            "stake": 10,
            "callback_url": "https://cb.example/offers",
            "market_lines": [{"line_id": "a"}, {"line_id": "b"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_one_offer_per_tier() {
        let offers = TieredPricing::default().offers(&quote_request(), &Catalog::default());

        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].odds, 100_000);
        assert_eq!(offers[0].max_risk, dec!(200));
        assert_eq!(offers[1].odds, 800);
        assert_eq!(offers[1].max_risk, dec!(2000));
        for offer in &offers {
            let lines: Vec<&str> = offer.estimated_price.iter().map(|p| p.line_id.as_str()).collect();
            assert_eq!(lines, vec!["a", "b"]);
        }
    }

    #[test]
    fn test_confirm_accepts_requested_odds() {
        let request = PriceConfirmRequest {
            parlay_id: "p-1".to_string(),
            odds: 750,
            callback_url: "https://cb.example/confirm".to_string(),
            market_lines: Vec::new(),
        };
        let lines = vec!["a".to_string(), "b".to_string()];

        let decision = TieredPricing::default().confirm(&request, &lines, &Catalog::default());

        assert_eq!(decision.action, ConfirmAction::Accept);
        assert_eq!(decision.confirmed_odds, 750);
        assert_eq!(decision.buckets.len(), 2);
        assert_eq!(decision.buckets[0].lines[1].line_id, "b");
        assert_eq!(decision.buckets[1].max_risk, dec!(2000));
    }

    #[test]
    fn test_custom_tiers() {
        let pricing = TieredPricing::new(vec![PriceTier {
            odds: 500,
            max_risk: dec!(50),
            line_probability: 0.9,
        }]);
        let offers = pricing.offers(&quote_request(), &Catalog::default());
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].estimated_price[0].price, 0.9);
    }
}
