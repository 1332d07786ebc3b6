//! Confirmation handler for the private channel
//!
//! The private channel carries both confirmations and bare health-check
//! probes; only payloads with a `callback_url` are answered.

use crate::catalog::Catalog;
use crate::pricing::PricingModel;
use crate::services::quote::QuotedParlays;
use crate::session::SessionManager;
use crate::types::{ConfirmationResponse, PriceConfirmRequest, PrivateEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ConfirmationHandler {
    sessions: Arc<SessionManager>,
    pricing: Arc<dyn PricingModel>,
    quoted: Arc<QuotedParlays>,
}

impl ConfirmationHandler {
    pub fn new(sessions: Arc<SessionManager>, pricing: Arc<dyn PricingModel>, quoted: Arc<QuotedParlays>) -> Self {
        Self {
            sessions,
            pricing,
            quoted,
        }
    }

    pub async fn on_private_event(&self, payload: Value, catalog: &Catalog) {
        match PrivateEvent::from_payload(payload) {
            Ok(PrivateEvent::Confirmation(request)) => self.on_confirm(request, catalog).await,
            Ok(PrivateEvent::HealthCheck { timestamp }) => {
                debug!("[Confirm] Health check from exchange (timestamp {:?})", timestamp);
            }
            Err(e) => warn!("[Confirm] Malformed confirmation payload: {}", e),
        }
    }

    /// Answer a confirmation. Delivery failures are logged, never retried.
    pub async fn on_confirm(&self, request: PriceConfirmRequest, catalog: &Catalog) {
        let line_ids = if request.market_lines.is_empty() {
            self.quoted.lines_for(&request.parlay_id).unwrap_or_else(|| {
                warn!("[Confirm] Parlay {} was not quoted by us; no line table", request.parlay_id);
                Vec::new()
            })
        } else {
            request.market_lines.iter().map(|l| l.line_id.clone()).collect()
        };

        let decision = self.pricing.confirm(&request, &line_ids, catalog);
        let response = ConfirmationResponse {
            action: decision.action,
            confirmed_odds: decision.confirmed_odds,
            price_probability: decision.buckets,
        };

        let auth = match self.sessions.fresh_auth_header().await {
            Ok(auth) => auth,
            Err(e) => {
                warn!("[Confirm] Cannot answer parlay {}: {}", request.parlay_id, e);
                return;
            }
        };

        match self
            .sessions
            .client()
            .post_callback(&auth, &request.callback_url, &response)
            .await
        {
            Ok(()) => info!(
                "[Confirm] {:?} parlay {} at odds {}",
                response.action, request.parlay_id, response.confirmed_odds
            ),
            Err(e) => warn!("[Confirm] Confirmation for parlay {} not accepted: {}", request.parlay_id, e),
        }
    }
}
