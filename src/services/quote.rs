//! Quote responder: answers broadcast pricing requests with priced offers

use crate::catalog::Catalog;
use crate::pricing::PricingModel;
use crate::session::SessionManager;
use crate::types::{Offer, OfferSubmission, PriceQuoteRequest};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Offers are never valid for less than this after receipt
pub const MIN_QUOTE_VALIDITY: Duration = Duration::from_secs(5);

/// How long a quoted parlay is remembered after its offers expire
const QUOTE_MEMORY_GRACE_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct QuotedEntry {
    line_ids: Vec<String>,
    forget_at: DateTime<Utc>,
}

/// Line ids of recently quoted parlays, for confirmations that omit them
#[derive(Debug, Default)]
pub struct QuotedParlays {
    entries: Mutex<HashMap<String, QuotedEntry>>,
}

impl QuotedParlays {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, parlay_id: &str, line_ids: Vec<String>, valid_until: DateTime<Utc>, now: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.forget_at > now);
        entries.insert(
            parlay_id.to_string(),
            QuotedEntry {
                line_ids,
                forget_at: valid_until + TimeDelta::seconds(QUOTE_MEMORY_GRACE_SECS),
            },
        );
    }

    pub fn lines_for(&self, parlay_id: &str) -> Option<Vec<String>> {
        self.entries.lock().get(parlay_id).map(|e| e.line_ids.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct QuoteResponder {
    sessions: Arc<SessionManager>,
    pricing: Arc<dyn PricingModel>,
    validity: Duration,
    quoted: Arc<QuotedParlays>,
}

impl QuoteResponder {
    pub fn new(
        sessions: Arc<SessionManager>,
        pricing: Arc<dyn PricingModel>,
        validity: Duration,
        quoted: Arc<QuotedParlays>,
    ) -> Self {
        Self {
            sessions,
            pricing,
            validity,
            quoted,
        }
    }

    /// Deadline for offers on a request received at `received_at`
    pub fn valid_until(&self, received_at: DateTime<Utc>) -> DateTime<Utc> {
        let validity = self.validity.max(MIN_QUOTE_VALIDITY);
        let millis = i64::try_from(validity.as_millis()).unwrap_or(i64::MAX);
        received_at + TimeDelta::milliseconds(millis)
    }

    /// Price a request; `None` when the pricing model declines to quote
    pub fn build_submission(
        &self,
        request: &PriceQuoteRequest,
        received_at: DateTime<Utc>,
        catalog: &Catalog,
    ) -> Option<OfferSubmission> {
        let valid_until = self
            .valid_until(received_at)
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX);

        let offers: Vec<Offer> = self
            .pricing
            .offers(request, catalog)
            .into_iter()
            .map(|priced| Offer {
                valid_until,
                odds: priced.odds,
                max_risk: priced.max_risk,
                estimated_price: priced.estimated_price,
            })
            .collect();

        if offers.is_empty() {
            return None;
        }
        Some(OfferSubmission {
            parlay_id: request.parlay_id.clone(),
            offers,
        })
    }

    /// Answer one pricing request. Delivery failures are logged, never retried.
    pub async fn on_quote_request(&self, request: PriceQuoteRequest, received_at: DateTime<Utc>, catalog: &Catalog) {
        let unknown = request
            .market_lines
            .iter()
            .filter(|line| !catalog.contains_line(&line.line_id))
            .count();
        if unknown > 0 {
            debug!(
                "[Quote] Parlay {} has {} lines outside the seeded catalog",
                request.parlay_id, unknown
            );
        }

        let Some(submission) = self.build_submission(&request, received_at, catalog) else {
            debug!("[Quote] No offers for parlay {}", request.parlay_id);
            return;
        };

        self.quoted.remember(
            &request.parlay_id,
            request.line_ids(),
            self.valid_until(received_at),
            received_at,
        );

        let auth = match self.sessions.fresh_auth_header().await {
            Ok(auth) => auth,
            Err(e) => {
                warn!("[Quote] Cannot answer parlay {}: {}", request.parlay_id, e);
                return;
            }
        };

        match self
            .sessions
            .client()
            .post_callback(&auth, &request.callback_url, &submission)
            .await
        {
            Ok(()) => info!(
                "[Quote] Sent {} offers for parlay {} (stake {})",
                submission.offers.len(),
                request.parlay_id,
                request.stake
            ),
            Err(e) => warn!("[Quote] Offers for parlay {} not accepted: {}", request.parlay_id, e),
        }
    }
}

/// Tell the exchange which lines the current catalog can price.
///
/// Returns whether the announcement was accepted; failure is not fatal.
pub async fn announce_supported_lines(sessions: &SessionManager, catalog: &Catalog) -> bool {
    let line_ids = catalog.supported_line_ids();
    let auth = match sessions.fresh_auth_header().await {
        Ok(auth) => auth,
        Err(e) => {
            warn!("[Quote] Cannot announce supported lines: {}", e);
            return false;
        }
    };

    match sessions.client().announce_supported_lines(&auth, &line_ids).await {
        Ok(()) => {
            info!("[Quote] Announced {} supported lines", line_ids.len());
            true
        }
        Err(e) => {
            warn!("[Quote] Supported lines announcement failed: {}", e);
            false
        }
    }
}
