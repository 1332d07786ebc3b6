//! Wire types for the quoting protocol and the real-time channel handshake

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One leg of a parlay pricing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotedLine {
    pub line_id: String,
    #[serde(default)]
    pub market_id: i64,
    #[serde(default)]
    pub outcome_id: i64,
    #[serde(default)]
    pub sport_event_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<f64>,
}

/// Parlay pricing request delivered on the broadcast channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceQuoteRequest {
    pub parlay_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub stake: Decimal,
    pub callback_url: String,
    #[serde(default)]
    pub market_lines: Vec<QuotedLine>,
    /// Exchange-side creation time, ns since epoch
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl PriceQuoteRequest {
    pub fn line_ids(&self) -> Vec<String> {
        self.market_lines.iter().map(|l| l.line_id.clone()).collect()
    }
}

/// Confirmation request delivered on the private channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceConfirmRequest {
    pub parlay_id: String,
    pub odds: i64,
    pub callback_url: String,
    /// Present on some confirmations; otherwise the quoted lines are used
    #[serde(default)]
    pub market_lines: Vec<QuotedLine>,
}

/// What arrived on the private channel
#[derive(Debug, Clone, PartialEq)]
pub enum PrivateEvent {
    Confirmation(PriceConfirmRequest),
    /// Keep-alive probe from the exchange; carries only a timestamp
    HealthCheck { timestamp: Option<i64> },
}

impl PrivateEvent {
    /// Payloads without a `callback_url` are health checks
    pub fn from_payload(payload: Value) -> Result<Self, serde_json::Error> {
        let has_callback = payload
            .get("callback_url")
            .map(|v| !v.is_null())
            .unwrap_or(false);

        if has_callback {
            Ok(PrivateEvent::Confirmation(serde_json::from_value(payload)?))
        } else {
            Ok(PrivateEvent::HealthCheck {
                timestamp: payload.get("timestamp").and_then(Value::as_i64),
            })
        }
    }
}

/// Estimated price of a single leg inside an offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinePrice {
    pub line_id: String,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    /// Expiry, ns since epoch
    pub valid_until: i64,
    pub odds: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub max_risk: Decimal,
    pub estimated_price: Vec<LinePrice>,
}

/// Body POSTed to a pricing request's callback URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferSubmission {
    pub parlay_id: String,
    pub offers: Vec<Offer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmAction {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineProbability {
    pub line_id: String,
    pub probability: f64,
}

/// Probability table for one max-risk bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskBucket {
    #[serde(with = "rust_decimal::serde::float")]
    pub max_risk: Decimal,
    pub lines: Vec<LineProbability>,
}

/// Body POSTed to a confirmation's callback URL
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationResponse {
    pub action: ConfirmAction,
    pub confirmed_odds: i64,
    pub price_probability: Vec<RiskBucket>,
}

/// Pub/sub connection parameters handed out by the exchange
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    pub key: String,
    pub cluster: String,
}

/// A channel this identity may join, with its bindable event names
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelGrant {
    pub channel_name: String,
    #[serde(default)]
    pub binding_events: Vec<String>,
}

/// An application event received on a subscribed channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    pub event: String,
    /// Raw event data, as a JSON string
    pub data: String,
}

impl ChannelEvent {
    /// Extract the `payload` object from the event data.
    ///
    /// Data without a `payload` key is returned as-is; a string-encoded
    /// payload is decoded once more.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        let mut data: Value = serde_json::from_str(&self.data)?;
        let payload = match data.get_mut("payload").map(Value::take) {
            Some(payload) => payload,
            None => data,
        };
        match payload {
            Value::String(encoded) => serde_json::from_str(&encoded),
            other => Ok(other),
        }
    }
}
