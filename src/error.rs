//! Error taxonomy for the market-making client
//!
//! `ApiError` classifies a single exchange call from its status code and body
//! (or from the transport failure that prevented a response). `Error` is the
//! component-level taxonomy: which failures abort startup, which degrade.

use serde::Deserialize;
use thiserror::Error;

/// Structured exchange API errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Token rejected or expired
    #[error("request unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    /// Rate limited by the exchange
    #[error("rate limited by exchange")]
    RateLimited,
    /// Network/connection error (timeout, DNS, reset, ...)
    #[error("network error: {0}")]
    Network(String),
    /// Any other non-success status
    #[error("exchange returned {status}: {message}")]
    Status { status: u16, message: String },
    /// Success status but the body did not have the expected shape
    #[error("unexpected response body: {0}")]
    Decode(String),
    /// A server-supplied or configured URL could not be parsed
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Exchange error body format
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    /// Parse a non-success response into a structured error
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => parsed.error.or(parsed.message).unwrap_or_default(),
            Err(_) => body.to_string(),
        };

        let lower = message.to_lowercase();

        if status == 429 || lower.contains("rate limit") || lower.contains("too many requests") {
            return ApiError::RateLimited;
        }

        if status == 401 || status == 403 {
            return ApiError::Unauthorized { status, message };
        }

        ApiError::Status { status, message }
    }

    /// Parse a network/reqwest error
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Network("request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Network("connection failed".to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }

    /// No response was received at all
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// HTTP status, when the exchange answered
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { status, .. } | ApiError::Status { status, .. } => Some(*status),
            ApiError::RateLimited => Some(429),
            _ => None,
        }
    }
}

/// Component-level failures
#[derive(Debug, Error)]
pub enum Error {
    /// Login was refused; nothing else can run without a session
    #[error("authentication failed: {0}")]
    Auth(#[source] ApiError),

    /// An auth header was requested before any login completed
    #[error("no session: login has not completed")]
    NoSession,

    /// The catalog could not be seeded and there is no previous catalog to serve
    #[error("catalog seeding failed: {0}")]
    Seed(#[source] ApiError),

    /// A seeded catalog broke a structural invariant and was not published
    #[error("catalog validation failed for event {event_id}: {reason}")]
    Validation { event_id: i64, reason: String },

    /// The authorized channel set could not be mapped onto one broadcast and one private channel
    #[error("channel discovery failed: {0}")]
    ChannelDiscovery(String),

    /// The real-time transport failed or refused a subscription
    #[error("real-time transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type Result<T> = std::result::Result<T, Error>;
