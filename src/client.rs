//! REST client for the exchange
//!
//! `ExchangeClient` speaks the exchange's endpoints in typed form; the actual
//! HTTP exchange goes through an `HttpTransport` so the protocol logic above
//! it does not depend on a particular HTTP stack.

use crate::catalog::{Market, SportEvent, Tournament};
use crate::config::{Credentials, ExchangeApi};
use crate::error::ApiError;
use crate::session::{RefreshedToken, Session};
use crate::types::{ChannelGrant, ConnectionConfig};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// `Authorization` header value for an authenticated call
#[derive(Clone, PartialEq, Eq)]
pub struct AuthHeader(String);

impl AuthHeader {
    pub fn bearer(access_token: &str) -> Self {
        Self(format!("Bearer {}", access_token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthHeader(Bearer <redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub auth: Option<AuthHeader>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-success response into an `ApiError`
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_response(self.status, &self.body))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Executes one HTTP request against the outside world
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// Production transport backed by reqwest
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::from_network_error(&e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut builder = self.client.request(request.method, request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(auth) = &request.auth {
            builder = builder.header(AUTHORIZATION, auth.as_str());
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Form(fields) => builder.form(fields),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::from_network_error(&e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::from_network_error(&e))?;

        Ok(ApiResponse { status, body })
    }
}

/// Standard `{ "data": ... }` response wrapper
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

/// Some endpoints answer bare, some wrapped
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MaybeWrapped<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> MaybeWrapped<T> {
    fn into_inner(self) -> T {
        match self {
            MaybeWrapped::Wrapped { data } => data,
            MaybeWrapped::Bare(inner) => inner,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TournamentsData {
    #[serde(default)]
    tournaments: Option<Vec<Tournament>>,
}

#[derive(Debug, Deserialize)]
struct SportEventsData {
    #[serde(default)]
    sport_events: Option<Vec<SportEvent>>,
}

#[derive(Debug, Deserialize)]
struct MarketsData {
    #[serde(default)]
    markets: Option<Vec<Market>>,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    #[serde(default, with = "rust_decimal::serde::float_option")]
    balance: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct RegisterData {
    #[serde(default)]
    authorized_channel: Vec<ChannelGrant>,
}

#[derive(Debug, Deserialize)]
struct ChannelSignature {
    auth: String,
}

#[derive(Debug, Serialize)]
struct SupportedLines<'a> {
    supported_lines: &'a [String],
}

/// Typed client for the exchange REST API
#[derive(Clone)]
pub struct ExchangeClient {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
}

impl ExchangeClient {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: &str) -> Result<Self, ApiError> {
        // a trailing slash keeps `join` from replacing the last path segment
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|e| ApiError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { transport, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::InvalidUrl {
                url: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        query: Vec<(String, String)>,
        auth: Option<&AuthHeader>,
        body: Body,
    ) -> Result<ApiResponse, ApiError> {
        debug!("{} {}", method, url);
        let request = ApiRequest {
            method,
            url,
            query,
            auth: auth.cloned(),
            body,
        };
        self.transport.execute(request).await?.error_for_status()
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Vec<(String, String)>,
        auth: &AuthHeader,
    ) -> Result<Option<T>, ApiError> {
        let url = self.endpoint(path)?;
        let response = self.send(Method::GET, url, query, Some(auth), Body::Empty).await?;
        Ok(response.json::<Envelope<T>>()?.data)
    }

    /// Exchange the long-lived key pair for a session
    pub async fn login(&self, credentials: &Credentials) -> Result<Session, ApiError> {
        let body = json!({
            "access_key": credentials.access_key,
            "secret_key": credentials.secret_key,
        });
        let url = self.endpoint(ExchangeApi::LOGIN)?;
        let response = self.send(Method::POST, url, Vec::new(), None, Body::Json(body)).await?;
        response
            .json::<Envelope<Session>>()?
            .data
            .ok_or_else(|| ApiError::Decode("login response has no session data".to_string()))
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh(&self, auth: &AuthHeader, refresh_token: &str) -> Result<RefreshedToken, ApiError> {
        let url = self.endpoint(ExchangeApi::REFRESH)?;
        let body = json!({ "refresh_token": refresh_token });
        let response = self
            .send(Method::POST, url, Vec::new(), Some(auth), Body::Json(body))
            .await?;
        response
            .json::<Envelope<RefreshedToken>>()?
            .data
            .ok_or_else(|| ApiError::Decode("refresh response has no token data".to_string()))
    }

    pub async fn tournaments(&self, auth: &AuthHeader) -> Result<Vec<Tournament>, ApiError> {
        let data: Option<TournamentsData> = self.get_data(ExchangeApi::TOURNAMENTS, Vec::new(), auth).await?;
        Ok(data.and_then(|d| d.tournaments).unwrap_or_default())
    }

    /// Events of one tournament; `None` when the exchange returns no event list
    pub async fn sport_events(
        &self,
        auth: &AuthHeader,
        tournament_id: i64,
    ) -> Result<Option<Vec<SportEvent>>, ApiError> {
        let query = vec![("tournament_id".to_string(), tournament_id.to_string())];
        let data: Option<SportEventsData> = self.get_data(ExchangeApi::SPORT_EVENTS, query, auth).await?;
        Ok(data.and_then(|d| d.sport_events))
    }

    /// Markets of one event; `None` when the exchange returns no market list
    pub async fn markets(&self, auth: &AuthHeader, event_id: i64) -> Result<Option<Vec<Market>>, ApiError> {
        let query = vec![("event_id".to_string(), event_id.to_string())];
        let data: Option<MarketsData> = self.get_data(ExchangeApi::MARKETS, query, auth).await?;
        Ok(data.and_then(|d| d.markets))
    }

    pub async fn balance(&self, auth: &AuthHeader) -> Result<Decimal, ApiError> {
        let data: Option<BalanceData> = self.get_data(ExchangeApi::BALANCE, Vec::new(), auth).await?;
        Ok(data.and_then(|d| d.balance).unwrap_or_default())
    }

    /// Pub/sub key and cluster for this identity
    pub async fn connection_config(&self, auth: &AuthHeader) -> Result<ConnectionConfig, ApiError> {
        let url = self.endpoint(ExchangeApi::CONNECTION_CONFIG)?;
        let response = self.send(Method::GET, url, Vec::new(), Some(auth), Body::Empty).await?;
        Ok(response.json::<MaybeWrapped<ConnectionConfig>>()?.into_inner())
    }

    /// Channels this socket may join
    pub async fn register_socket(&self, auth: &AuthHeader, socket_id: &str) -> Result<Vec<ChannelGrant>, ApiError> {
        let url = self.endpoint(ExchangeApi::REGISTER)?;
        let form = vec![("socket_id".to_string(), socket_id.to_string())];
        let response = self
            .send(Method::POST, url, Vec::new(), Some(auth), Body::Form(form))
            .await?;
        let data = response
            .json::<Envelope<RegisterData>>()?
            .data
            .ok_or_else(|| ApiError::Decode("register response has no data".to_string()))?;
        Ok(data.authorized_channel)
    }

    /// Per-channel subscription signature for a private channel
    pub async fn authorize_channel(
        &self,
        auth: &AuthHeader,
        socket_id: &str,
        channel_name: &str,
    ) -> Result<String, ApiError> {
        let url = self.endpoint(ExchangeApi::REGISTER)?;
        let form = vec![
            ("socket_id".to_string(), socket_id.to_string()),
            ("channel_name".to_string(), channel_name.to_string()),
        ];
        let response = self
            .send(Method::POST, url, Vec::new(), Some(auth), Body::Form(form))
            .await?;
        Ok(response.json::<MaybeWrapped<ChannelSignature>>()?.into_inner().auth)
    }

    /// Tell the exchange which lines we are willing to price
    pub async fn announce_supported_lines(&self, auth: &AuthHeader, line_ids: &[String]) -> Result<(), ApiError> {
        let url = self.endpoint(ExchangeApi::SUPPORTED_LINES)?;
        let body = serde_json::to_value(SupportedLines { supported_lines: line_ids })
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        self.send(Method::POST, url, Vec::new(), Some(auth), Body::Json(body))
            .await?;
        Ok(())
    }

    /// POST a JSON body to a server-supplied callback URL
    pub async fn post_callback<T: Serialize>(
        &self,
        auth: &AuthHeader,
        callback_url: &str,
        body: &T,
    ) -> Result<(), ApiError> {
        let url = Url::parse(callback_url).map_err(|e| ApiError::InvalidUrl {
            url: callback_url.to_string(),
            reason: e.to_string(),
        })?;
        let body = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.send(Method::POST, url, Vec::new(), Some(auth), Body::Json(body))
            .await?;
        Ok(())
    }
}
