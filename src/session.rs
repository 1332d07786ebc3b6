//! Auth session lifecycle
//!
//! The manager owns the one piece of state that mutates after startup. Readers
//! take an `Arc<Session>` snapshot; login and refresh build a complete new
//! `Session` and swap it in, so a reader never sees half of a rotation.

use crate::client::{AuthHeader, ExchangeClient};
use crate::config::Credentials;
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Expiry values above this are taken to be milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Tokens this close to expiry are rotated before use
pub const EXPIRY_MARGIN_SECS: i64 = 30;

/// Minimum spacing between expiry-driven rotations, in case the exchange
/// keeps issuing tokens that are already stale
const FORCED_ROTATION_COOLDOWN_SECS: i64 = 30;

fn epoch_seconds(value: i64) -> i64 {
    if value > MILLIS_THRESHOLD {
        value / 1000
    } else {
        value
    }
}

/// An authenticated session as issued by the login endpoint.
///
/// Expiry times are epoch timestamps; zero means the exchange did not say.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub access_expire_time: i64,
    pub refresh_token: String,
    #[serde(default)]
    pub refresh_expire_time: i64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("access_expire_time", &self.access_expire_time)
            .field("refresh_token", &"<redacted>")
            .field("refresh_expire_time", &self.refresh_expire_time)
            .finish()
    }
}

impl Session {
    pub fn auth_header(&self) -> AuthHeader {
        AuthHeader::bearer(&self.access_token)
    }

    pub fn access_expired_at(&self, now: i64) -> bool {
        self.access_expire_time > 0 && epoch_seconds(self.access_expire_time) <= now
    }

    pub fn refresh_expired_at(&self, now: i64) -> bool {
        self.refresh_expire_time > 0 && epoch_seconds(self.refresh_expire_time) <= now
    }

    /// Apply a refresh result; fields the exchange left out are carried over
    fn rotated(&self, token: RefreshedToken) -> Session {
        Session {
            access_token: token.access_token,
            access_expire_time: token.access_expire_time.unwrap_or(0),
            refresh_token: token.refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
            refresh_expire_time: token.refresh_expire_time.unwrap_or(self.refresh_expire_time),
        }
    }
}

/// Body of a successful refresh call
#[derive(Clone, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    #[serde(default)]
    pub access_expire_time: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_expire_time: Option<i64>,
}

/// Owns the current session and all transitions of it
pub struct SessionManager {
    client: ExchangeClient,
    credentials: Credentials,
    current: RwLock<Option<Arc<Session>>>,
    /// Serializes login/refresh so two rotations never race
    writer: Mutex<()>,
    /// Bumped on every installed session
    generation: AtomicU64,
    last_forced_rotation: parking_lot::Mutex<Option<i64>>,
}

impl SessionManager {
    pub fn new(client: ExchangeClient, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            current: RwLock::new(None),
            writer: Mutex::new(()),
            generation: AtomicU64::new(0),
            last_forced_rotation: parking_lot::Mutex::new(None),
        }
    }

    /// Exchange the long-lived keys for a brand-new session
    pub async fn login(&self) -> Result<Arc<Session>> {
        let _guard = self.writer.lock().await;
        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<Arc<Session>> {
        let session = self.client.login(&self.credentials).await.map_err(Error::Auth)?;
        info!("[Session] Logged in, access token valid until {}", session.access_expire_time);
        Ok(self.install(session))
    }

    /// Rotate the access token, falling back to a full login when the
    /// refresh path is unavailable or refused
    pub async fn refresh(&self) -> Result<Arc<Session>> {
        let _guard = self.writer.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Arc<Session>> {
        let Some(current) = self.current() else {
            info!("[Session] No session to refresh, logging in");
            return self.login_locked().await;
        };

        if current.refresh_expired_at(Utc::now().timestamp()) {
            info!("[Session] Refresh token expired, logging in");
            return self.login_locked().await;
        }

        match self
            .client
            .refresh(&current.auth_header(), &current.refresh_token)
            .await
        {
            Ok(token) => {
                let session = current.rotated(token);
                info!(
                    "[Session] Access token refreshed, valid until {}",
                    session.access_expire_time
                );
                Ok(self.install(session))
            }
            Err(e) => {
                warn!("[Session] Refresh failed ({}), logging in again", e);
                self.login_locked().await
            }
        }
    }

    /// Rotate the session if its access token has expired or is about to.
    ///
    /// Fails before the first login. Returns the session to use.
    pub async fn ensure_fresh(&self) -> Result<Arc<Session>> {
        let current = self.current().ok_or(Error::NoSession)?;
        if !self.needs_rotation(&current) {
            return Ok(current);
        }

        let _guard = self.writer.lock().await;
        // another caller may have rotated while we waited for the lock
        let current = self.current().ok_or(Error::NoSession)?;
        if !self.needs_rotation(&current) {
            return Ok(current);
        }

        info!(
            "[Session] Access token expires at {}, refreshing",
            current.access_expire_time
        );
        *self.last_forced_rotation.lock() = Some(Utc::now().timestamp());
        self.refresh_locked().await
    }

    fn needs_rotation(&self, session: &Session) -> bool {
        let now = Utc::now().timestamp();
        if !session.access_expired_at(now + EXPIRY_MARGIN_SECS) {
            return false;
        }
        match *self.last_forced_rotation.lock() {
            Some(at) if now - at < FORCED_ROTATION_COOLDOWN_SECS => {
                debug!("[Session] Access token still stale after a recent rotation");
                false
            }
            _ => true,
        }
    }

    /// Current auth header, without looking at expiry; fails before the first login
    pub fn auth_header(&self) -> Result<AuthHeader> {
        self.current()
            .map(|session| session.auth_header())
            .ok_or(Error::NoSession)
    }

    /// Auth header for an outgoing call, rotating an expired token first
    pub async fn fresh_auth_header(&self) -> Result<AuthHeader> {
        Ok(self.ensure_fresh().await?.auth_header())
    }

    /// Number of sessions installed so far; changes on every login or refresh
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    pub fn client(&self) -> &ExchangeClient {
        &self.client
    }

    fn install(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        *self.current.write() = Some(session.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeApi;
    use crate::testkit::MockHttp;
    use serde_json::json;

    const FAR_FUTURE: i64 = 4_102_444_800;

    fn manager(http: &Arc<MockHttp>) -> SessionManager {
        let client = ExchangeClient::new(http.clone(), "https://api.example").unwrap();
        let credentials = Credentials {
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
        };
        SessionManager::new(client, credentials)
    }

    fn login_reply(http: &MockHttp, access: &str, refresh: &str, refresh_expire: i64) {
        login_reply_expiring(http, access, FAR_FUTURE, refresh, refresh_expire);
    }

    fn login_reply_expiring(http: &MockHttp, access: &str, access_expire: i64, refresh: &str, refresh_expire: i64) {
        http.reply(
            ExchangeApi::LOGIN,
            200,
            json!({"data": {
                "access_token": access,
                "access_expire_time": access_expire,
                "refresh_token": refresh,
                "refresh_expire_time": refresh_expire,
            }}),
        );
    }

    #[test]
    fn test_expiry_units() {
        let session = Session {
            access_token: "a".to_string(),
            access_expire_time: 1_700_000_000_000,
            refresh_token: "r".to_string(),
            refresh_expire_time: 0,
        };
        assert!(session.access_expired_at(1_700_000_000));
        assert!(!session.access_expired_at(1_699_999_999));
        // unknown expiry never counts as expired
        assert!(!session.refresh_expired_at(i64::MAX));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let session = Session {
            access_token: "secret-access".to_string(),
            access_expire_time: 1,
            refresh_token: "secret-refresh".to_string(),
            refresh_expire_time: 2,
        };
        let printed = format!("{:?}", session);
        assert!(!printed.contains("secret-access"));
        assert!(!printed.contains("secret-refresh"));
    }

    #[tokio::test]
    async fn test_auth_header_requires_login() {
        let http = Arc::new(MockHttp::new());
        let sessions = manager(&http);
        assert!(matches!(sessions.auth_header(), Err(Error::NoSession)));

        login_reply(&http, "at-1", "rt-1", FAR_FUTURE);
        sessions.login().await.unwrap();
        assert_eq!(sessions.auth_header().unwrap(), AuthHeader::bearer("at-1"));
    }

    #[tokio::test]
    async fn test_login_rejected_is_auth_error() {
        let http = Arc::new(MockHttp::new());
        http.reply(ExchangeApi::LOGIN, 401, json!({"message": "bad keys"}));
        let sessions = manager(&http);

        let err = sessions.login().await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(sessions.current().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rotates_access_token_only() {
        let http = Arc::new(MockHttp::new());
        login_reply(&http, "at-1", "rt-1", FAR_FUTURE);
        http.reply(ExchangeApi::REFRESH, 200, json!({"data": {"access_token": "at-2"}}));
        let sessions = manager(&http);

        let before = sessions.login().await.unwrap();
        let after = sessions.refresh().await.unwrap();

        assert_eq!(after.access_token, "at-2");
        assert_eq!(after.refresh_token, "rt-1");
        assert_eq!(after.refresh_expire_time, FAR_FUTURE);
        // earlier snapshots are untouched by the swap
        assert_eq!(before.access_token, "at-1");

        let refresh_calls = http.requests_to(ExchangeApi::REFRESH);
        assert_eq!(refresh_calls.len(), 1);
        assert_eq!(refresh_calls[0].auth, Some(AuthHeader::bearer("at-1")));
        assert_eq!(
            refresh_calls[0].body,
            crate::client::Body::Json(json!({"refresh_token": "rt-1"}))
        );
        assert_eq!(http.requests_to(ExchangeApi::LOGIN).len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_falls_back_to_login() {
        let http = Arc::new(MockHttp::new());
        login_reply(&http, "at-1", "rt-1", FAR_FUTURE);
        http.reply(ExchangeApi::REFRESH, 500, json!({"message": "boom"}));
        let sessions = manager(&http);
        sessions.login().await.unwrap();

        login_reply(&http, "at-new", "rt-new", FAR_FUTURE);
        let session = sessions.refresh().await.unwrap();

        assert_eq!(session.access_token, "at-new");
        assert_eq!(session.refresh_token, "rt-new");
        assert_eq!(http.requests_to(ExchangeApi::LOGIN).len(), 2);
        assert_eq!(sessions.auth_header().unwrap(), AuthHeader::bearer("at-new"));
    }

    #[tokio::test]
    async fn test_refresh_without_session_logs_in() {
        let http = Arc::new(MockHttp::new());
        login_reply(&http, "at-1", "rt-1", FAR_FUTURE);
        let sessions = manager(&http);

        let session = sessions.refresh().await.unwrap();
        assert_eq!(session.access_token, "at-1");
        assert!(http.requests_to(ExchangeApi::REFRESH).is_empty());
    }

    #[tokio::test]
    async fn test_expired_refresh_token_skips_refresh_call() {
        let http = Arc::new(MockHttp::new());
        login_reply(&http, "at-1", "rt-1", 1);
        let sessions = manager(&http);
        sessions.login().await.unwrap();

        sessions.refresh().await.unwrap();
        assert!(http.requests_to(ExchangeApi::REFRESH).is_empty());
        assert_eq!(http.requests_to(ExchangeApi::LOGIN).len(), 2);
    }

    #[tokio::test]
    async fn test_expired_access_token_is_refreshed_before_use() {
        let http = Arc::new(MockHttp::new());
        login_reply_expiring(&http, "at-stale", 1, "rt-1", FAR_FUTURE);
        http.reply(
            ExchangeApi::REFRESH,
            200,
            json!({"data": {"access_token": "at-fresh", "access_expire_time": FAR_FUTURE}}),
        );
        let sessions = manager(&http);
        sessions.login().await.unwrap();
        let generation = sessions.generation();

        let auth = sessions.fresh_auth_header().await.unwrap();

        assert_eq!(auth, AuthHeader::bearer("at-fresh"));
        assert_eq!(http.requests_to(ExchangeApi::REFRESH).len(), 1);
        assert_eq!(sessions.generation(), generation + 1);

        // the rotated token is served without another round trip
        sessions.fresh_auth_header().await.unwrap();
        assert_eq!(http.requests_to(ExchangeApi::REFRESH).len(), 1);
    }

    #[tokio::test]
    async fn test_token_near_expiry_is_refreshed() {
        let http = Arc::new(MockHttp::new());
        let soon = Utc::now().timestamp() + EXPIRY_MARGIN_SECS / 2;
        login_reply_expiring(&http, "at-1", soon, "rt-1", FAR_FUTURE);
        http.reply(ExchangeApi::REFRESH, 200, json!({"data": {"access_token": "at-2"}}));
        let sessions = manager(&http);
        sessions.login().await.unwrap();

        let session = sessions.ensure_fresh().await.unwrap();
        assert_eq!(session.access_token, "at-2");
    }

    #[tokio::test]
    async fn test_valid_or_unknown_expiry_is_not_refreshed() {
        let http = Arc::new(MockHttp::new());
        let sessions = manager(&http);
        assert!(matches!(sessions.fresh_auth_header().await, Err(Error::NoSession)));

        login_reply(&http, "at-1", "rt-1", FAR_FUTURE);
        sessions.login().await.unwrap();
        assert_eq!(sessions.fresh_auth_header().await.unwrap(), AuthHeader::bearer("at-1"));

        login_reply_expiring(&http, "at-2", 0, "rt-2", 0);
        sessions.login().await.unwrap();
        assert_eq!(sessions.fresh_auth_header().await.unwrap(), AuthHeader::bearer("at-2"));

        assert!(http.requests_to(ExchangeApi::REFRESH).is_empty());
    }

    #[tokio::test]
    async fn test_stale_replacement_does_not_loop() {
        let http = Arc::new(MockHttp::new());
        login_reply_expiring(&http, "at-1", 1, "rt-1", FAR_FUTURE);
        // the exchange keeps handing back an already-expired token
        http.reply(
            ExchangeApi::REFRESH,
            200,
            json!({"data": {"access_token": "at-2", "access_expire_time": 1}}),
        );
        let sessions = manager(&http);
        sessions.login().await.unwrap();

        for _ in 0..5 {
            sessions.fresh_auth_header().await.unwrap();
        }
        assert_eq!(http.requests_to(ExchangeApi::REFRESH).len(), 1);
        assert_eq!(sessions.auth_header().unwrap(), AuthHeader::bearer("at-2"));
    }
}
