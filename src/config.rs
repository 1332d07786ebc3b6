//! Configuration management for the parlay market maker

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Long-lived credentials exchanged for a session at login
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Client configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Access/secret key pair used by login
    pub credentials: Credentials,

    /// Exchange REST base URL
    pub base_url: String,

    /// Tournament names the catalog is seeded from
    pub tournaments: Vec<String>,

    /// Seed every tournament regardless of `tournaments`
    pub load_all_tournaments: bool,

    /// How often the keep-alive scheduler refreshes the session
    pub session_refresh_interval: Duration,

    /// How often the keep-alive scheduler evaluates pending tasks
    pub keep_alive_tick: Duration,

    /// Offer validity window (never shorter than 5 seconds once applied)
    pub quote_validity: Duration,

    /// Optional periodic re-seed of the catalog
    pub reseed_interval: Option<Duration>,

    /// Per-request HTTP timeout
    pub http_timeout: Duration,
}

/// User-info file, the JSON alternative to the credential variables
#[derive(Debug, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub tournaments: Vec<String>,
    #[serde(default)]
    pub load_all_tournaments: Option<bool>,
}

impl UserInfo {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse user info JSON")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read user info file {}", path.display()))?;
        Self::from_json(&raw)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let vars: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build a configuration from an arbitrary variable source.
    ///
    /// Values from the lookup win over values from the user-info file.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let user_info = match get("PARLAY_USER_INFO") {
            Some(path) => UserInfo::load(Path::new(&path))?,
            None => UserInfo::default(),
        };

        let access_key = get("PARLAY_ACCESS_KEY")
            .or(user_info.access_key)
            .context("PARLAY_ACCESS_KEY (or access_key in the user info file) is required")?;
        let secret_key = get("PARLAY_SECRET_KEY")
            .or(user_info.secret_key)
            .context("PARLAY_SECRET_KEY (or secret_key in the user info file) is required")?;

        let base_url = get("PARLAY_BASE_URL").unwrap_or_else(|| ExchangeApi::SANDBOX_URL.to_string());

        let tournaments = match get("PARLAY_TOURNAMENTS") {
            Some(list) => list
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
            None => user_info.tournaments,
        };

        let load_all_tournaments = get("PARLAY_LOAD_ALL_TOURNAMENTS")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .or(user_info.load_all_tournaments)
            .unwrap_or(false);

        let seconds = |key: &str, default: u64| {
            get(key).and_then(|v| v.parse::<u64>().ok()).unwrap_or(default)
        };

        let session_refresh_interval = Duration::from_secs(seconds("SESSION_REFRESH_SECONDS", 600));
        let keep_alive_tick = Duration::from_millis(seconds("KEEP_ALIVE_TICK_MS", 1000));
        let quote_validity = Duration::from_secs(seconds("QUOTE_VALIDITY_SECONDS", 500));
        let http_timeout = Duration::from_secs(seconds("HTTP_TIMEOUT_SECONDS", 10));
        let reseed_interval = get("RESEED_INTERVAL_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        if session_refresh_interval.is_zero() {
            anyhow::bail!("SESSION_REFRESH_SECONDS must be greater than zero");
        }
        if keep_alive_tick.is_zero() {
            anyhow::bail!("KEEP_ALIVE_TICK_MS must be greater than zero");
        }

        Ok(Self {
            credentials: Credentials { access_key, secret_key },
            base_url,
            tournaments,
            load_all_tournaments,
            session_refresh_interval,
            keep_alive_tick,
            quote_validity,
            reseed_interval,
            http_timeout,
        })
    }
}

/// Exchange REST endpoints, relative to the configured base URL
pub struct ExchangeApi;

impl ExchangeApi {
    pub const SANDBOX_URL: &'static str = "https://api-ss-sandbox.betprophet.co";

    pub const LOGIN: &'static str = "partner/auth/login";
    pub const REFRESH: &'static str = "partner/auth/refresh";
    pub const TOURNAMENTS: &'static str = "partner/mm/get_tournaments";
    pub const SPORT_EVENTS: &'static str = "partner/mm/get_sport_events";
    pub const MARKETS: &'static str = "partner/mm/get_markets";
    pub const BALANCE: &'static str = "partner/mm/get_balance";
    pub const CONNECTION_CONFIG: &'static str = "parlay/sp/websocket/connection-config";
    pub const REGISTER: &'static str = "parlay/sp/websocket/register";
    pub const SUPPORTED_LINES: &'static str = "parlay/sp/supported-lines";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("PARLAY_ACCESS_KEY", "ak"),
            ("PARLAY_SECRET_KEY", "sk"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, ExchangeApi::SANDBOX_URL);
        assert!(config.tournaments.is_empty());
        assert!(!config.load_all_tournaments);
        assert_eq!(config.keep_alive_tick, Duration::from_secs(1));
        assert_eq!(config.session_refresh_interval, Duration::from_secs(600));
        assert_eq!(config.quote_validity, Duration::from_secs(500));
        assert!(config.reseed_interval.is_none());
    }

    #[test]
    fn test_tournament_list_and_flags() {
        let config = Config::from_lookup(lookup(&[
            ("PARLAY_ACCESS_KEY", "ak"),
            ("PARLAY_SECRET_KEY", "sk"),
            ("PARLAY_TOURNAMENTS", "NBA, MLB ,,NHL"),
            ("PARLAY_LOAD_ALL_TOURNAMENTS", "TRUE"),
            ("RESEED_INTERVAL_SECONDS", "3600"),
        ]))
        .unwrap();

        assert_eq!(config.tournaments, vec!["NBA", "MLB", "NHL"]);
        assert!(config.load_all_tournaments);
        assert_eq!(config.reseed_interval, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_missing_credentials() {
        let err = Config::from_lookup(lookup(&[("PARLAY_ACCESS_KEY", "ak")])).unwrap_err();
        assert!(err.to_string().contains("PARLAY_SECRET_KEY"));
    }

    #[test]
    fn test_user_info_json() {
        let info = UserInfo::from_json(
            r#"{"access_key":"ak","secret_key":"sk","tournaments":["NBA"],"load_all_tournaments":false}"#,
        )
        .unwrap();
        assert_eq!(info.access_key.as_deref(), Some("ak"));
        assert_eq!(info.tournaments, vec!["NBA"]);
        assert_eq!(info.load_all_tournaments, Some(false));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = Credentials {
            access_key: "ak".to_string(),
            secret_key: "very-secret".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("very-secret"));
    }
}
