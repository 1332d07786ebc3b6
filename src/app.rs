//! Startup sequence and steady state
//!
//! login -> balance -> seed -> subscribe -> announce, then the real-time
//! channel and the keep-alive scheduler run until interrupted.

use crate::catalog::{Catalog, CatalogSeeder, CatalogStore, TournamentFilter};
use crate::client::{ExchangeClient, HttpTransport, ReqwestTransport};
use crate::config::Config;
use crate::pricing::{PricingModel, TieredPricing};
use crate::services::{
    announce_supported_lines, ChannelSubscriber, ConfirmationHandler, EventHandlers, KeepAliveScheduler,
    PusherTransport, QuoteResponder, QuotedParlays, ReseedTask, RotationSignal, SessionExpiryTask,
    SessionRefreshTask, SubscriptionHandle,
};
use crate::session::SessionManager;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared components wired from one configuration
pub struct App {
    config: Config,
    sessions: Arc<SessionManager>,
    catalog: Arc<CatalogStore>,
    seeder: Arc<CatalogSeeder>,
    pricing: Arc<dyn PricingModel>,
    quoted: Arc<QuotedParlays>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let transport = ReqwestTransport::new(config.http_timeout).context("Failed to build HTTP client")?;
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: Config, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        let client = ExchangeClient::new(transport, &config.base_url).context("Invalid PARLAY_BASE_URL")?;
        let sessions = Arc::new(SessionManager::new(client, config.credentials.clone()));
        let catalog = Arc::new(CatalogStore::new());
        let seeder = Arc::new(CatalogSeeder::new(
            sessions.clone(),
            catalog.clone(),
            TournamentFilter::from_config(&config),
        ));

        Ok(Self {
            config,
            sessions,
            catalog,
            seeder,
            pricing: Arc::new(TieredPricing::default()),
            quoted: Arc::new(QuotedParlays::new()),
        })
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingModel>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub async fn login(&self) -> Result<()> {
        self.sessions.login().await.context("Startup failed during login")?;
        Ok(())
    }

    pub async fn balance(&self) -> Result<Decimal> {
        let auth = self.sessions.fresh_auth_header().await?;
        let balance = self.sessions.client().balance(&auth).await?;
        Ok(balance)
    }

    /// Log the account balance; failure is not fatal
    pub async fn log_balance(&self) {
        match self.balance().await {
            Ok(balance) => info!("[Session] Account balance: ${}", balance),
            Err(e) => warn!("[Session] Could not read balance: {:#}", e),
        }
    }

    pub async fn seed(&self) -> Result<Arc<Catalog>> {
        self.seeder.seed().await.context("Startup failed during catalog seeding")
    }

    fn handlers(&self) -> EventHandlers {
        EventHandlers {
            quotes: Arc::new(QuoteResponder::new(
                self.sessions.clone(),
                self.pricing.clone(),
                self.config.quote_validity,
                self.quoted.clone(),
            )),
            confirmations: Arc::new(ConfirmationHandler::new(
                self.sessions.clone(),
                self.pricing.clone(),
                self.quoted.clone(),
            )),
            catalog: self.catalog.clone(),
        }
    }

    fn scheduler(&self, subscription: SubscriptionHandle) -> KeepAliveScheduler {
        let signal = RotationSignal::new(self.sessions.clone(), subscription);
        let mut scheduler = KeepAliveScheduler::new(self.config.keep_alive_tick)
            .every(
                self.config.session_refresh_interval,
                Arc::new(SessionRefreshTask::new(self.sessions.clone(), signal.clone())),
            )
            .every(
                self.config.keep_alive_tick,
                Arc::new(SessionExpiryTask::new(self.sessions.clone(), signal)),
            );
        if let Some(every) = self.config.reseed_interval {
            scheduler = scheduler.every(every, Arc::new(ReseedTask::new(self.seeder.clone(), self.sessions.clone())));
        }
        scheduler
    }

    /// Full startup, then serve until Ctrl-C or a fatal channel error
    pub async fn run(self) -> Result<()> {
        self.login().await?;
        self.log_balance().await;
        let catalog = self.seed().await?;

        let mut subscriber = ChannelSubscriber::new(self.sessions.clone(), PusherTransport::new(), self.handlers());
        subscriber
            .subscribe()
            .await
            .context("Startup failed during channel subscription")?;

        announce_supported_lines(&self.sessions, &catalog).await;

        let (subscription, rotations) = SubscriptionHandle::new();
        let keep_alive = self.scheduler(subscription).start();
        let mut channel = tokio::spawn(subscriber.run(rotations));

        info!("Market maker running, press Ctrl-C to stop");

        let outcome = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                Ok(())
            }
            joined = &mut channel => match joined {
                Ok(Ok(())) => {
                    warn!("[Channel] Subscriber stopped");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!("[Channel] Fatal: {}", e);
                    Err(anyhow::Error::new(e).context("Real-time channel failed"))
                }
                Err(e) => Err(anyhow::Error::new(e).context("Real-time channel task panicked")),
            },
        };

        keep_alive.abort();
        channel.abort();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeApi;
    use crate::testkit::MockHttp;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    fn app(http: &Arc<MockHttp>, extra: &[(&str, &str)]) -> App {
        let mut vars = vec![
            ("PARLAY_ACCESS_KEY", "ak"),
            ("PARLAY_SECRET_KEY", "sk"),
            ("PARLAY_BASE_URL", "https://api.example"),
            ("PARLAY_TOURNAMENTS", "A"),
        ];
        vars.extend_from_slice(extra);
        App::with_transport(config(&vars), http.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_login_failure_names_phase() {
        let http = Arc::new(MockHttp::new());
        http.reply(ExchangeApi::LOGIN, 401, json!({"message": "bad keys"}));

        let err = app(&http, &[]).login().await.unwrap_err();
        assert!(format!("{:#}", err).contains("login"));
    }

    #[tokio::test]
    async fn test_balance_is_optional() {
        let http = Arc::new(MockHttp::new());
        http.reply(
            ExchangeApi::LOGIN,
            200,
            json!({"data": {"access_token": "at", "refresh_token": "rt"}}),
        );
        let app = app(&http, &[]);
        app.login().await.unwrap();

        http.reply(ExchangeApi::BALANCE, 200, json!({"data": {"balance": 12.5}}));
        assert_eq!(app.balance().await.unwrap(), dec!(12.5));

        http.reply(ExchangeApi::BALANCE, 500, json!({}));
        app.log_balance().await;
    }

    #[tokio::test]
    async fn test_seed_failure_names_phase() {
        let http = Arc::new(MockHttp::new());
        http.reply(
            ExchangeApi::LOGIN,
            200,
            json!({"data": {"access_token": "at", "refresh_token": "rt"}}),
        );
        http.fail(ExchangeApi::TOURNAMENTS, "timeout");
        let app = app(&http, &[]);
        app.login().await.unwrap();

        let err = app.seed().await.unwrap_err();
        assert!(format!("{:#}", err).contains("catalog seeding"));
    }

    #[test]
    fn test_scheduler_jobs_follow_config() {
        let http = Arc::new(MockHttp::new());
        let (handle, _rotations) = SubscriptionHandle::new();
        assert_eq!(app(&http, &[]).scheduler(handle.clone()).job_count(), 2);
        assert_eq!(
            app(&http, &[("RESEED_INTERVAL_SECONDS", "3600")]).scheduler(handle).job_count(),
            3
        );
    }
}
