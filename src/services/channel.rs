//! Channel subscriber: connection handshake, event routing and reconnection
//!
//! Every connection starts from scratch: fetch the pub/sub config, connect,
//! register the socket to learn the authorized channels, classify them and
//! subscribe. Channel names and signatures are never reused across
//! connections.

use crate::catalog::{Catalog, CatalogStore};
use crate::client::AuthHeader;
use crate::error::{Error, Result};
use crate::services::backoff::{Backoff, RetryConfig};
use crate::services::confirm::ConfirmationHandler;
use crate::services::pusher::PubSubTransport;
use crate::services::quote::QuoteResponder;
use crate::session::SessionManager;
use crate::types::{ChannelEvent, ChannelGrant, PriceQuoteRequest};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

/// The two channels of one connection and the events bound on each
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet {
    pub broadcast_channel_name: String,
    pub broadcast_events: Vec<String>,
    pub private_channel_name: String,
    pub private_events: Vec<String>,
}

/// Which handler an inbound event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Quote,
    Confirmation,
    Unbound,
}

impl ChannelSet {
    pub fn route(&self, event: &ChannelEvent) -> Route {
        if event.channel == self.broadcast_channel_name && self.broadcast_events.contains(&event.event) {
            Route::Quote
        } else if event.channel == self.private_channel_name && self.private_events.contains(&event.event) {
            Route::Confirmation
        } else {
            Route::Unbound
        }
    }
}

fn is_broadcast(name: &str) -> bool {
    name.contains("broadcast")
}

/// Private and presence channels need a per-socket signature
pub fn needs_signature(name: &str) -> bool {
    name.starts_with("private-") || name.starts_with("presence-")
}

/// Split the authorized channels into exactly one broadcast and one private channel
pub fn classify_channels(grants: Vec<ChannelGrant>) -> Result<ChannelSet> {
    let mut broadcast: Vec<ChannelGrant> = Vec::new();
    let mut private: Vec<ChannelGrant> = Vec::new();

    for grant in grants {
        if is_broadcast(&grant.channel_name) {
            broadcast.push(grant);
        } else if needs_signature(&grant.channel_name) {
            private.push(grant);
        } else {
            return Err(Error::ChannelDiscovery(format!(
                "channel {} is neither broadcast nor private",
                grant.channel_name
            )));
        }
    }

    let broadcast = exactly_one("broadcast", broadcast)?;
    let private = exactly_one("private", private)?;

    Ok(ChannelSet {
        broadcast_channel_name: broadcast.channel_name,
        broadcast_events: broadcast.binding_events,
        private_channel_name: private.channel_name,
        private_events: private.binding_events,
    })
}

fn exactly_one(class: &str, mut grants: Vec<ChannelGrant>) -> Result<ChannelGrant> {
    match grants.len() {
        1 => Ok(grants.remove(0)),
        0 => Err(Error::ChannelDiscovery(format!("no {} channel authorized", class))),
        n => {
            let names: Vec<&str> = grants.iter().map(|g| g.channel_name.as_str()).collect();
            Err(Error::ChannelDiscovery(format!(
                "{} {} channels authorized: {}",
                n,
                class,
                names.join(", ")
            )))
        }
    }
}

/// Quote and confirmation handlers plus the catalog they price against
pub struct EventHandlers {
    pub quotes: Arc<QuoteResponder>,
    pub confirmations: Arc<ConfirmationHandler>,
    pub catalog: Arc<CatalogStore>,
}

impl EventHandlers {
    /// Run the bound handler to completion before returning
    pub async fn dispatch(&self, channels: &ChannelSet, event: ChannelEvent, received_at: DateTime<Utc>) {
        let route = channels.route(&event);
        if route == Route::Unbound {
            debug!("[Channel] Unbound event {} on {}", event.event, event.channel);
            return;
        }

        let payload = match event.payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[Channel] Undecodable {} payload on {}: {}", event.event, event.channel, e);
                return;
            }
        };
        let catalog = self.catalog.current().unwrap_or_else(|| Arc::new(Catalog::default()));

        match route {
            Route::Quote => match serde_json::from_value::<PriceQuoteRequest>(payload) {
                Ok(request) => self.quotes.on_quote_request(request, received_at, &catalog).await,
                Err(e) => warn!("[Channel] Malformed pricing request: {}", e),
            },
            Route::Confirmation => self.confirmations.on_private_event(payload, &catalog).await,
            Route::Unbound => {}
        }
    }
}

/// Sender side of the re-subscription signal
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    rotations: Arc<watch::Sender<u64>>,
}

impl SubscriptionHandle {
    pub fn new() -> (Self, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0);
        (Self { rotations: Arc::new(tx) }, rx)
    }

    /// Tear down the live connection and redo the handshake
    pub fn request_resubscribe(&self) {
        self.rotations.send_modify(|generation| *generation += 1);
    }
}

fn is_unauthorized(err: &Error) -> bool {
    matches!(err, Error::Api(api) if api.is_unauthorized())
}

/// Subscription signature for `channel`, when it needs one
async fn signature(
    sessions: &SessionManager,
    auth: &AuthHeader,
    socket_id: &str,
    channel: &str,
) -> Result<Option<String>> {
    if !needs_signature(channel) {
        return Ok(None);
    }
    let signature = sessions.client().authorize_channel(auth, socket_id, channel).await?;
    Ok(Some(signature))
}

pub struct ChannelSubscriber<T: PubSubTransport> {
    sessions: Arc<SessionManager>,
    transport: T,
    handlers: EventHandlers,
    channels: Option<ChannelSet>,
    retry: RetryConfig,
}

impl<T: PubSubTransport> ChannelSubscriber<T> {
    pub fn new(sessions: Arc<SessionManager>, transport: T, handlers: EventHandlers) -> Self {
        Self {
            sessions,
            transport,
            handlers,
            channels: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn channels(&self) -> Option<&ChannelSet> {
        self.channels.as_ref()
    }

    /// Perform the full handshake and subscribe to both channels
    pub async fn subscribe(&mut self) -> Result<ChannelSet> {
        self.teardown().await;

        let auth = self.sessions.fresh_auth_header().await?;
        let client = self.sessions.client();

        let config = client.connection_config(&auth).await?;
        let socket_id = self.transport.connect(&config).await?;
        let grants = client.register_socket(&auth, &socket_id).await?;
        let channels = classify_channels(grants)?;

        for channel in [&channels.broadcast_channel_name, &channels.private_channel_name] {
            let channel_auth = signature(&self.sessions, &auth, &socket_id, channel).await?;
            self.transport.subscribe(channel, channel_auth).await?;
        }

        info!(
            "[Channel] Subscribed: broadcast {} ({} events), private {} ({} events)",
            channels.broadcast_channel_name,
            channels.broadcast_events.len(),
            channels.private_channel_name,
            channels.private_events.len()
        );
        self.channels = Some(channels.clone());
        Ok(channels)
    }

    async fn teardown(&mut self) {
        if self.channels.take().is_some() {
            debug!("[Channel] Tearing down subscription");
        }
        self.transport.disconnect().await;
    }

    /// Deliver events until the handle is dropped.
    ///
    /// Re-subscribes from scratch after each rotation signal or transport
    /// loss, waiting out the backoff after a loss. The backoff resets once a
    /// connection has delivered an event. Only a channel discovery failure
    /// ends the loop with an error.
    pub async fn run(mut self, mut rotations: watch::Receiver<u64>) -> Result<()> {
        let mut backoff = Backoff::new(self.retry.clone());
        let mut reconnect_delay: Option<Duration> = None;

        loop {
            if self.channels.is_none() {
                if let Some(delay) = reconnect_delay.take() {
                    tokio::select! {
                        _ = sleep(delay) => {}
                        changed = rotations.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }

                match self.subscribe().await {
                    Ok(_) => {}
                    Err(e @ Error::ChannelDiscovery(_)) => {
                        error!("[Channel] {}", e);
                        self.teardown().await;
                        return Err(e);
                    }
                    Err(e) => {
                        if is_unauthorized(&e) {
                            warn!("[Channel] Handshake unauthorized, refreshing session");
                            if let Err(refresh_err) = self.sessions.refresh().await {
                                error!("[Channel] Session refresh failed: {}", refresh_err);
                            }
                        }
                        let delay = backoff.next_delay();
                        warn!(
                            "[Channel] Handshake failed ({}), attempt {}, retrying in {:?}",
                            e,
                            backoff.attempts(),
                            delay
                        );
                        reconnect_delay = Some(delay);
                        continue;
                    }
                }
            }

            tokio::select! {
                changed = rotations.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    info!("[Channel] Session rotated, re-subscribing");
                    self.teardown().await;
                }
                event = self.transport.next_event() => match event {
                    Ok(Some(event)) => {
                        backoff.reset();
                        if let Some(channels) = &self.channels {
                            self.handlers.dispatch(channels, event, Utc::now()).await;
                        }
                    }
                    Ok(None) => {
                        let delay = backoff.next_delay();
                        warn!("[Channel] Connection closed by server, reconnecting in {:?}", delay);
                        self.teardown().await;
                        reconnect_delay = Some(delay);
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!("[Channel] Connection lost ({}), reconnecting in {:?}", e, delay);
                        self.teardown().await;
                        reconnect_delay = Some(delay);
                    }
                },
            }
        }

        info!("[Channel] Stopping");
        self.teardown().await;
        Ok(())
    }
}
