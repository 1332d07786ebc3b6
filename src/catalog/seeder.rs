//! One seeding pass: tournaments, then events, then markets
//!
//! Failures are contained to the smallest unit that failed. A pass only
//! publishes its catalog after validation succeeds, so consumers keep reading
//! the previous snapshot until a complete, consistent one replaces it.

use super::{validate_catalog, Catalog, CatalogStore, SportEvent, Tournament};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::SessionManager;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Which tournaments a pass loads events for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TournamentFilter {
    names: HashSet<String>,
    load_all: bool,
}

impl TournamentFilter {
    pub fn new<I, S>(names: I, load_all: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            load_all,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tournaments.iter().cloned(), config.load_all_tournaments)
    }

    pub fn admits(&self, tournament: &Tournament) -> bool {
        self.load_all || self.names.contains(&tournament.name)
    }
}

pub struct CatalogSeeder {
    sessions: Arc<SessionManager>,
    store: Arc<CatalogStore>,
    filter: TournamentFilter,
}

impl CatalogSeeder {
    pub fn new(sessions: Arc<SessionManager>, store: Arc<CatalogStore>, filter: TournamentFilter) -> Self {
        Self {
            sessions,
            store,
            filter,
        }
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    /// Run one seeding pass and publish the result.
    ///
    /// Returns the previous catalog unchanged when the tournament list cannot
    /// be fetched and a catalog already exists.
    pub async fn seed(&self) -> Result<Arc<Catalog>> {
        let auth = self.sessions.fresh_auth_header().await?;
        let client = self.sessions.client();

        let tournaments = match client.tournaments(&auth).await {
            Ok(tournaments) => tournaments,
            Err(e) => {
                return match self.store.current() {
                    Some(previous) => {
                        warn!("[Seed] Tournament fetch failed ({}), keeping previous catalog", e);
                        Ok(previous)
                    }
                    None => Err(Error::Seed(e)),
                };
            }
        };
        info!("[Seed] Exchange lists {} tournaments", tournaments.len());

        let mut catalog = Catalog::new(tournaments);
        let mut collected: Vec<SportEvent> = Vec::new();

        for tournament in &catalog.tournaments {
            if !self.filter.admits(tournament) {
                continue;
            }
            catalog.my_tournaments.insert(tournament.id, tournament.clone());

            match client.sport_events(&auth, tournament.id).await {
                Ok(Some(events)) if !events.is_empty() => {
                    debug!("[Seed] {} events in {}", events.len(), tournament.name);
                    collected.extend(events);
                }
                Ok(_) => {
                    debug!("[Seed] No events in {}, skipping", tournament.name);
                }
                Err(e) if e.is_network() && collected.is_empty() => {
                    return Err(Error::Seed(e));
                }
                Err(e) => {
                    warn!("[Seed] Events fetch for {} failed ({}), skipping tournament", tournament.name, e);
                }
            }
        }

        for mut event in collected {
            match client.markets(&auth, event.event_id).await {
                Ok(Some(markets)) if !markets.is_empty() => {
                    event.markets = markets;
                    catalog.sport_events.insert(event.event_id, event);
                }
                Ok(_) => {
                    // the event closed between listing and market fetch
                    debug!("[Seed] Event {} has no markets, dropping", event.event_id);
                }
                Err(e) => {
                    warn!("[Seed] Markets fetch for event {} failed ({}), dropping", event.event_id, e);
                }
            }
        }

        if let Err(e) = validate_catalog(&catalog) {
            error!("[Seed] {}; previous catalog stays in place", e);
            return Err(e);
        }

        info!(
            "[Seed] Catalog ready: {} tournaments of interest, {} events, {} markets",
            catalog.my_tournaments.len(),
            catalog.sport_events.len(),
            catalog.market_count()
        );
        Ok(self.store.replace(catalog))
    }
}
