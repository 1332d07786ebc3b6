//! Parlay market maker
//!
//! Client for a sports-betting exchange's parlay pricing protocol:
//!
//! 1. **Session**: log in with a long-lived key pair and keep the access token fresh.
//! 2. **Catalog**: seed tournaments, events and markets of interest and validate them.
//! 3. **Real-time**: subscribe to the broadcast and private channels, answer
//!    pricing requests with offers and confirmations with a probability table.

pub mod app;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod pricing;
pub mod services;
pub mod session;
pub mod types;

#[cfg(test)]
mod testkit;

pub use app::App;
pub use catalog::{Catalog, CatalogSeeder, CatalogStore};
pub use client::ExchangeClient;
pub use config::Config;
pub use error::{ApiError, Error};
pub use session::{Session, SessionManager};
