//! Long-running services: real-time channel, handlers and keep-alive

pub mod backoff;
pub mod channel;
pub mod confirm;
pub mod keep_alive;
pub mod pusher;
pub mod quote;

pub use backoff::{Backoff, RetryConfig};
pub use channel::{classify_channels, ChannelSet, ChannelSubscriber, EventHandlers, SubscriptionHandle};
pub use confirm::ConfirmationHandler;
pub use keep_alive::{
    KeepAliveScheduler, MaintenanceTask, ReseedTask, RotationSignal, SessionExpiryTask, SessionRefreshTask,
};
pub use pusher::{PubSubTransport, PusherTransport};
pub use quote::{announce_supported_lines, QuoteResponder, QuotedParlays, MIN_QUOTE_VALIDITY};
