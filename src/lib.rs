//! feedrelay - RSS subscription relay core for chat platforms
//!
//! Polls RSS-style feeds on per-subscription cron schedules, filters
//! already-delivered items, and hands rendered messages to the host
//! platform for delivery.

pub mod config;
pub mod cron;
pub mod delivery;
pub mod error;
pub mod feed;
pub mod logging;
pub mod pipeline;
pub mod platform;
pub mod registry;
pub mod render;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod store;

pub use config::Config;
pub use cron::CronExpression;
pub use delivery::TickRunner;
pub use error::{RelayError, Result};
pub use feed::{FeedFetcher, ParsedFeed, ParsedItem};
pub use pipeline::{FetchPipeline, PolledItem};
pub use platform::{ChatPlatform, ImageAdjuster, LogPlatform, TextRenderer};
pub use registry::EndpointRegistry;
pub use render::{MessageRenderer, Outbound, OutboundMessage};
pub use scheduler::{JobKey, JobRunner, Scheduler};
pub use service::RelayService;
pub use storage::StateHandle;
pub use store::{
    FeedSource, PersistedState, SeenState, Subscription, SubscriptionStore, SubscriptionSummary,
};
