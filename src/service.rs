//! Command surface for feedrelay.
//!
//! The host platform's command parser calls these operations with
//! structured arguments and renders the structured results back to
//! chat text. Validation failures are raised before any state is
//! mutated; job installation and cancellation stay in lockstep with
//! store mutations here.

use std::sync::Arc;

use url::Url;

use crate::config::Config;
use crate::cron::CronExpression;
use crate::delivery::TickRunner;
use crate::feed::FeedFetcher;
use crate::pipeline::FetchPipeline;
use crate::platform::ChatPlatform;
use crate::registry::EndpointRegistry;
use crate::render::{MessageRenderer, OutboundMessage};
use crate::scheduler::{JobKey, JobRunner, Scheduler};
use crate::storage::StateHandle;
use crate::store::{FeedSource, Subscription, SubscriptionStore, SubscriptionSummary};
use crate::{RelayError, Result};

/// The relay's command surface: endpoint and subscription management
/// plus startup/shutdown of the scheduled jobs.
pub struct RelayService {
    registry: EndpointRegistry,
    store: SubscriptionStore,
    scheduler: Arc<Scheduler>,
    pipeline: FetchPipeline,
    renderer: Arc<MessageRenderer>,
    runner: Arc<TickRunner>,
}

impl RelayService {
    /// Assemble the full relay core from configuration, shared state
    /// and the host platform's send primitive.
    pub fn from_config(
        config: &Config,
        state: StateHandle,
        platform: Arc<dyn ChatPlatform>,
    ) -> Result<Self> {
        let timezone: chrono_tz::Tz = config
            .poll
            .timezone
            .parse()
            .map_err(|_| RelayError::Config(format!("invalid timezone: {}", config.poll.timezone)))?;

        let registry = EndpointRegistry::new(state.clone());
        let store = SubscriptionStore::new(state);
        let scheduler = Arc::new(Scheduler::new(timezone));
        let fetcher = FeedFetcher::new(&config.fetch)?;
        let pipeline = FetchPipeline::new(
            registry.clone(),
            store.clone(),
            fetcher,
            config.poll.max_items_per_poll,
        );
        let renderer = Arc::new(MessageRenderer::new(
            config.render.clone(),
            config.pic.clone(),
            timezone,
        ));
        let runner = Arc::new(TickRunner::new(
            pipeline.clone(),
            Arc::clone(&renderer),
            platform,
            config.render.compose_forward,
        ));

        Ok(Self {
            registry,
            store,
            scheduler,
            pipeline,
            renderer,
            runner,
        })
    }

    /// Register a feed-gateway endpoint; returns its index.
    pub async fn endpoint_add(&self, url: &str) -> Result<usize> {
        self.registry.add(url).await
    }

    /// List registered endpoints.
    pub async fn endpoint_list(&self) -> Vec<(usize, String)> {
        self.registry.list().await
    }

    /// Remove an endpoint by index, returning its URL.
    ///
    /// Subscriptions referencing the index are not migrated; their next
    /// fetch fails until they are re-created (documented sharp edge).
    pub async fn endpoint_remove(&self, index: usize) -> Result<String> {
        self.registry.remove(index).await
    }

    /// Subscribe a destination to a gateway route; returns the
    /// subscription index and installs its recurring job.
    pub async fn subscription_add(
        &self,
        destination: &str,
        endpoint: usize,
        route: &str,
        cron: &str,
    ) -> Result<usize> {
        if !route.starts_with('/') {
            return Err(RelayError::Validation(
                "route must start with /".to_string(),
            ));
        }

        let source = FeedSource::Route {
            endpoint,
            route: route.to_string(),
        };
        let index = self.store.add(destination, source, cron).await?;
        self.install_job(destination, index, cron)?;
        Ok(index)
    }

    /// Subscribe a destination to a direct feed URL; returns the
    /// subscription index and installs its recurring job.
    pub async fn subscription_add_url(
        &self,
        destination: &str,
        url: &str,
        cron: &str,
    ) -> Result<usize> {
        let url = normalize_feed_url(url)?;
        let index = self
            .store
            .add(destination, FeedSource::Direct { url }, cron)
            .await?;
        self.install_job(destination, index, cron)?;
        Ok(index)
    }

    /// List a destination's subscriptions.
    pub async fn subscription_list(&self, destination: &str) -> Vec<SubscriptionSummary> {
        self.store.list(destination).await
    }

    /// Remove a subscription, cancelling its job first so it cannot
    /// fire against the deleted record.
    ///
    /// Later subscriptions of the destination shift down one index;
    /// their jobs are re-installed under the shifted keys and the
    /// now-dangling highest key is cancelled.
    pub async fn subscription_remove(
        &self,
        destination: &str,
        index: usize,
    ) -> Result<Subscription> {
        self.scheduler.cancel(&JobKey::new(destination, index));
        let removed = self.store.remove(destination, index).await?;

        let remaining = self.store.count(destination).await;
        for shifted in index..remaining {
            let sub = self.store.get(destination, shifted).await?;
            let cron = CronExpression::parse(&sub.cron)?;
            self.scheduler
                .install(JobKey::new(destination, shifted), cron, self.runner());
        }
        self.scheduler.cancel(&JobKey::new(destination, remaining));

        Ok(removed)
    }

    /// Fetch the newest item of a subscription right now, transformed
    /// but bypassing the dedup cursor entirely (the recurring job's
    /// state is not perturbed).
    pub async fn subscription_get_latest(
        &self,
        destination: &str,
        index: usize,
    ) -> Result<Option<OutboundMessage>> {
        match self.pipeline.peek_latest(destination, index).await? {
            Some(polled) => Ok(Some(self.renderer.render_item(&polled).await)),
            None => Ok(None),
        }
    }

    /// Run one full tick for a subscription immediately, outside its
    /// schedule (manual refresh). Delivery and cursor advancement
    /// behave exactly like a scheduled tick.
    pub async fn poll_now(&self, destination: &str, index: usize) -> Result<()> {
        // Surface the index check as a command error rather than a log line.
        self.store.get(destination, index).await?;
        self.runner.run(&JobKey::new(destination, index)).await;
        Ok(())
    }

    /// Re-install one job per persisted subscription (startup).
    pub async fn restore_all(&self) -> Result<usize> {
        self.scheduler.restore_all(&self.store, self.runner()).await
    }

    /// Cancel all jobs (shutdown).
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
    }

    /// Number of live scheduled jobs.
    pub fn job_count(&self) -> usize {
        self.scheduler.job_count()
    }

    fn runner(&self) -> Arc<dyn JobRunner> {
        Arc::clone(&self.runner) as Arc<dyn JobRunner>
    }

    fn install_job(&self, destination: &str, index: usize, cron: &str) -> Result<()> {
        let cron = CronExpression::parse(cron)?;
        self.scheduler
            .install(JobKey::new(destination, index), cron, self.runner());
        Ok(())
    }
}

/// Normalize a user-supplied feed URL: a missing scheme defaults to
/// https, then the result must parse as an absolute http(s) URL.
fn normalize_feed_url(url: &str) -> Result<String> {
    let candidate = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| RelayError::Validation(format!("invalid feed URL: {e}")))?;
    if parsed.host().is_none() {
        return Err(RelayError::Validation("feed URL has no host".to_string()));
    }

    Ok(candidate)
}
