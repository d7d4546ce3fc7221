//! Tick execution and delivery for feedrelay.
//!
//! The scheduler fires a job; this runner polls the fetch pipeline for
//! exactly that subscription, transforms the new items, and hands them
//! to the host platform - composed into one forwarded bundle when
//! enabled and supported, one message per item otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::pipeline::{FetchPipeline, PolledItem};
use crate::platform::ChatPlatform;
use crate::render::{MessageRenderer, Outbound};
use crate::scheduler::{JobKey, JobRunner};

/// Runs one scheduled tick end to end.
pub struct TickRunner {
    pipeline: FetchPipeline,
    renderer: Arc<MessageRenderer>,
    platform: Arc<dyn ChatPlatform>,
    compose_forward: bool,
}

impl TickRunner {
    /// Create a tick runner.
    pub fn new(
        pipeline: FetchPipeline,
        renderer: Arc<MessageRenderer>,
        platform: Arc<dyn ChatPlatform>,
        compose_forward: bool,
    ) -> Self {
        Self {
            pipeline,
            renderer,
            platform,
            compose_forward,
        }
    }

    /// Transform and send a batch of polled items, oldest first.
    ///
    /// Send failures are logged and never retried: the dedup cursor has
    /// already advanced, so a flaky send path drops items rather than
    /// flooding the destination with duplicates later.
    pub async fn deliver(&self, destination: &str, items: Vec<PolledItem>) {
        let mut messages = Vec::with_capacity(items.len());
        for item in &items {
            messages.push(self.renderer.render_item(item).await);
        }

        if self.compose_forward && self.platform.supports_bundles(destination) {
            let count = messages.len();
            if let Err(e) = self
                .platform
                .send(destination, &Outbound::Bundle(messages))
                .await
            {
                error!(destination, items = count, error = %e, "bundle delivery failed");
            }
        } else {
            for (i, message) in messages.into_iter().enumerate() {
                if let Err(e) = self
                    .platform
                    .send(destination, &Outbound::Single(message))
                    .await
                {
                    error!(destination, item = i, error = %e, "delivery failed");
                }
            }
        }
    }
}

#[async_trait]
impl JobRunner for TickRunner {
    async fn run(&self, key: &JobKey) {
        debug!(job = %key, "tick fired");

        let items = match self.pipeline.poll(&key.destination, key.index).await {
            Ok(items) => items,
            Err(e) => {
                // Fetch/parse failures abandon the tick; the job stays
                // scheduled for its next fire time.
                warn!(job = %key, error = %e, "poll failed, tick abandoned");
                return;
            }
        };

        if items.is_empty() {
            debug!(job = %key, "no new items");
            return;
        }

        info!(job = %key, items = items.len(), "delivering new items");
        self.deliver(&key.destination, items).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FetchConfig, PicConfig, RenderConfig};
    use crate::feed::{FeedFetcher, ParsedItem};
    use crate::registry::EndpointRegistry;
    use crate::render::OutboundMessage;
    use crate::storage::StateHandle;
    use crate::store::{FeedSource, SubscriptionStore};
    use crate::{RelayError, Result};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records every send; optionally refuses bundles or fails sends.
    struct RecordingPlatform {
        sent: Mutex<Vec<(String, Outbound)>>,
        bundles: bool,
        fail: bool,
    }

    impl RecordingPlatform {
        fn new(bundles: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                bundles,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                bundles: true,
                fail: true,
            })
        }

        fn sent(&self) -> Vec<(String, Outbound)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatPlatform for RecordingPlatform {
        fn supports_bundles(&self, _destination: &str) -> bool {
            self.bundles
        }

        async fn send(&self, destination: &str, outbound: &Outbound) -> Result<()> {
            if self.fail {
                return Err(RelayError::Delivery("send rejected".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((destination.to_string(), outbound.clone()));
            Ok(())
        }
    }

    fn renderer() -> Arc<MessageRenderer> {
        Arc::new(MessageRenderer::new(
            RenderConfig::default(),
            PicConfig::default(),
            "UTC".parse().unwrap(),
        ))
    }

    fn polled(key: &str) -> PolledItem {
        PolledItem {
            channel: "Chan".to_string(),
            item: ParsedItem {
                guid: Some(key.to_string()),
                title: format!("Item {key}"),
                link: None,
                description: None,
                author: None,
                categories: vec![],
                images: vec![],
                published_at: None,
            },
        }
    }

    fn pipeline_over(state: StateHandle) -> FetchPipeline {
        FetchPipeline::new(
            EndpointRegistry::new(state.clone()),
            SubscriptionStore::new(state),
            FeedFetcher::new(&FetchConfig::default()).unwrap(),
            3,
        )
    }

    #[tokio::test]
    async fn test_deliver_composes_bundle_when_supported() {
        let platform = RecordingPlatform::new(true);
        let runner = TickRunner::new(
            pipeline_over(StateHandle::in_memory()),
            renderer(),
            platform.clone(),
            true,
        );

        runner
            .deliver("dest:1", vec![polled("a"), polled("b")])
            .await;

        let sent = platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "dest:1");
        match &sent[0].1 {
            Outbound::Bundle(messages) => assert_eq!(messages.len(), 2),
            other => panic!("expected bundle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deliver_falls_back_to_singles() {
        let platform = RecordingPlatform::new(false);
        let runner = TickRunner::new(
            pipeline_over(StateHandle::in_memory()),
            renderer(),
            platform.clone(),
            true,
        );

        runner
            .deliver("dest:1", vec![polled("a"), polled("b")])
            .await;

        let sent = platform.sent();
        assert_eq!(sent.len(), 2);
        for (_, outbound) in &sent {
            assert!(matches!(outbound, Outbound::Single(_)));
        }
        // Oldest-first order is preserved.
        let texts: Vec<String> = sent
            .iter()
            .map(|(_, o)| match o {
                Outbound::Single(OutboundMessage { text, .. }) => text.clone().unwrap(),
                _ => unreachable!(),
            })
            .collect();
        assert!(texts[0].contains("Item a"));
        assert!(texts[1].contains("Item b"));
    }

    #[tokio::test]
    async fn test_deliver_compose_disabled_sends_singles() {
        let platform = RecordingPlatform::new(true);
        let runner = TickRunner::new(
            pipeline_over(StateHandle::in_memory()),
            renderer(),
            platform.clone(),
            false,
        );

        runner
            .deliver("dest:1", vec![polled("a"), polled("b")])
            .await;

        assert_eq!(platform.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        let platform = RecordingPlatform::failing();
        let runner = TickRunner::new(
            pipeline_over(StateHandle::in_memory()),
            renderer(),
            platform,
            true,
        );

        // Does not panic or propagate.
        runner.deliver("dest:1", vec![polled("a")]).await;
    }

    #[tokio::test]
    async fn test_run_delivers_new_items_and_advances_cursor() {
        let server = MockServer::start().await;
        let body_v1 = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>C</title><item><guid>a</guid><title>A</title></item></channel></rss>"#;
        let body_v2 = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>C</title><item><guid>b</guid><title>B</title></item><item><guid>a</guid><title>A</title></item></channel></rss>"#;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body_v1))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body_v2))
            .mount(&server)
            .await;

        let state = StateHandle::in_memory();
        let store = SubscriptionStore::new(state.clone());
        store
            .add(
                "dest:1",
                FeedSource::Direct {
                    url: format!("{}/feed.xml", server.uri()),
                },
                "0 * * * *",
            )
            .await
            .unwrap();

        let platform = RecordingPlatform::new(true);
        let runner = TickRunner::new(pipeline_over(state), renderer(), platform.clone(), true);
        let key = JobKey::new("dest:1", 0);

        // First tick seeds the cursor, delivers nothing.
        runner.run(&key).await;
        assert!(platform.sent().is_empty());

        // Second tick delivers the one new item.
        runner.run(&key).await;
        let sent = platform.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0].1 {
            Outbound::Bundle(messages) => {
                assert_eq!(messages.len(), 1);
                assert!(messages[0].text.as_deref().unwrap().contains("B"));
            }
            other => panic!("expected bundle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_abandons_tick_on_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let state = StateHandle::in_memory();
        let store = SubscriptionStore::new(state.clone());
        store
            .add(
                "dest:1",
                FeedSource::Direct {
                    url: format!("{}/feed.xml", server.uri()),
                },
                "0 * * * *",
            )
            .await
            .unwrap();

        let platform = RecordingPlatform::new(true);
        let runner = TickRunner::new(pipeline_over(state), renderer(), platform.clone(), true);

        // No panic, no delivery, cursor untouched.
        runner.run(&JobKey::new("dest:1", 0)).await;
        assert!(platform.sent().is_empty());
        let sub = store.get("dest:1", 0).await.unwrap();
        assert!(sub.seen.is_fresh());
    }
}
