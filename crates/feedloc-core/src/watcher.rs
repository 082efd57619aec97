//! Feed container watcher
//!
//! Waits for the feed container to be rendered, then subscribes to its
//! change stream. The page may still be loading when enrichment starts, so
//! the lookup is retried on a fixed delay.

use crate::dom::{Document, MutationStream, NodeId, SharedDocument};
use crate::scanner::EnrichmentScanner;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Configuration for the container watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Delay between container lookups while the page loads
    pub bootstrap_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            bootstrap_delay: Duration::from_millis(500),
        }
    }
}

/// A container found in the page, with its change subscription
#[derive(Debug)]
pub struct AttachedContainer {
    pub container: NodeId,
    pub mutations: MutationStream,
    /// Number of lookups that found nothing before the container appeared
    pub attempts: u32,
}

/// Locates and observes the feed container
pub struct ContentWatcher;

impl ContentWatcher {
    /// Poll until the container exists, then observe it
    ///
    /// Never gives up; callers stop it by dropping the future.
    pub async fn attach<D: Document>(
        doc: &SharedDocument<D>,
        scanner: &EnrichmentScanner,
        config: &WatcherConfig,
    ) -> AttachedContainer {
        let mut attempts = 0;
        loop {
            if let Some(attached) = Self::try_attach(doc, scanner, attempts) {
                return attached;
            }

            attempts += 1;
            if attempts == 1 {
                debug!(
                    delay_ms = config.bootstrap_delay.as_millis() as u64,
                    "Feed container not rendered yet, waiting"
                );
            } else {
                trace!(attempts, "Feed container still missing");
            }
            tokio::time::sleep(config.bootstrap_delay).await;
        }
    }

    fn try_attach<D: Document>(
        doc: &SharedDocument<D>,
        scanner: &EnrichmentScanner,
        attempts: u32,
    ) -> Option<AttachedContainer> {
        let mut guard = doc.lock();
        let container = scanner.find_container(&*guard)?;
        let mutations = guard.observe(container);
        info!(attempts, "Observing feed container");
        Some(AttachedContainer {
            container,
            mutations,
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomContract;
    use crate::dom::{shared, FeedBuilder, FeedPost};
    use crate::event::EventBus;

    fn scanner() -> EnrichmentScanner {
        EnrichmentScanner::new(DomContract::default(), EventBus::default_capacity())
    }

    #[tokio::test]
    async fn test_attach_immediately_when_present() {
        let mut builder = FeedBuilder::new(DomContract::default());
        let (doc, container) = builder.page(&[FeedPost::new("alice")]).unwrap();
        let doc = shared(doc);

        let attached = ContentWatcher::attach(&doc, &scanner(), &WatcherConfig::default()).await;
        assert_eq!(attached.container, container);
        assert_eq!(attached.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_waits_for_container() {
        let builder = FeedBuilder::new(DomContract::default());
        let doc = shared(builder.loading_page());
        let scanner = scanner();
        let config = WatcherConfig {
            bootstrap_delay: Duration::from_millis(500),
        };

        let page = doc.clone();
        let renderer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            let mut guard = page.lock();
            builder.add_container(&mut guard).unwrap()
        });

        let attached = ContentWatcher::attach(&doc, &scanner, &config).await;
        let container = renderer.await.unwrap();

        assert_eq!(attached.container, container);
        // Lookups at 0, 500 and 1000ms miss; the one at 1500ms succeeds
        assert_eq!(attached.attempts, 3);
    }

    #[tokio::test]
    async fn test_stream_reports_new_units() {
        let mut builder = FeedBuilder::new(DomContract::default());
        let (doc, container) = builder.page(&[]).unwrap();
        let doc = shared(doc);

        let mut attached =
            ContentWatcher::attach(&doc, &scanner(), &WatcherConfig::default()).await;

        let unit = {
            let mut guard = doc.lock();
            let unit = builder.post(&mut guard, &FeedPost::new("bob")).unwrap();
            guard.append_child(container, unit).unwrap();
            unit
        };

        let batch = attached.mutations.recv().await.unwrap();
        assert_eq!(batch.added, vec![unit]);
    }
}
