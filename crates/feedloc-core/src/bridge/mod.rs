//! Privileged fetch bridge
//!
//! Runs location lookups in a separate task that holds the page
//! credentials. Every request produces exactly one `LocationFetched`; any
//! failure is normalized to an empty location.

pub mod client;
pub mod port;

pub use client::{extract_location, CookieJar, CredentialSource, HttpLocationFetcher};
pub use port::{channel, BridgePort, CoordinatorPort, FetchSender, ResponseReceiver};

use crate::error::CoreError;
use crate::models::{FetchLocation, LocationFetched};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Performs a single location lookup for a handle
pub trait LocationFetcher: Send + Sync + 'static {
    fn fetch(&self, handle: &str) -> impl Future<Output = Result<String, CoreError>> + Send;
}

/// Fetcher answering from a fixed table, counting every call
///
/// Handles missing from the table fail with a 404 status.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    locations: HashMap<String, String>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StaticFetcher {
    pub fn new<I, K, V>(locations: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            locations: locations
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Number of lookups performed for `handle`
    pub fn calls(&self, handle: &str) -> usize {
        self.calls.lock().get(handle).copied().unwrap_or(0)
    }
}

impl LocationFetcher for StaticFetcher {
    async fn fetch(&self, handle: &str) -> Result<String, CoreError> {
        *self.calls.lock().entry(handle.to_string()).or_default() += 1;
        self.locations
            .get(handle)
            .cloned()
            .ok_or_else(|| CoreError::HttpStatus {
                handle: handle.to_string(),
                status: 404,
            })
    }
}

impl<F: LocationFetcher> LocationFetcher for Arc<F> {
    fn fetch(&self, handle: &str) -> impl Future<Output = Result<String, CoreError>> + Send {
        (**self).fetch(handle)
    }
}

/// Spawner for the privileged lookup task
pub struct Bridge;

impl Bridge {
    /// Serve lookups from `port` until the coordinator side is dropped
    ///
    /// Each request runs in its own task so a slow lookup never delays
    /// others. With `request_timeout` unset, a hung request never answers.
    pub fn spawn<F: LocationFetcher>(
        fetcher: F,
        mut port: BridgePort,
        request_timeout: Option<Duration>,
    ) -> JoinHandle<()> {
        let fetcher = Arc::new(fetcher);
        tokio::spawn(async move {
            info!(
                request = %FetchLocation::event_name(),
                response = %LocationFetched::event_name(),
                "Fetch bridge started"
            );
            while let Some(request) = port.recv().await {
                let fetcher = fetcher.clone();
                let responder = port.responder();
                tokio::spawn(async move {
                    let response = Self::perform(&*fetcher, request.handle, request_timeout).await;
                    if responder.send(response).is_err() {
                        debug!("Coordinator gone, dropping location response");
                    }
                });
            }
            info!("Fetch bridge stopped");
        })
    }

    /// Run one lookup and normalize the outcome into a response signal
    pub async fn perform<F: LocationFetcher>(
        fetcher: &F,
        handle: String,
        request_timeout: Option<Duration>,
    ) -> LocationFetched {
        let result = match request_timeout {
            Some(limit) => match tokio::time::timeout(limit, fetcher.fetch(&handle)).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Timeout {
                    handle: handle.clone(),
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => fetcher.fetch(&handle).await,
        };

        match result {
            Ok(location) => {
                debug!(handle = %handle, location = %location, "Location fetched");
                LocationFetched::new(handle, location)
            }
            Err(e) if e.is_network() => {
                warn!(handle = %handle, error = %e, "Error fetching location");
                LocationFetched::empty(handle)
            }
            Err(e) => {
                error!(handle = %handle, error = %e, "Unexpected lookup failure");
                LocationFetched::empty(handle)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HangingFetcher;

    impl LocationFetcher for HangingFetcher {
        async fn fetch(&self, _handle: &str) -> Result<String, CoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_success_passes_location() {
        let fetcher = StaticFetcher::new([("alice", "Paris")]);
        let response = Bridge::perform(&fetcher, "alice".to_string(), None).await;
        assert_eq!(response, LocationFetched::new("alice", "Paris"));
        assert_eq!(fetcher.calls("alice"), 1);
    }

    #[tokio::test]
    async fn test_failure_normalized_to_empty() {
        let fetcher = StaticFetcher::new(Vec::<(String, String)>::new());
        let response = Bridge::perform(&fetcher, "ghost".to_string(), None).await;
        assert_eq!(response, LocationFetched::empty("ghost"));
    }

    struct DisconnectedFetcher;

    impl LocationFetcher for DisconnectedFetcher {
        async fn fetch(&self, _handle: &str) -> Result<String, CoreError> {
            Err(CoreError::PortClosed {
                direction: "fetch_location",
            })
        }
    }

    #[tokio::test]
    async fn test_local_failure_normalized_to_empty() {
        let response = Bridge::perform(&DisconnectedFetcher, "erin".to_string(), None).await;
        assert_eq!(response, LocationFetched::empty("erin"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_normalized_to_empty() {
        let response = Bridge::perform(
            &HangingFetcher,
            "slow".to_string(),
            Some(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(response, LocationFetched::empty("slow"));
    }

    #[tokio::test]
    async fn test_spawned_bridge_answers_each_request_once() {
        let fetcher = Arc::new(StaticFetcher::new([("alice", "Paris"), ("bob", "")]));
        let (coordinator, bridge_port) = channel();
        let (sender, mut receiver) = coordinator.split();
        let task = Bridge::spawn(fetcher.clone(), bridge_port, None);

        sender.send(FetchLocation::new("alice")).unwrap();
        sender.send(FetchLocation::new("bob")).unwrap();
        sender.send(FetchLocation::new("ghost")).unwrap();

        let mut responses = Vec::new();
        for _ in 0..3 {
            responses.push(receiver.recv().await.unwrap());
        }
        responses.sort_by(|a, b| a.handle.cmp(&b.handle));

        assert_eq!(
            responses,
            vec![
                LocationFetched::new("alice", "Paris"),
                LocationFetched::empty("bob"),
                LocationFetched::empty("ghost"),
            ]
        );
        for handle in ["alice", "bob", "ghost"] {
            assert_eq!(fetcher.calls(handle), 1);
        }
        assert!(receiver.try_recv().is_none());

        drop(sender);
        task.await.unwrap();
    }
}
