//! Typed request/response port between the coordinator and the bridge
//!
//! Delivery is fire-and-forget: nothing is acknowledged, and a send to a
//! closed port is reported to the caller and otherwise dropped.

use crate::error::CoreError;
use crate::models::{FetchLocation, LocationFetched};
use tokio::sync::mpsc;

/// Create a connected pair of ports
pub fn channel() -> (CoordinatorPort, BridgePort) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    (
        CoordinatorPort {
            requests: FetchSender { tx: request_tx },
            responses: ResponseReceiver { rx: response_rx },
        },
        BridgePort {
            requests: request_rx,
            responses: response_tx,
        },
    )
}

/// Coordinator side: sends lookups, receives results
pub struct CoordinatorPort {
    requests: FetchSender,
    responses: ResponseReceiver,
}

impl CoordinatorPort {
    /// Separate the sending half (owned by the coordinator) from the
    /// receiving half (polled by the pipeline loop)
    pub fn split(self) -> (FetchSender, ResponseReceiver) {
        (self.requests, self.responses)
    }
}

/// Sending half of the coordinator port
#[derive(Debug, Clone)]
pub struct FetchSender {
    tx: mpsc::UnboundedSender<FetchLocation>,
}

impl FetchSender {
    pub fn send(&self, request: FetchLocation) -> Result<(), CoreError> {
        self.tx.send(request).map_err(|_| CoreError::PortClosed {
            direction: "fetch_location",
        })
    }
}

/// Receiving half of the coordinator port
#[derive(Debug)]
pub struct ResponseReceiver {
    rx: mpsc::UnboundedReceiver<LocationFetched>,
}

impl ResponseReceiver {
    pub async fn recv(&mut self) -> Option<LocationFetched> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LocationFetched> {
        self.rx.try_recv().ok()
    }
}

/// Bridge side: receives lookups, sends results
#[derive(Debug)]
pub struct BridgePort {
    requests: mpsc::UnboundedReceiver<FetchLocation>,
    responses: mpsc::UnboundedSender<LocationFetched>,
}

impl BridgePort {
    pub async fn recv(&mut self) -> Option<FetchLocation> {
        self.requests.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FetchLocation> {
        self.requests.try_recv().ok()
    }

    pub fn responder(&self) -> mpsc::UnboundedSender<LocationFetched> {
        self.responses.clone()
    }
}
