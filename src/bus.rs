// Request bus: MQTT requests in, replies out
//
// Requests are handed to the worker of the adapter their path names, in the
// order they arrive. Replies are published on the caller's reply topic as
// soon as their worker finishes them.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use rumqttc::Publish;
use tokio::sync::{mpsc, oneshot};

use crate::dispatch::{Dispatch, ADAPTER_INTERFACE};
use crate::error::AdapterError;
use crate::message::{Request, Response};
use crate::mqtt::MqttClient;
use crate::worker::AdapterWorker;

/// Workers by object path.
#[derive(Clone, Default)]
pub struct Registry {
    workers: Arc<RwLock<HashMap<String, AdapterWorker>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, worker: AdapterWorker) {
        let path = worker.handle().path();
        info!("Serving {path}");
        self.workers.write().insert(path, worker);
    }

    pub fn get(&self, path: &str) -> Option<AdapterWorker> {
        self.workers.read().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.workers.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Queues the request on its adapter's worker. Must be called in arrival
    /// order; the returned reply may be awaited anywhere.
    pub fn enqueue(&self, request: Request) -> PendingReply {
        let Some(worker) = self.get(&request.path) else {
            let error = if request.interface == ADAPTER_INTERFACE {
                AdapterError::unknown_path(&request.path)
            } else {
                AdapterError::unknown_interface(&request.interface)
            };
            return PendingReply::ready(&request, &error);
        };

        match worker.enqueue(request.clone()) {
            Ok(receiver) => PendingReply {
                deliver: !request.no_reply,
                state: Pending::Queued { request, receiver },
            },
            Err(e) => {
                warn!("Dropping {} for {}: {e}", request.member, request.path);
                PendingReply::ready(&request, &AdapterError::unknown_path(&request.path))
            }
        }
    }
}

enum Pending {
    Ready(Response),
    Queued {
        request: Request,
        receiver: oneshot::Receiver<Dispatch>,
    },
}

pub struct PendingReply {
    state: Pending,
    deliver: bool,
}

/// A finished request. The response is built even when it won't be sent.
#[derive(Debug)]
pub struct Settled {
    pub response: Response,
    pub deliver: bool,
}

impl PendingReply {
    fn ready(request: &Request, error: &AdapterError) -> Self {
        Self {
            state: Pending::Ready(request.error(error)),
            deliver: !request.no_reply,
        }
    }

    pub async fn settle(self) -> Settled {
        let response = match self.state {
            Pending::Ready(response) => response,
            Pending::Queued { request, receiver } => match receiver.await {
                Ok(Dispatch::Reply { response, .. }) => response,
                Ok(Dispatch::NotHandled(request)) => {
                    request.error(&AdapterError::unknown_interface(&request.interface))
                }
                Err(_) => request.error(&AdapterError::unknown_path(&request.path)),
            },
        };
        Settled {
            response,
            deliver: self.deliver,
        }
    }

    /// The reply to send, or `None` when the caller asked for none.
    pub async fn resolve(self) -> Option<Response> {
        let settled = self.settle().await;
        settled.deliver.then_some(settled.response)
    }
}

async fn deliver(client: &MqttClient, response: Response) {
    if response.destination.is_empty() {
        warn!("Reply to serial {} has no destination", response.reply_serial);
        return;
    }
    let topic = client.reply_topic(&response.destination);
    let payload = match response.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            error!("Can't encode reply message: {e}");
            return;
        }
    };
    debug!("Replying to serial {} on {topic}", response.reply_serial);
    if let Err(e) = client.publish(topic, payload).await {
        error!("Can't send reply message: {e}");
    }
}

/// Serves requests from `inbox` until it closes.
pub async fn run(registry: Registry, client: MqttClient, mut inbox: mpsc::Receiver<Publish>) {
    info!(
        "Listening for requests on {} ({})",
        client.request_topic(),
        registry.paths().join(", ")
    );

    while let Some(publish) = inbox.recv().await {
        let request = match Request::parse(&publish.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Ignoring message on {}: {e}", publish.topic);
                continue;
            }
        };

        let pending = registry.enqueue(request);
        let client = client.clone();
        tokio::spawn(async move {
            if let Some(response) = pending.resolve().await {
                deliver(&client, response).await;
            }
        });
    }
    info!("Request inbox closed");
}
