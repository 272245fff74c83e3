// Change notifications emitted by handlers

use log::{debug, warn};
#[cfg(test)]
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::mqtt::MqttClient;
use crate::session::AdapterHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AdapterEvent {
    MinorClassChanged { minor_class: String },
    RemoteAliasChanged { address: String, alias: String },
    BondingRemoved { address: String },
    DiscoveryCompleted { owner: String },
}

/// Best-effort emitter. Failing to deliver an event never fails the request
/// that produced it.
pub trait EventSink: Send + Sync {
    fn emit(&self, adapter: &AdapterHandle, event: AdapterEvent);
}

#[derive(Serialize)]
struct EventEnvelope<'a> {
    path: String,
    #[serde(flatten)]
    event: &'a AdapterEvent,
}

/// Publishes events as JSON on `<prefix>/hci<index>/event`.
pub struct MqttEventSink {
    client: MqttClient,
}

impl MqttEventSink {
    pub fn new(client: MqttClient) -> Self {
        Self { client }
    }
}

impl EventSink for MqttEventSink {
    fn emit(&self, adapter: &AdapterHandle, event: AdapterEvent) {
        let envelope = EventEnvelope {
            path: adapter.path(),
            event: &event,
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Can't encode {event:?}: {e}");
                return;
            }
        };

        let topic = self.client.event_topic(adapter);
        debug!("Emitting {event:?} on {topic}");
        if let Err(e) = self.client.try_publish(topic, payload) {
            warn!("Can't emit {event:?} for {}: {e}", adapter.name());
        }
    }
}

/// Keeps every emitted event, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(u16, AdapterEvent)>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(u16, AdapterEvent)> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
impl EventSink for RecordingSink {
    fn emit(&self, adapter: &AdapterHandle, event: AdapterEvent) {
        self.events.lock().push((adapter.index(), event));
    }
}
