// MQTT client module using rumqttc

use std::time::Duration;

use log::{debug, error, info};
use rumqttc::{AsyncClient, ClientError, Event, Incoming, MqttOptions, Publish, QoS};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::MqttConfig;
use crate::session::AdapterHandle;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const INBOX_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("MQTT client error: {0}")]
    Client(#[from] ClientError),
}

pub fn request_topic(prefix: &str) -> String {
    format!("{prefix}/request")
}

/// Reply topic of `sender`. Topic separators and wildcards in the sender
/// become `_`.
pub fn reply_topic(prefix: &str, sender: &str) -> String {
    let sender: String = sender
        .chars()
        .map(|c| match c {
            '/' | '+' | '#' => '_',
            c => c,
        })
        .collect();
    format!("{prefix}/reply/{sender}")
}

pub fn event_topic(prefix: &str, adapter: &AdapterHandle) -> String {
    format!("{prefix}/{}/event", adapter.name())
}

#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
    host: String,
    prefix: String,
}

impl MqttClient {
    /// Starts the connection. Messages arriving on the request topic are
    /// forwarded to the returned inbox; the subscription is renewed on every
    /// reconnect.
    pub fn connect(config: &MqttConfig) -> (Self, mpsc::Receiver<Publish>) {
        let mut mqttoptions = MqttOptions::new(&config.client_id, &config.host, config.port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        if let Some(username) = &config.username {
            mqttoptions.set_credentials(username, config.password.as_deref().unwrap_or(""));
        }

        info!("Connecting to MQTT broker: {}:{}", config.host, config.port);
        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);
        let (inbox, rx) = mpsc::channel(INBOX_CAPACITY);

        let subscriber = client.clone();
        let requests = request_topic(&config.topic_prefix);

        // Start event loop in background
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("MQTT Connected");
                        if let Err(e) = subscriber.try_subscribe(&requests, QoS::AtLeastOnce) {
                            error!("Can't subscribe to {requests}: {e}");
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if inbox.send(publish).await.is_err() {
                            info!("Request inbox closed, stopping MQTT event loop");
                            break;
                        }
                    }
                    Ok(notification) => {
                        debug!("MQTT event: {:?}", notification);
                    }
                    Err(e) => {
                        error!("MQTT event loop error: {e}");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        let client = MqttClient {
            client,
            host: config.host.clone(),
            prefix: config.topic_prefix.clone(),
        };
        (client, rx)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn request_topic(&self) -> String {
        request_topic(&self.prefix)
    }

    pub fn reply_topic(&self, sender: &str) -> String {
        reply_topic(&self.prefix, sender)
    }

    pub fn event_topic(&self, adapter: &AdapterHandle) -> String {
        event_topic(&self.prefix, adapter)
    }

    pub async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), MqttError> {
        debug!("Publishing to: {}", topic);
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    /// Queues a publish without waiting for room in the client's queue.
    pub fn try_publish(&self, topic: String, payload: Vec<u8>) -> Result<(), MqttError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}
