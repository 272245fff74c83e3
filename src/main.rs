// Bluetooth adapter control daemon
// Serves org.bluez.Adapter requests over MQTT

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use log::{error, info, warn};
use tokio::signal;

use btadapterd::bluetooth;
use btadapterd::bus::{self, Registry};
use btadapterd::config::{self, Backend, Config};
use btadapterd::dispatch::Dispatcher;
use btadapterd::events::MqttEventSink;
use btadapterd::handlers::Services;
use btadapterd::hci::{watch_inquiry_complete, RawHciChannel, SimulatedController};
use btadapterd::ident::OuiDatabase;
use btadapterd::mqtt::MqttClient;
use btadapterd::session::{AdapterHandle, AdapterSession};
use btadapterd::store::TextFileStore;
use btadapterd::worker::AdapterWorker;

fn load_oui(path: &str) -> OuiDatabase {
    match OuiDatabase::load(Path::new(path)) {
        Ok(oui) => oui,
        Err(e) => {
            warn!("Can't read OUI database {path}: {e}");
            OuiDatabase::empty()
        }
    }
}

fn start_worker(
    registry: &Registry,
    config: &Config,
    services: &Services,
    handle: AdapterHandle,
    up: bool,
) -> AdapterWorker {
    let mut session = AdapterSession::new(handle, config.bluetooth.discoverable_timeout);
    session.set_up(up);
    let (worker, _task) = AdapterWorker::spawn(Dispatcher::new(session, services.clone()));
    registry.insert(worker.clone());
    worker
}

async fn start_hci(
    registry: &Registry,
    config: &Config,
    services: impl Fn(Arc<RawHciChannel>) -> Services,
) -> anyhow::Result<bluer::Session> {
    let session = bluer::Session::new()
        .await
        .context("Failed to connect to BlueZ")?;
    let adapters = bluetooth::enumerate(&session, &config.bluetooth)
        .await
        .context("Failed to list Bluetooth adapters")?;

    let indexes = adapters.iter().map(|a| a.handle().index()).collect();
    let services = services(Arc::new(RawHciChannel::new(indexes)));

    for adapter in adapters {
        let handle = adapter.handle().clone();
        let powered = match adapter.is_powered().await {
            Ok(powered) => powered,
            Err(e) => {
                warn!("Can't read power state of {}: {e}", handle.name());
                false
            }
        };

        let worker = start_worker(registry, config, &services, handle.clone(), powered);

        let completions = worker.clone();
        if let Err(e) = watch_inquiry_complete(handle.index(), move || {
            completions.inquiry_complete().is_ok()
        }) {
            warn!("No inquiry monitor for {}: {e}", handle.name());
        }

        tokio::spawn(async move {
            if let Err(e) = adapter.watch_power(worker).await {
                error!("Power monitor for {} failed: {e}", handle.name());
            }
        });
    }
    Ok(session)
}

fn start_simulated(
    registry: &Registry,
    config: &Config,
    services: impl Fn(Arc<SimulatedController>) -> Services,
) -> anyhow::Result<()> {
    let handles = config
        .bluetooth
        .simulated_adapters()
        .context("Invalid simulated adapters")?;

    let controller = SimulatedController::new();
    for handle in &handles {
        controller.add_adapter(handle);
    }
    let services = services(Arc::new(controller));

    for handle in handles {
        info!("Simulating {} ({})", handle.name(), handle.address());
        start_worker(registry, config, &services, handle, true);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_default_env().init();

    info!("Starting Bluetooth adapter daemon");

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;

    info!("Configuration loaded successfully");

    // Initialize MQTT client
    let (mqtt_client, inbox) = MqttClient::connect(&config.mqtt);

    info!("MQTT client connecting to {}", mqtt_client.host());

    let store = Arc::new(TextFileStore::new(&config.storage.dir));
    let events = Arc::new(MqttEventSink::new(mqtt_client.clone()));
    let oui = Arc::new(load_oui(&config.bluetooth.oui_path));
    let registry = Registry::new();

    // Kept alive for the adapters' event streams
    let _bluez = match config.bluetooth.backend {
        Backend::Hci => {
            let session = start_hci(&registry, &config, |channel| Services {
                channel,
                store: store.clone(),
                events: events.clone(),
                oui: oui.clone(),
            })
            .await?;
            Some(session)
        }
        Backend::Simulated => {
            start_simulated(&registry, &config, |channel| Services {
                channel,
                store: store.clone(),
                events: events.clone(),
                oui: oui.clone(),
            })?;
            None
        }
    };

    if registry.paths().is_empty() {
        warn!("No adapters to serve");
    }

    info!("Setup complete. Serving requests...");
    let server = tokio::spawn(bus::run(registry.clone(), mqtt_client, inbox));

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    info!("Shutting down...");
    server.abort();

    Ok(())
}
