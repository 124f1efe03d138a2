//! ==============================================================================
//! main.rs - finish-line host entry point
//! ==============================================================================
//!
//! purpose:
//!     runs next to the track. proximity sensors along the lane report
//!     distances; every time a truck passes a replay sensor the next waypoint
//!     of its loaded route is published, and when it reaches the finish-line
//!     sensor the truck is stopped, identified and reset to its origin.
//!
//! responsibilities:
//!     - load configuration and set up logging
//!     - pick the telemetry transport (direct iot cloud rest, or mqtt)
//!     - start one sampler task per sensor
//!     - serve the route-load REST interface
//!     - run the controller until ctrl-c
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    host (this file)                         │
//!     │  ┌─────────────┐  ┌─────────────┐                           │
//!     │  │ samplers    │  │ web server  │                           │
//!     │  │ (1/sensor)  │  │ (port 8888) │                           │
//!     │  └──────┬──────┘  └──────┬──────┘                           │
//!     │         └────────┬───────┘ mpsc<Command>                    │
//!     │            ┌─────┴──────┐                                   │
//!     │            │ controller │ <- controller.rs                  │
//!     │            └─────┬──────┘                                   │
//!     └──────────────────┼──────────────────────────────────────────┘
//!            ┌───────────┼─────────────┬──────────────┐
//!            ▼           ▼             ▼              ▼
//!        telemetry    actuator      reader          lcd
//!
//! ==============================================================================

mod config;
mod controller;
mod display;
mod domain;
mod edge;
mod hal;
mod route;
mod server;
mod services;
mod transport;
mod workflow;

use anyhow::{Context, Result};
use clap::Parser;
use config::{HostConfig, TransportMode};
use controller::{Command, Controller};
use display::{Lcd, StepInterpreter};
use domain::{SensorCatalog, SensorConfig, SensorReading};
use edge::EdgeDetector;
use hal::{Hal, ProximitySensor};
use services::{HttpActuator, HttpReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;
use transport::{DirectTransport, IotcsRegistry, MqttBroker, PubSubTransport, Telemetry};
use workflow::FinishLine;

const COMMAND_QUEUE: usize = 64;
const PROBE_INTERVAL: Duration = Duration::from_secs(2);
const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(version, about = "finish-line host: route replay and finish-line workflow")]
struct Cli {
    /// path to finishline.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// iot cloud server url, overrides [transport.direct] server_url
    #[arg(short, long, env = "FINISHLINE_SERVER")]
    server: Option<String>,

    /// route server port, overrides [server] port
    #[arg(short, long, env = "FINISHLINE_PORT")]
    port: Option<u16>,

    /// debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: load configuration (logged at info until the real filter is known)
    let bootstrap = tracing_subscriber::fmt().with_env_filter(EnvFilter::new("info")).finish();
    let mut config = tracing::subscriber::with_default(bootstrap, || {
        HostConfig::load_or_default(cli.config.as_deref())
    })?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // step 2: logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { config.logging.level.as_str() })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("===========================================================");
    info!("  Finish-Line Host v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================================");
    config.log_summary();

    // step 3: telemetry transport. ctrl-c while the cloud is still down exits.
    let telemetry = tokio::select! {
        built = build_transport(&config, cli.server.clone()) => built?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted before startup finished");
            return Ok(());
        }
    };

    // step 4: finish-line collaborators
    let actuator =
        HttpActuator::new(&config.actuator.stop_url, config::millis(config.actuator.timeout_ms))?;
    let reader =
        HttpReader::new(&config.reader.capture_url, config::millis(config.reader.timeout_ms))?;
    let interpreter = if config.display.enabled {
        Some(StepInterpreter::new(Box::new(Lcd::new().context("failed to open lcd")?)))
    } else {
        None
    };
    let alert_urn = config.transport.alert_urn.clone();
    let finish = FinishLine::new(Box::new(actuator), Box::new(reader), alert_urn)
        .with_countdown(config.display.countdown_steps());

    let catalog = SensorCatalog::new(config.sensors.clone());
    let mut controller = Controller::new(
        catalog,
        EdgeDetector::new(config.detector.threshold),
        finish,
        telemetry,
        interpreter,
    );

    // step 5: producers
    let (commands, mut inbox) = mpsc::channel(COMMAND_QUEUE);

    let web_commands = commands.clone();
    let (bind, port) = (config.server.bind.clone(), config.server.port);
    tokio::spawn(async move {
        if let Err(e) = server::run_server(&bind, port, web_commands).await {
            error!(error = %e, "web server error");
        }
    });

    let hal: Arc<dyn ProximitySensor> = Arc::new(Hal::new().context("failed to open sensor bus")?);
    let period = config::millis(config.polling.interval_ms);
    for sensor in &config.sensors {
        spawn_sampler(
            sensor.clone(),
            hal.clone(),
            commands.clone(),
            period,
            config.logging.show_sensor_data,
        );
    }
    drop(commands);

    // step 6: controller loop
    info!(sensors = config.sensors.len(), "ready");
    tokio::select! {
        _ = controller.run(&mut inbox) => {}
        _ = tokio::signal::ctrl_c() => info!("ctrl-c received, shutting down"),
    }
    controller.shutdown();
    info!("bye");
    Ok(())
}

async fn build_transport(
    config: &HostConfig,
    server_override: Option<String>,
) -> Result<Box<dyn Telemetry>> {
    let model_urn = config.transport.model_urn.clone();
    match config.transport.mode {
        TransportMode::Direct => {
            let direct = config
                .transport
                .direct
                .as_ref()
                .context("[transport.direct] missing")?;
            let server_url = server_override.unwrap_or_else(|| direct.server_url.clone());
            let registry = IotcsRegistry::new(
                server_url,
                direct.token.clone(),
                direct.devices.clone(),
                config::millis(direct.timeout_ms),
            )?;
            registry.wait_until_reachable(PROBE_INTERVAL).await;
            Ok(Box::new(DirectTransport::new(Box::new(registry), model_urn)))
        }
        TransportMode::PubSub => {
            let pubsub = config
                .transport
                .pubsub
                .as_ref()
                .context("[transport.pubsub] missing")?;
            let targets = match &pubsub.settings_url {
                Some(url) => transport::pubsub::fetch_targets(url, Duration::from_secs(5)).await?,
                None => pubsub.devices.clone(),
            };
            if targets.is_empty() {
                warn!("no pub/sub vehicle targets configured");
            }
            let broker = MqttBroker::connect(
                &pubsub.broker_host,
                pubsub.broker_port,
                &pubsub.client_id,
                MQTT_KEEP_ALIVE,
            );
            Ok(Box::new(PubSubTransport::new(Box::new(broker), targets, model_urn)))
        }
    }
}

/// poll one sensor forever, forwarding each sample to the controller.
/// samples are dropped rather than queued when the controller is behind.
fn spawn_sampler(
    sensor: SensorConfig,
    hal: Arc<dyn ProximitySensor>,
    commands: mpsc::Sender<Command>,
    period: Duration,
    show_data: bool,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let taken_at = Instant::now();
            let bus = hal.clone();
            let port = sensor.port;
            let measured = tokio::task::spawn_blocking(move || bus.measure_distance(port)).await;
            let distance = match measured {
                Ok(Ok(distance)) => distance,
                Ok(Err(e)) => {
                    warn!(sensor = %sensor.id, error = %e, "read error");
                    continue;
                }
                Err(e) => {
                    error!(sensor = %sensor.id, error = %e, "sampler task failed");
                    continue;
                }
            };
            if show_data {
                debug!(sensor = %sensor.id, distance, "sample");
            }

            let reading = SensorReading { sensor: sensor.id.clone(), distance, taken_at };
            match commands.try_send(Command::Reading(reading)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!(sensor = %sensor.id, "controller busy, sample dropped")
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }
    });
}
