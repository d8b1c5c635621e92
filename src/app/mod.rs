pub mod capture;
pub mod config;
pub mod controller;
pub mod input;
pub mod logging_system;
pub mod shutdown;

pub use capture::{CaptureControl, LineCaptureControl, StdoutCaptureControl};
pub use config::{AgentConfig, ConfigError, LogLevel};
pub use controller::PageController;
pub use input::{InputError, parse_command, read_commands};
pub use logging_system::{InitializationError, LoggingSystem, setup_logging_safe};
pub use shutdown::SignalHandler;

use crate::buffer::BatchBuffer;
use crate::domain::{PageState, PayloadKind, SharedSessionContext};
use crate::monitoring::{Monitor, ReplicaMonitor, TracingMonitor};
use crate::segment::SegmentBuilder;
use crate::sender::{HttpClient, ReplicaFanout, Transport};
use clap::Parser;
use config::endpoint_url;
use std::process;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct App {
    config: AgentConfig,
    client: HttpClient,
    controller: PageController,
}

impl App {
    pub async fn from_args<I, T>(args: I) -> Result<Self, Box<dyn std::error::Error + Send + Sync>>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = AgentConfig::from_args_and_env(args)?;
        Self::from_config(config).await
    }

    pub async fn from_config(
        config: AgentConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let config = if let Some(config_file) = &config.config_file {
            eprintln!("Loading configuration from file: {}", config_file.display());
            AgentConfig::from_file(config_file)?
        } else {
            config
        };

        setup_logging_safe(config.log_level)?;
        info!("Starting rask-telemetry-agent v{}", get_version());
        info!(
            "Configuration: application_id={}, logs={:?}, rum={:?}, replay={:?}",
            config.application_id, config.logs_endpoint, config.rum_endpoint, config.replay_endpoint
        );

        let client = HttpClient::new(config.client_config())?;
        let controller = build_controller(&config, &client, Arc::new(StdoutCaptureControl::stdout()))?;

        Ok(Self {
            config,
            client,
            controller,
        })
    }

    /// Runs until stdin closes or the process is signalled, then gives
    /// in-flight beacons `unload_grace` to complete.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let signals = SignalHandler::spawn(events_tx.clone());
        let reader = tokio::spawn(read_commands(BufReader::new(tokio::io::stdin()), events_tx));

        info!("rask-telemetry-agent is running. Reading commands from stdin.");
        self.controller.run(events_rx).await;

        signals.abort();
        reader.abort();

        if !self.client.drain(self.config.unload_grace).await {
            warn!(
                "Unload grace period of {:?} elapsed with beacons still in flight",
                self.config.unload_grace
            );
        }

        let stats = self.client.stats();
        info!(
            "rask-telemetry-agent stopped: {} beacons, {} requests ({} ok, {} failed), {} bytes",
            stats.beacons_sent,
            stats.requests_sent,
            stats.requests_succeeded,
            stats.requests_failed,
            stats.bytes_submitted
        );
        Ok(())
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Wires one page controller with a pipeline per configured endpoint.
pub fn build_controller(
    config: &AgentConfig,
    client: &HttpClient,
    capture: Arc<dyn CaptureControl>,
) -> Result<PageController, ConfigError> {
    let page = PageState::new();
    let monitor: Arc<dyn Monitor> = Arc::new(TracingMonitor);
    let context = SharedSessionContext::new(config.application_id.clone());

    let logs = pipeline_transport(
        client,
        &page,
        &monitor,
        "logs",
        config.logs_endpoint.as_deref(),
        config.replica_logs_endpoint.as_deref(),
    )?;
    let rum = pipeline_transport(
        client,
        &page,
        &monitor,
        "rum",
        config.rum_endpoint.as_deref(),
        config.replica_rum_endpoint.as_deref(),
    )?;
    let replay = pipeline_transport(
        client,
        &page,
        &monitor,
        "replay",
        config.replay_endpoint.as_deref(),
        None,
    )?;

    let mut controller = PageController::new(page.clone(), context, capture);
    if let Some(transport) = logs {
        let buffer = BatchBuffer::new(PayloadKind::Logs, config.batch_config(), transport, monitor.clone());
        controller = controller.with_logs(buffer, config.flush_timeout);
    }
    if let Some(transport) = rum {
        let buffer = BatchBuffer::new(PayloadKind::Rum, config.batch_config(), transport, monitor.clone());
        controller = controller.with_rum(buffer, config.flush_timeout);
    }
    if let Some(transport) = replay {
        let builder = SegmentBuilder::new(config.segment_config(), transport, monitor.clone());
        controller = controller.with_replay(builder, config.max_segment_duration);
    }
    Ok(controller)
}

/// Primary sender for one pipeline, fanned out to its replica when one is
/// configured. `None` when the pipeline has no endpoint.
fn pipeline_transport(
    client: &HttpClient,
    page: &PageState,
    monitor: &Arc<dyn Monitor>,
    name: &str,
    primary: Option<&str>,
    replica: Option<&str>,
) -> Result<Option<Arc<dyn Transport>>, ConfigError> {
    let Some(primary) = endpoint_url(name, primary)? else {
        return Ok(None);
    };
    let primary: Arc<dyn Transport> = Arc::new(client.sender(primary, monitor.clone(), page.clone()));

    let Some(replica) = endpoint_url(name, replica)? else {
        return Ok(Some(primary));
    };
    let replica: Arc<dyn Transport> =
        Arc::new(client.sender(replica, Arc::new(ReplicaMonitor), page.clone()));
    let fanout: Arc<dyn Transport> = Arc::new(ReplicaFanout::new(primary, replica));
    Ok(Some(fanout))
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

// Main entry point for the agent binary
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("rask-telemetry-agent {}", get_version());
        return Ok(());
    }

    if args.len() > 1 && (args[1] == "--help" || args[1] == "-h") {
        AgentConfig::parse_from(["rask-telemetry-agent", "--help"]);
        return Ok(());
    }

    let app = match App::from_args(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("Agent error: {}", e);
        process::exit(1);
    }
    // The stdin reader may still be parked on a blocking read.
    process::exit(0);
}
