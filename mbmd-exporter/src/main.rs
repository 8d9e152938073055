//! Prometheus exporter for mbmd, with optional Home Assistant discovery.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use mbmd_common::init_tracing;
use mbmd_exporter::{DeviceNameMap, ExporterConfig, HttpServer, ScrapeCollector};
use mbmd_hass_bridge::BridgeRunner;

/// Prometheus exporter for mbmd meter readings.
#[derive(Parser, Debug)]
#[command(name = "mbmd-exporter")]
#[command(about = "Export mbmd meter readings as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Base URL of the mbmd API, e.g. http://mbmd:8080.
    #[arg(long, env = "MBMD_URL")]
    url: Option<String>,

    /// HTTP listen address, e.g. 0.0.0.0:8080 or :8080.
    #[arg(long)]
    listen: Option<String>,

    /// Path of the metrics endpoint.
    #[arg(long)]
    metrics_path: Option<String>,

    /// mbmd configuration file used to resolve device names.
    #[arg(long)]
    mbmd_yaml: Option<String>,

    /// Enable Home Assistant MQTT discovery.
    #[arg(long)]
    hass_enable: bool,

    /// MQTT broker URI, e.g. tcp://mqtt:1883.
    #[arg(long)]
    mqtt_host: Option<String>,

    /// Topic filter carrying mbmd telemetry.
    #[arg(long)]
    mqtt_topic: Option<String>,

    /// Start MQTT sessions clean.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    clean_session: Option<bool>,

    /// Re-send unacknowledged requests after a reconnect.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    resume_subs: Option<bool>,

    /// MQTT connect timeout (e.g. 30s, 1m30s; bare numbers are seconds).
    #[arg(long, value_parser = parse_duration)]
    mqtt_connect_timeout: Option<Duration>,

    /// Upper bound of the MQTT reconnect delay (e.g. 2m; bare numbers are seconds).
    #[arg(long, value_parser = parse_duration)]
    mqtt_max_reconnect: Option<Duration>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut ExporterConfig) {
        if let Some(url) = &self.url {
            config.upstream.url = url.clone();
        }
        if let Some(listen) = &self.listen {
            config.prometheus.listen = listen.clone();
        }
        if let Some(path) = &self.metrics_path {
            config.prometheus.path = path.clone();
        }
        if let Some(path) = &self.mbmd_yaml {
            config.upstream.device_names = path.clone();
        }

        let hass = &mut config.hass;
        if self.hass_enable {
            hass.enabled = true;
        }
        if let Some(host) = &self.mqtt_host {
            hass.broker = Some(host.clone());
        }
        if let Some(topic) = &self.mqtt_topic {
            hass.topic = topic.clone();
        }
        if let Some(clean) = self.clean_session {
            hass.clean_session = clean;
        }
        if let Some(resume) = self.resume_subs {
            hass.resume_subs = resume;
        }
        if let Some(timeout) = self.mqtt_connect_timeout {
            hass.connect_timeout_secs = whole_secs(timeout);
        }
        if let Some(interval) = self.mqtt_max_reconnect {
            hass.max_reconnect_secs = whole_secs(interval);
        }
    }
}

/// Parse a duration such as `30s`, `2m` or `1m30s`; a bare number is seconds.
fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).map_err(|e| format!("invalid duration '{}': {}", value, e))
}

/// Seconds, rounding any fraction up so `500ms` stays non-zero.
fn whole_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };
    args.apply(&mut config);

    init_tracing(&config.logging.with_level_override(args.log_level.as_deref()))?;

    config.validate()?;
    let listen_addr = config.prometheus.listen_addr()?;
    let base_url = config.upstream.base_url().to_string();

    info!(upstream = %base_url, "Starting mbmd exporter");

    let names = DeviceNameMap::load(&config.upstream.device_names);
    let collector = Arc::new(ScrapeCollector::new(
        &base_url,
        config.upstream.timeout(),
        names,
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bridge_task = if config.hass.enabled {
        let runner = BridgeRunner::new(config.hass.clone(), base_url.clone());
        let bridge_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = runner.run(bridge_shutdown).await {
                error!("Discovery bridge error: {}", e);
            }
        }))
    } else {
        None
    };

    let http_server = HttpServer::new(collector, listen_addr, config.prometheus.path.clone());
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx));

    let server_exit = tokio::select! {
        signal = shutdown_signal() => {
            info!("Received {}, shutting down...", signal);
            None
        }
        result = &mut http_task => Some(result),
    };

    shutdown_tx.send(true).ok();

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        if let Some(task) = bridge_task {
            let _ = task.await;
        }
        if server_exit.is_none() {
            let _ = http_task.await;
        }
    })
    .await;

    if let Some(result) = server_exit {
        result??;
    }

    info!("Exporter stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM; returns the name of the signal.
async fn shutdown_signal() -> &'static str {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}
