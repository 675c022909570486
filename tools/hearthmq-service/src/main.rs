//! HearthMQ Service
//!
//! Connects to an MQTT broker and routes every configured node through the
//! generic property module until interrupted.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use hearthmq_bridge::{Bridge, MqttMessenger, PropertyModule};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::ServiceConfig;

#[derive(Parser, Debug)]
#[command(name = "hearthmq")]
#[command(about = "HearthMQ node router")]
#[command(version)]
struct Cli {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker address, overrides the config file (host:port)
    #[arg(short, long)]
    broker: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(broker) = &cli.broker {
        config.override_broker(broker)?;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    tracing::info!("Starting HearthMQ");
    if config.nodes.is_empty() {
        tracing::warn!("No nodes configured, only the broker connection will run");
    }

    let messenger = Arc::new(
        MqttMessenger::connect(&config.mqtt, config.topics()?)
            .context("creating MQTT messenger")?,
    );
    let mut bridge = Bridge::new(messenger.clone(), config.router.clone());

    for entry in &config.nodes {
        let node = entry.build()?;
        let module = Arc::new(PropertyModule::new(
            entry.component.as_str(),
            entry.properties.iter().cloned(),
        ));
        bridge
            .add(node, module)
            .await
            .with_context(|| format!("adding node {:?}", entry.id))?;
    }

    tracing::info!(
        nodes = config.nodes.len(),
        prefix = config.topic_prefix.as_str(),
        "Bridge ready, press Ctrl-C to stop"
    );

    bridge
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await;

    let report = bridge.shutdown(config.drain_timeout()).await;
    if report.aborted > 0 {
        tracing::warn!(
            "{} property handler(s) did not finish within {:?}",
            report.aborted,
            config.drain_timeout()
        );
    }

    tracing::info!(
        connected = messenger.is_connected(),
        "Disconnecting from broker"
    );
    if let Err(e) = messenger.disconnect().await {
        tracing::warn!("Disconnect failed: {}", e);
    }

    tracing::info!("HearthMQ stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from(["hearthmq", "-v", "--broker", "mqtt.lan:1884"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.config.is_none());

        let config = load_config(&cli).unwrap();
        assert_eq!(config.mqtt.broker_host, "mqtt.lan");
        assert_eq!(config.mqtt.broker_port, 1884);
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from(["hearthmq", "--config", "/nonexistent/hearthmq.toml"])
            .unwrap();
        assert!(load_config(&cli).is_err());
    }
}
