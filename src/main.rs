use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use larder_core::{ClientCredentials, HostSignals, StaticHost};
use larder_proxy::{FatSecretClient, FatSecretEndpoints, ProxyConfig};
use larder_settings::LarderSettings;
use larder_telemetry::{
    BufferConfig, HttpCollector, HttpCollectorConfig, TelemetryBuffer, TelemetryConfig,
};
use tracing::Level;

#[derive(Parser)]
#[command(name = "larder", version, about = "Larder nutrition proxy and telemetry relay")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the nutrition proxy (default).
    Serve {
        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        host: Option<String>,
    },
    /// Print the effective settings as JSON.
    Settings,
}

// Panics reach the telemetry buffer through the panic hook and a listener
// task, which only run when the process unwinds.
#[cfg(panic = "abort")]
compile_error!("larder must be built with panic = \"unwind\"");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = larder_settings::load_settings().context("failed to load settings")?;

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        host: None,
    }) {
        Command::Settings => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Serve { port, host } => serve(settings, host, port).await,
    }
}

async fn serve(
    settings: LarderSettings,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let _telemetry = larder_telemetry::init_telemetry(telemetry_config(&settings));
    tracing::info!(name = %settings.name, "starting larder");

    let buffer = TelemetryBuffer::new(
        buffer_config(&settings),
        Arc::new(HttpCollector::new(HttpCollectorConfig {
            errors_url: settings.collector.errors_url.clone(),
            metrics_url: settings.collector.metrics_url.clone(),
            timeout: Some(Duration::from_millis(settings.collector.timeout_ms)),
        })),
        Arc::new(StaticHost::new(settings.telemetry.host_url.clone())),
    );

    let signals = HostSignals::default();
    signals.install_panic_hook();
    let subscription = buffer.subscribe(&signals);

    let client = FatSecretClient::new(
        ClientCredentials::fatsecret_from_env(),
        FatSecretEndpoints {
            token_url: settings.proxy.token_url.clone(),
            api_url: settings.proxy.api_url.clone(),
        },
    );
    let config = ProxyConfig {
        host: host.unwrap_or_else(|| settings.proxy.host.clone()),
        port: port.unwrap_or(settings.proxy.port),
        default_max_results: settings.proxy.default_max_results,
    };
    let handle = larder_proxy::start(config, client, Some(buffer.clone()), &signals)
        .await
        .context("failed to start nutrition proxy")?;

    tracing::info!(port = handle.port, session_id = %buffer.session_id(), "larder ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    let report = buffer.shutdown(subscription).await;
    if !report.is_success() {
        tracing::warn!(stats = ?buffer.stats(), "exiting with undelivered telemetry");
    }
    Ok(())
}

fn telemetry_config(settings: &LarderSettings) -> TelemetryConfig {
    let logging = &settings.logging;
    TelemetryConfig {
        log_level: parse_level(&logging.level).unwrap_or(Level::INFO),
        module_levels: logging
            .module_levels
            .iter()
            .filter_map(|(module, level)| Some((module.clone(), parse_level(level)?)))
            .collect(),
        persist_diagnostics: logging.persist_diagnostics,
        diagnostics_db_path: larder_settings::larder_home().join(&logging.diagnostics_db_path),
    }
}

fn buffer_config(settings: &LarderSettings) -> BufferConfig {
    let telemetry = &settings.telemetry;
    BufferConfig {
        flush_interval: Duration::from_secs(telemetry.flush_interval_secs),
        max_queue_len: (telemetry.max_queue_len > 0).then_some(telemetry.max_queue_len),
        dev_mode: telemetry.dev_mode,
        user_id_policy: telemetry.user_id_policy,
    }
}

fn parse_level(level: &str) -> Option<Level> {
    level.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_queue_len_means_unbounded() {
        let mut settings = LarderSettings::default();
        assert_eq!(buffer_config(&settings).max_queue_len, Some(1000));
        settings.telemetry.max_queue_len = 0;
        assert_eq!(buffer_config(&settings).max_queue_len, None);
    }

    #[test]
    fn invalid_module_levels_are_skipped() {
        let mut settings = LarderSettings::default();
        settings.logging.level = "debug".into();
        settings
            .logging
            .module_levels
            .insert("larder_proxy".into(), "trace".into());
        settings
            .logging
            .module_levels
            .insert("hyper".into(), "loud".into());

        let config = telemetry_config(&settings);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.module_levels, vec![("larder_proxy".to_string(), Level::TRACE)]);
    }

    #[test]
    fn builds_unwind_on_panic() {
        assert!(cfg!(panic = "unwind"));
        let manifest = include_str!("../Cargo.toml");
        assert!(!manifest.contains("panic = \"abort\""));
    }

    #[test]
    fn cli_parses_serve_port() {
        let cli = Cli::try_parse_from(["larder", "serve", "--port", "8088"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Serve { port: Some(8088), host: None })
        ));
    }
}
