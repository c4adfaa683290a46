use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use voxrelay_agent::SessionOrchestrator;
use voxrelay_core::config::Config;
use voxrelay_gateway::GatewayState;

mod logging;

#[derive(Parser)]
#[command(
    name = "voxrelay",
    about = "Real-time voice relay: stream audio in, stream spoken-assistant replies out",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the voice gateway
    Serve {
        /// Port to listen on (default: 8765)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate config and probe both backends without serving
    Check,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration with secrets redacted
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    logging::init_logging(&config.logging.clone().unwrap_or_default(), cli.verbose)?;

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Check => check(&config, &config_path).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&redacted(&config))?;
                println!("{json}");
                Ok(())
            }
        },
    }
}

/// Report validation results; errors abort.
fn validate(config: &Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for warning in &warnings {
        warn!("{warning}");
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }
    Ok(())
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    validate(&config)?;
    let port = port.unwrap_or_else(|| config.gateway_port());

    // No listener is opened unless every backend is ready.
    let orchestrator = Arc::new(SessionOrchestrator::from_config(&config)?);
    orchestrator.ready().await?;

    let metrics_enabled = config.metrics_enabled();
    #[allow(unused_mut)]
    let mut state = GatewayState::new(Arc::new(config), orchestrator);

    if metrics_enabled {
        #[cfg(feature = "metrics")]
        {
            let handle = voxrelay_gateway::metrics::install_prometheus_recorder()?;
            state = state.with_prometheus(handle);
            info!("Prometheus metrics available at /metrics");
        }
        #[cfg(not(feature = "metrics"))]
        warn!("metrics.enabled is set but this build lacks the `metrics` feature");
    }

    info!("Starting voxrelay gateway on port {port}");
    voxrelay_gateway::start_gateway(Arc::new(state), port).await
}

async fn check(config: &Config, config_path: &std::path::Path) -> anyhow::Result<()> {
    println!("voxrelay v{}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", config_path.display());
    validate(config)?;
    println!("Config: ok");

    let orchestrator = SessionOrchestrator::from_config(config)?;
    orchestrator.ready().await?;
    println!(
        "Transcription: {} ({})",
        orchestrator.transcriber().id(),
        config.transcription().model()
    );
    println!("Generation: {}", config.generation().model());
    println!("History: {} turns", orchestrator.store().capacity());
    println!("Backends: ready");
    Ok(())
}

/// Copy of `config` safe to print.
fn redacted(config: &Config) -> Config {
    const MASK: &str = "********";
    let mut shown = config.clone();
    if let Some(t) = shown.transcription.as_mut().filter(|t| t.api_key.is_some()) {
        t.api_key = Some(MASK.into());
    }
    if let Some(g) = shown.generation.as_mut().filter(|g| g.api_key.is_some()) {
        g.api_key = Some(MASK.into());
    }
    shown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_masks_api_keys() {
        let config = Config::parse(
            r#"{
                transcription: { api_key: "secret-stt" },
                generation: { provider: "openai", api_key: "secret-llm" },
            }"#,
        )
        .unwrap();

        let json = serde_json::to_string(&redacted(&config)).unwrap();
        assert!(!json.contains("secret-stt"));
        assert!(!json.contains("secret-llm"));
        assert!(json.contains("openai"));
    }

    #[test]
    fn test_validate_rejects_odd_history() {
        let config = Config::parse(r#"{ session: { history_turns: 3 } }"#).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_cli_parses_serve_port() {
        let cli = Cli::try_parse_from(["voxrelay", "serve", "--port", "9000", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000) }));
    }
}
