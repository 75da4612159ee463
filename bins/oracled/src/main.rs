//! Oracle node CLI and daemon binary
//!
//! This is the main entry point for the oracle node. It provides commands
//! for initializing, validating, and starting a node.

use aggregator::{App, HmacSigner, NodeContext, NodeSettings, SharedLocalAggregates};
use anyhow::{Context, Result};
use cli::{Cli, Commands, NodeRole};
use common::{Component, MessageBus, ShutdownController};
use config::{generate_default_config, load_config, save_config, validate_config, NodeConfig};
use consensus::LocalNetwork;
use fetcher::FetcherApp;
use observability::{init_logging, init_metrics, LogFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::{create_cache, create_store};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start {
            role,
            config,
            node_id,
            metrics_port,
        } => start_node(role, config, node_id, metrics_port).await,
        Commands::Validate { config } => validate_command(config).await,
        Commands::Init { output } => init_command(output).await,
    }
}

/// Load and apply CLI overrides. Validation happens once logging is up.
fn load_with_overrides(
    config_path: &Path,
    node_id: Option<String>,
    metrics_port: Option<u16>,
) -> Result<NodeConfig> {
    let mut config = load_config(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    if let Some(id) = node_id {
        config.node.id = id;
    }
    if let Some(port) = metrics_port {
        config.metrics.enabled = true;
        config.metrics.port = port;
    }
    Ok(config)
}

/// Log the validation report and refuse to continue on errors
fn ensure_valid(config: &NodeConfig) -> Result<()> {
    let report = validate_config(config);
    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.is_valid() {
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!(
            "Cannot start node due to {} configuration error(s)",
            report.errors.len()
        );
    }
    Ok(())
}

async fn start_node(
    role: NodeRole,
    config_path: PathBuf,
    node_id: Option<String>,
    metrics_port: Option<u16>,
) -> Result<()> {
    let config = load_with_overrides(&config_path, node_id, metrics_port)?;

    // An unknown format is reported by validation below
    let format = LogFormat::parse(&config.logging.format).unwrap_or_default();
    init_logging(&config.node.service_name, format)?;
    ensure_valid(&config)?;
    info!(
        node_id = %config.node.id,
        role = role.as_str(),
        config = ?config_path,
        "Oracle node starting"
    );

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let store = create_store(&config.storage)
        .await
        .context("Failed to create aggregate store")?;
    let cache = create_cache(&config.cache)
        .await
        .context("Failed to create cache")?;
    let cache_ttl = Duration::from_secs(config.cache.ttl_seconds);

    let bus = MessageBus::new(config.node.bus_capacity);
    let shutdown = ShutdownController::with_ctrl_c();

    let aggregator_app = if role.runs_aggregator() && config.aggregator.enabled {
        let signer = HmacSigner::from_config(&config.signer).context("Failed to load signer key")?;
        let network = LocalNetwork::new();
        let context = NodeContext {
            store: store.clone(),
            cache: cache.clone(),
            signer: Arc::new(signer),
            local_aggregates: SharedLocalAggregates::new(),
            settings: NodeSettings::from_config(&config.aggregator, &config.cache),
        };
        let app = Arc::new(App::new(
            bus.clone(),
            Arc::new(network.host(config.node.id.clone())),
            context,
            config.aggregator.clone(),
            shutdown.child_token(),
        ));
        app.run().await.context("Failed to start aggregator")?;
        Some(app)
    } else {
        info!("Aggregator disabled for this node");
        discard_aggregator_traffic(&bus, &shutdown);
        None
    };

    let fetcher_app = if role.runs_fetcher() && config.fetcher.enabled {
        let app = FetcherApp::new(
            store.clone(),
            cache.clone(),
            bus.clone(),
            config.fetcher.clone(),
            cache_ttl,
        );
        if let Err(e) = app.start(&shutdown.token()).await {
            shutdown.shutdown();
            stop_aggregator(aggregator_app).await;
            return Err(e).context("Failed to start fetcher");
        }
        Some(app)
    } else {
        info!("Fetcher disabled for this node");
        None
    };

    info!("Oracle node running, press Ctrl+C to stop");
    shutdown.wait_for_shutdown().await;

    if let Some(app) = fetcher_app {
        app.stop().await;
    }
    stop_aggregator(aggregator_app).await;

    info!("Oracle node stopped");
    Ok(())
}

async fn stop_aggregator(app: Option<Arc<App>>) {
    if let Some(app) = app {
        if let Err(e) = app.shutdown().await {
            error!("Aggregator shutdown failed: {}", e);
        }
    }
}

/// Drain the aggregator channel when no aggregator runs in this process so
/// local aggregates do not pile up as bus errors
fn discard_aggregator_traffic(bus: &MessageBus, shutdown: &ShutdownController) {
    let Some(mut rx) = bus.subscribe(Component::Aggregator) else {
        return;
    };
    let token = shutdown.token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => debug!(command = msg.command.name(), "Dropping aggregator command"),
                    None => break,
                },
            }
        }
    });
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    init_logging("oracled", LogFormat::Compact)?;
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Node: {}", config.node.id);
    println!("Storage: {}", config.storage.storage_type);
    println!("Cache: {}", config.cache.cache_type);
    println!("Seeded pairs: {}", config.storage.pairs.len());
    println!(
        "Leader interval: {}ms, local aggregate interval: {}ms",
        config.aggregator.leader_job_interval_ms, config.fetcher.local_aggregate_interval_ms
    );

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Replace signer.private_key with the node's own hex key");
    println!("  2. Point storage and cache at postgres and redis for production");
    println!(
        "  3. Run 'oracled validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  4. Run 'oracled start --config {:?}' to start the node",
        output_path
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, yaml: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("oracled-{}-{}.yaml", name, std::process::id()));
        std::fs::write(&path, yaml).unwrap();
        path
    }

    const MINIMAL: &str = r#"
node:
  id: node-a
signer:
  private_key: "abababababababababababababababababababababababababababababababab"
"#;

    #[test]
    fn test_cli_overrides_applied_before_validation() {
        let path = write_config("overrides", MINIMAL);
        let config = load_with_overrides(&path, Some("node-b".to_string()), Some(9191)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.node.id, "node-b");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9191);
        assert!(ensure_valid(&config).is_ok());
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let path = write_config("invalid", &format!("{}logging:\n  format: xml\n", MINIMAL));
        let config = load_with_overrides(&path, None, None).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.logging.format, "xml");
        let err = ensure_valid(&config).unwrap_err();
        assert!(err.to_string().contains("1 configuration error"));
    }
}
