use anyhow::{Context, Result};
use clap::Parser;
use node::cli::CliArgs;
use node::config::NodeConfig;
use node::health::{NodeHealthReporter, SysinfoStats};
use node::instance::RelayFactory;
use node::reconciler::Reconciler;
use node::server::NodeServer;
use node::store::SeaOrmStore;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if args.list_ciphers {
        for cipher in relay::list_ciphers() {
            println!("{}", cipher);
        }
        return Ok(());
    }

    let mut config = NodeConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;
    args.apply(&mut config);

    let _guard = common::init_tracing(
        config.log_dir.as_deref(),
        &config.log_file,
        &config.log_level,
        config.console_port,
    );

    config.validate().context("Invalid configuration")?;
    let node_id = config
        .node_id
        .context("node id must be specified")?;

    info!(
        node_id,
        interval_secs = config.sync_interval_secs,
        udp = config.udp_enabled,
        restart_policy = ?config.restart_policy,
        "Starting node"
    );

    let store = SeaOrmStore::connect(&config.database, node_id)
        .await
        .context("Failed to set up database connection")?;

    let reconciler = Reconciler::new(
        Arc::new(RelayFactory::new(config.udp_enabled)),
        config.restart_policy,
        config.store_timeout(),
    );
    let health = NodeHealthReporter::new(Box::new(SysinfoStats), config.store_timeout());

    NodeServer::new(Arc::new(store), reconciler, health, config.sync_interval())
        .run()
        .await;

    info!("Node shut down");
    Ok(())
}
