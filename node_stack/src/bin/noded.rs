//! Minimal node daemon: start the service stack with its default
//! configuration and run until interrupted.

use {
    node_stack::{Config, Node},
    tracing_subscriber::EnvFilter,
};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .unwrap_or_else(|| EnvFilter::new(tracing::Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = Config::default();
    let node = Node::new(config);

    if let Err(err) = node.start() {
        tracing::error!("failed to start node: {err}");
        std::process::exit(1);
    }

    tracing::info!("node is running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.ok();

    tracing::info!("shutting down");
    if let Err(err) = node.stop() {
        tracing::error!("failed to stop node: {err}");
        std::process::exit(1);
    }
}
