//! radix-serve: prefix-cached token serving engine.
//!
//! Indexes computed token state in a radix tree over a fixed block pool so
//! shared prompt prefixes are computed once and reused, and routes each
//! request local/remote with a policy learned from observed latency.
//!
//! Exposes a small HTTP API for generation, health, and cache statistics.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use radix_serve::cache::radix::new_shared_cache;
use radix_serve::config::{Cli, Config};
use radix_serve::kernels::paged_attn::{ComputeKernel, SimulatedKernel};
use radix_serve::router::policy::RlRouter;
use radix_serve::server::api::{build_router, AppState};
use radix_serve::serving::engine::ServeEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "radix_serve=debug,tower_http=debug"
    } else {
        "radix_serve=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("radix-serve v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;
    let config = Arc::new(config);

    info!(
        num_blocks = config.cache.num_blocks,
        block_size = config.cache.block_size,
        capacity_tokens = config.cache_capacity_tokens(),
        "Cache pool sized"
    );
    info!(
        epsilon = config.router.epsilon,
        learning_rate = config.router.learning_rate,
        locality_threshold = config.router.locality_threshold,
        "Routing policy configured"
    );

    // Initialize the prefix cache over its block pool.
    let cache = new_shared_cache(&config.cache);

    // Initialize the routing policy and compute kernel.
    let router = Arc::new(RlRouter::new(config.router.clone()));
    let kernel: Arc<dyn ComputeKernel> = Arc::new(SimulatedKernel::new(config.kernel.clone()));
    info!(backend = kernel.backend(), "Compute kernel ready");

    // Initialize the serving engine.
    let engine = ServeEngine::new(cache.clone(), router.clone(), kernel, config.clone());

    // Build application state and the HTTP router.
    let state = Arc::new(AppState {
        engine,
        cache,
        router,
        config: config.clone(),
        start_time: Instant::now(),
    });
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli
        .listen
        .unwrap_or_else(|| config.server.listen.clone());
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
