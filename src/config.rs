//! Runtime configuration for radix-serve.
//!
//! Configuration can be loaded from a JSON file or constructed
//! programmatically. All cache, routing, and kernel knobs live here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "radix-serve", about = "Prefix-cached token serving engine")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Prefix cache and block pool configuration.
    pub cache: CacheConfig,

    /// Request routing policy tuning.
    pub router: RouterConfig,

    /// Compute kernel settings.
    pub kernel: KernelConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            router: RouterConfig::default(),
            kernel: KernelConfig::default(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Maximum concurrent requests.
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            max_concurrent_requests: 64,
        }
    }
}

/// Prefix cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total number of cache blocks in the pool.
    pub num_blocks: usize,

    /// Block granularity in tokens.
    pub block_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_blocks: 1024,
            block_size: 16,
        }
    }
}

/// Routing policy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Exploration probability for the epsilon-greedy draw.
    pub epsilon: f64,

    /// Learning rate for incremental value updates.
    pub learning_rate: f64,

    /// Pool utilization above which the system counts as high-load.
    pub high_utilization: f64,

    /// Prompt length above which the system counts as high-load.
    pub long_prompt_tokens: usize,

    /// Cache hit ratio above which requests are kept local.
    pub locality_threshold: f64,

    /// Latency target used to shape the policy reward, in milliseconds.
    pub target_latency_ms: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            learning_rate: 0.1,
            high_utilization: 0.8,
            long_prompt_tokens: 1000,
            locality_threshold: 0.8,
            target_latency_ms: 150.0,
        }
    }
}

/// Simulated compute kernel latency profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Prefill cost per uncached prompt token, in microseconds.
    pub prefill_us_per_token: u64,

    /// Fixed decode cost per request, in microseconds.
    pub decode_us: u64,

    /// Number of output tokens to produce per request.
    pub output_tokens: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            prefill_us_per_token: 100,
            decode_us: 500,
            output_tokens: 8,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// file is absent.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Total token capacity of the cache pool.
    pub fn cache_capacity_tokens(&self) -> usize {
        self.cache.num_blocks * self.cache.block_size
    }
}
