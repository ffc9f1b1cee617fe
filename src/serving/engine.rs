//! Serving orchestrator: coordinates the prefix cache, routing policy, and
//! compute kernel.
//!
//! Each request runs a strictly linear pipeline:
//! 1. Look up the longest cached prefix and pin its path
//! 2. Route the request (local vs remote) from the observed system state
//! 3. Run the kernel over the uncached suffix only
//! 4. Cache the computed suffix, evicting on demand if the pool is full
//! 5. Feed the measured latency back to the policy and respond
//!
//! Cache exhaustion never fails a request: when nothing is evictable the
//! response is served computed-but-not-cached.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::radix::{CacheError, SharedRadixCache};
use crate::config::Config;
use crate::kernels::paged_attn::{ComputeKernel, KernelRequest};
use crate::metrics;
use crate::router::policy::{RlRouter, RouteTarget, SystemState};
use crate::TokenId;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The compute kernel failed. Details stay in the logs; callers get an
    /// opaque failure.
    #[error("compute kernel failure")]
    Compute,
}

/// Per-request metrics reported alongside the generated text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    /// Fraction of the prompt served from the prefix cache.
    pub cache_hit_rate: f64,

    /// Prompt tokens whose computation was skipped.
    pub tokens_saved: usize,

    /// Where the routing policy sent the request.
    pub routed_to: RouteTarget,

    /// End-to-end latency in milliseconds.
    pub latency_ms: f64,

    /// Compute backend label.
    pub kernel_backend: String,
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    pub metrics: RequestMetrics,
}

/// The serving engine.
pub struct ServeEngine {
    /// Prefix cache and block pool.
    cache: SharedRadixCache,

    /// Routing policy.
    router: Arc<RlRouter>,

    /// Compute backend.
    kernel: Arc<dyn ComputeKernel>,

    /// Configuration.
    config: Arc<Config>,
}

impl ServeEngine {
    /// Create a new engine over the given collaborators.
    pub fn new(
        cache: SharedRadixCache,
        router: Arc<RlRouter>,
        kernel: Arc<dyn ComputeKernel>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            cache,
            router,
            kernel,
            config,
        }
    }

    /// Serve one request end to end.
    ///
    /// An empty prompt is valid: it hits nothing, computes nothing, and
    /// reports a zero hit rate.
    pub async fn generate(
        &self,
        request_id: &str,
        prompt: &[TokenId],
    ) -> Result<GenerationResult, EngineError> {
        let started = Instant::now();
        metrics::REQUESTS_TOTAL.inc();

        // Lookup. The pin guard keeps the matched path anchored until the
        // cache update is done; it releases on any exit, including drops of
        // a cancelled future.
        let (matched, frontier, block_table, pin_guard, utilization) = {
            let cache = self.cache.read().await;
            let m = cache.match_prefix(prompt);
            let guard = cache.pin_path(m.node);
            let table = cache.block_table(m.node);
            (m.matched, m.node, table, guard, cache.utilization())
        };

        let hit_rate = if prompt.is_empty() {
            0.0
        } else {
            matched as f64 / prompt.len() as f64
        };

        // Route.
        let state = SystemState {
            prompt_len: prompt.len(),
            cache_hit_rate: hit_rate,
            utilization,
        };
        let target = self.router.route(&state);

        debug!(
            request_id = %request_id,
            matched = matched,
            hit_rate = hit_rate,
            target = %target,
            "Prefix lookup complete"
        );

        // Compute the uncached suffix. A full hit skips the kernel entirely.
        let suffix = &prompt[matched..];
        let generated = if suffix.is_empty() {
            Vec::new()
        } else {
            let request = KernelRequest {
                tokens: suffix.to_vec(),
                block_table,
            };
            match self.kernel.forward(request).await {
                Ok(out) => out.tokens,
                Err(e) => {
                    metrics::REQUEST_FAILURES.inc();
                    error!(
                        request_id = %request_id,
                        stage = "compute",
                        error = %e,
                        "Compute kernel failed"
                    );
                    return Err(EngineError::Compute);
                }
            }
        };

        // Cache update: evict-and-retry on exhaustion, degrade when nothing
        // is reclaimable.
        if !suffix.is_empty() {
            let mut cache = self.cache.write().await;
            loop {
                match cache.insert(suffix, frontier) {
                    Ok(outcome) => {
                        debug!(request_id = %request_id, outcome = ?outcome, "Cache update");
                        break;
                    }
                    Err(CacheError::Exhausted) => {
                        if !cache.evict_one() {
                            warn!(
                                request_id = %request_id,
                                "Pool exhausted with nothing evictable, suffix not cached"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(request_id = %request_id, error = %e, "Cache update failed");
                        break;
                    }
                }
            }
        }
        drop(pin_guard);

        // Respond, feeding the measured latency back into the policy.
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.router.update(&state, target, self.shape_reward(latency_ms));

        metrics::TOKENS_SAVED_TOTAL.inc_by(matched as u64);
        metrics::REQUEST_LATENCY_SECONDS.observe(latency_ms / 1000.0);

        info!(
            request_id = %request_id,
            prompt_tokens = prompt.len(),
            tokens_saved = matched,
            target = %target,
            latency_ms = latency_ms,
            "Generation complete"
        );

        let text = format!(
            "[{} generated from {} prompt tokens, {} cached]",
            generated.len(),
            prompt.len(),
            matched
        );

        Ok(GenerationResult {
            text,
            metrics: RequestMetrics {
                cache_hit_rate: hit_rate,
                tokens_saved: matched,
                routed_to: target,
                latency_ms,
                kernel_backend: self.kernel.backend().to_string(),
            },
        })
    }

    /// Map latency to a reward in [-1, 1]: positive under the target,
    /// negative over it.
    fn shape_reward(&self, latency_ms: f64) -> f64 {
        let target = self.config.router.target_latency_ms;
        if target <= 0.0 {
            return 0.0;
        }
        ((target - latency_ms) / target).clamp(-1.0, 1.0)
    }
}
