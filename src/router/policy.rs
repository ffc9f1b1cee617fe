//! Epsilon-greedy routing policy.
//!
//! Decides per request whether to serve locally or hand off to a remote
//! peer, based on a learned value table indexed by load bucket and action.
//! Cache locality trumps the table: a request whose prefix is mostly cached
//! here is kept local regardless of load, since its state lives in this
//! node's pool.
//!
//! The table is updated incrementally from observed latency, so the policy
//! adapts to whatever the local and remote paths actually cost.

use std::fmt;
use std::sync::Mutex;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RouterConfig;

/// Where a request should be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTarget {
    Local,
    Remote,
}

impl RouteTarget {
    fn index(self) -> usize {
        match self {
            RouteTarget::Local => 0,
            RouteTarget::Remote => 1,
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Local => write!(f, "local"),
            RouteTarget::Remote => write!(f, "remote"),
        }
    }
}

/// Discretized system load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBucket {
    Low,
    High,
}

impl LoadBucket {
    fn index(self) -> usize {
        match self {
            LoadBucket::Low => 0,
            LoadBucket::High => 1,
        }
    }
}

/// Per-request snapshot of the signals the policy consumes.
#[derive(Debug, Clone, Copy)]
pub struct SystemState {
    /// Prompt length in tokens.
    pub prompt_len: usize,

    /// Fraction of the prompt served from the prefix cache.
    pub cache_hit_rate: f64,

    /// Allocated fraction of the block pool.
    pub utilization: f64,
}

/// Learned action values, exposed for statistics and tests.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RouterSnapshot {
    pub low_load_local: f64,
    pub low_load_remote: f64,
    pub high_load_local: f64,
    pub high_load_remote: f64,
}

/// Epsilon-greedy router over a (load bucket × action) value table.
pub struct RlRouter {
    /// values[bucket][action].
    values: Mutex<[[f64; 2]; 2]>,

    config: RouterConfig,
}

impl RlRouter {
    /// Create a router seeded with priors favouring local service under low
    /// load and remote offload under high load.
    pub fn new(config: RouterConfig) -> Self {
        Self {
            values: Mutex::new([[1.0, 0.5], [-1.0, 1.0]]),
            config,
        }
    }

    fn bucket(&self, state: &SystemState) -> LoadBucket {
        if state.utilization > self.config.high_utilization
            || state.prompt_len > self.config.long_prompt_tokens
        {
            LoadBucket::High
        } else {
            LoadBucket::Low
        }
    }

    /// Pick a target for the request described by `state`.
    ///
    /// With probability epsilon the draw explores a uniform random action;
    /// otherwise it exploits the higher-valued action for the current load
    /// bucket, preferring local on a tie. A cache hit rate above the
    /// locality threshold forces local service after the draw, so it applies
    /// regardless of exploration.
    pub fn route(&self, state: &SystemState) -> RouteTarget {
        let bucket = self.bucket(state);
        let mut rng = rand::thread_rng();

        let target = if rng.gen::<f64>() < self.config.epsilon {
            let explored = if rng.gen::<bool>() {
                RouteTarget::Local
            } else {
                RouteTarget::Remote
            };
            debug!(bucket = ?bucket, target = %explored, "Exploring route");
            explored
        } else {
            let values = self.values.lock().expect("value table lock poisoned");
            let row = values[bucket.index()];
            if row[RouteTarget::Remote.index()] > row[RouteTarget::Local.index()] {
                RouteTarget::Remote
            } else {
                RouteTarget::Local
            }
        };

        if state.cache_hit_rate > self.config.locality_threshold {
            return RouteTarget::Local;
        }

        target
    }

    /// Fold an observed reward into the value for the (bucket, action) pair
    /// this request ran under.
    pub fn update(&self, state: &SystemState, action: RouteTarget, reward: f64) {
        let bucket = self.bucket(state);
        let mut values = self.values.lock().expect("value table lock poisoned");
        let value = &mut values[bucket.index()][action.index()];
        *value += self.config.learning_rate * (reward - *value);

        debug!(
            bucket = ?bucket,
            action = %action,
            reward = reward,
            value = *value,
            "Updated routing value"
        );
    }

    /// Current value table.
    pub fn snapshot(&self) -> RouterSnapshot {
        let values = self.values.lock().expect("value table lock poisoned");
        RouterSnapshot {
            low_load_local: values[0][0],
            low_load_remote: values[0][1],
            high_load_local: values[1][0],
            high_load_remote: values[1][1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greedy_router() -> RlRouter {
        RlRouter::new(RouterConfig {
            epsilon: 0.0,
            ..RouterConfig::default()
        })
    }

    fn low_load_state() -> SystemState {
        SystemState {
            prompt_len: 10,
            cache_hit_rate: 0.0,
            utilization: 0.1,
        }
    }

    #[test]
    fn test_exploit_picks_highest_value() {
        let router = greedy_router();

        // Low load priors favour local.
        assert_eq!(router.route(&low_load_state()), RouteTarget::Local);

        // High load priors favour remote.
        let state = SystemState {
            prompt_len: 10,
            cache_hit_rate: 0.0,
            utilization: 0.9,
        };
        assert_eq!(router.route(&state), RouteTarget::Remote);
    }

    #[test]
    fn test_long_prompt_counts_as_high_load() {
        let router = greedy_router();

        let state = SystemState {
            prompt_len: 1001,
            cache_hit_rate: 0.0,
            utilization: 0.1,
        };
        assert_eq!(router.route(&state), RouteTarget::Remote);

        // Thresholds are strict: exactly at the boundary stays low load.
        let state = SystemState {
            prompt_len: 1000,
            cache_hit_rate: 0.0,
            utilization: 0.8,
        };
        assert_eq!(router.route(&state), RouteTarget::Local);
    }

    #[test]
    fn test_cache_locality_overrides_exploration() {
        // Always-explore router: without the override the target would be
        // random, so 50 straight local picks are conclusive.
        let router = RlRouter::new(RouterConfig {
            epsilon: 1.0,
            ..RouterConfig::default()
        });

        let state = SystemState {
            prompt_len: 2000,
            cache_hit_rate: 0.9,
            utilization: 0.95,
        };
        for _ in 0..50 {
            assert_eq!(router.route(&state), RouteTarget::Local);
        }
    }

    #[test]
    fn test_update_moves_value_toward_reward() {
        let router = greedy_router();
        let state = low_load_state();

        // low/local prior is 1.0; one step toward 0.0 at lr 0.1 lands on 0.9.
        router.update(&state, RouteTarget::Local, 0.0);
        let snap = router.snapshot();
        assert!((snap.low_load_local - 0.9).abs() < 1e-12);
        assert_eq!(snap.low_load_remote, 0.5);
    }

    #[test]
    fn test_repeated_updates_converge_to_reward() {
        let router = greedy_router();
        let state = low_load_state();

        for _ in 0..200 {
            router.update(&state, RouteTarget::Remote, -0.5);
        }
        assert!((router.snapshot().low_load_remote - (-0.5)).abs() < 1e-6);

        // Remote now looks worse than local under low load.
        assert_eq!(router.route(&state), RouteTarget::Local);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let router = std::sync::Arc::new(greedy_router());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let router = router.clone();
                std::thread::spawn(move || {
                    let state = SystemState {
                        prompt_len: 10,
                        cache_hit_rate: 0.0,
                        utilization: 0.1,
                    };
                    for _ in 0..100 {
                        router.update(&state, RouteTarget::Local, 0.5);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Every update contracts toward 0.5, so 800 of them in any
        // interleaving must land there.
        assert!((router.snapshot().low_load_local - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_route_target_wire_format() {
        assert_eq!(
            serde_json::to_string(&RouteTarget::Local).unwrap(),
            "\"local\""
        );
        assert_eq!(
            serde_json::to_string(&RouteTarget::Remote).unwrap(),
            "\"remote\""
        );
    }
}
