//! Injectable source of randomness for client ids and workflow seeds.
//!
//! Production code uses [`ThreadRandom`]. Tests supply [`FixedRandom`] so
//! submitted graphs and channel subscriptions are reproducible.

use rand::Rng;

/// Exclusive upper bound for workflow seeds.
pub const SEED_UPPER_BOUND: u64 = 1_000_000_000;

/// Randomness needed by a single upscale invocation.
pub trait RandomSource: Send + Sync {
    /// A fresh UUID-v4 formatted client identifier.
    fn client_id(&self) -> String;

    /// A seed in `[0, SEED_UPPER_BOUND)`.
    fn seed(&self) -> u64;
}

/// Thread-local RNG backed source.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn client_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn seed(&self) -> u64 {
        rand::rng().random_range(0..SEED_UPPER_BOUND)
    }
}

/// Deterministic source returning the same values on every call.
#[derive(Debug, Clone)]
pub struct FixedRandom {
    pub client_id: String,
    pub seed: u64,
}

impl FixedRandom {
    pub fn new(client_id: impl Into<String>, seed: u64) -> Self {
        Self {
            client_id: client_id.into(),
            seed: seed % SEED_UPPER_BOUND,
        }
    }
}

impl RandomSource for FixedRandom {
    fn client_id(&self) -> String {
        self.client_id.clone()
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
