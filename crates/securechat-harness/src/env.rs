//! Deterministic [`Environment`] for tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use securechat_core::Environment;

/// 2025-06-01T00:00:00Z, inside every fixture certificate's validity window.
pub const DEFAULT_EPOCH_MS: u64 = 1_748_736_000_000;

/// Settable wall clock plus seeded ChaCha20 RNG.
///
/// Clones share the clock and the RNG stream, so two sessions built from
/// clones of one `TestEnv` agree on time.
#[derive(Clone)]
pub struct TestEnv {
    clock_ms: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl TestEnv {
    /// Clock at [`DEFAULT_EPOCH_MS`], RNG seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self::at(seed, DEFAULT_EPOCH_MS)
    }

    /// Clock at `clock_ms`.
    pub fn at(seed: u64, clock_ms: u64) -> Self {
        Self {
            clock_ms: Arc::new(AtomicU64::new(clock_ms)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }

    /// Current clock value.
    pub fn now_ms(&self) -> u64 {
        self.clock_ms.load(Ordering::SeqCst)
    }

    /// Jump the clock.
    pub fn set_ms(&self, clock_ms: u64) {
        self.clock_ms.store(clock_ms, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    fn wall_clock_ms(&self) -> u64 {
        self.now_ms()
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("Mutex poisoned").fill_bytes(buffer);
    }
}
