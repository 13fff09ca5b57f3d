//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (wall clock, randomness).
//! Tests drive sessions with a fixed clock and seeded RNG, production uses
//! [`crate::SystemEnv`].

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Wall clock in milliseconds since the Unix epoch.
    ///
    /// Used for message timestamps, freshness checks and certificate
    /// validity. Not guaranteed monotonic.
    fn wall_clock_ms(&self) -> u64;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Wall clock in whole seconds since the Unix epoch.
    fn wall_clock_secs(&self) -> i64 {
        (self.wall_clock_ms() / 1000) as i64
    }

    /// Fixed-size random array (nonces, DH exponents, salts).
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}
