//! Production Environment implementation using the system clock and OS RNG.

use crate::env::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// # Security
///
/// The RNG uses getrandom which provides OS-level cryptographic randomness
/// (e.g., /dev/urandom on Linux). Suitable for nonces, DH exponents and
/// password salts.
///
/// # Panics
///
/// Panics if the OS RNG fails. A peer without functioning cryptographic
/// randomness cannot run the protocol securely.
#[derive(Clone, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn wall_clock_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - cannot operate securely");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_after_2020() {
        let env = SystemEnv::new();
        assert!(env.wall_clock_ms() > 1_577_836_800_000);
    }

    #[test]
    fn random_bytes_are_random() {
        let env = SystemEnv::new();

        let a: [u8; 32] = env.random_array();
        let b: [u8; 32] = env.random_array();

        // Extremely unlikely to be equal if random
        assert_ne!(a, b, "Random bytes should differ");
    }
}
