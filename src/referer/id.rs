//! Session id generation.
//!
//! Ids are 64 random alphanumeric characters salted with the time elapsed since
//! the generator was created, hashed with SHA-256 and hex-encoded (uppercase).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const RANDOM_LEN: usize = 64;

/// Width of every generated id.
pub const ID_LEN: usize = 64;

/// Randomness source owned by a single referer store.
#[derive(Debug)]
pub struct IdGenerator {
    rng: StdRng,
    epoch: Instant,
    sequence: u64,
}

impl IdGenerator {
    /// Seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic generator; with tokio's clock paused the whole id stream repeats.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            epoch: Instant::now(),
            sequence: 0,
        }
    }

    pub fn next_id(&mut self) -> String {
        let random: Vec<u8> = (0..RANDOM_LEN)
            .map(|_| ALPHABET[self.rng.gen_range(0..ALPHABET.len())])
            .collect();
        self.sequence = self.sequence.wrapping_add(1);
        let salt = self.epoch.elapsed().as_nanos();

        let mut hasher = Sha256::new();
        hasher.update(&random);
        hasher.update(salt.to_be_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hex::encode_upper(hasher.finalize())
    }
}
