use std::sync::atomic::{AtomicU64, Ordering};

use rand::distr::Alphanumeric;
use rand::Rng;

/// Source of wall-clock time, in fractional seconds since the Unix epoch.
///
/// Every TTL, window and interval computation reads time through this trait
/// so tests can drive it explicitly.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Clock backed by `chrono::Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        let now = chrono::Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
    }
}

/// Manually advanced clock with microsecond resolution.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new(start_secs: f64) -> Self {
        Self {
            micros: AtomicU64::new((start_secs * 1_000_000.0) as u64),
        }
    }

    pub fn advance(&self, secs: f64) {
        self.micros
            .fetch_add((secs * 1_000_000.0) as u64, Ordering::SeqCst);
    }

    pub fn set(&self, secs: f64) {
        self.micros
            .store((secs * 1_000_000.0) as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

/// Source of random tokens (honeypot identifiers, decoy link suffixes).
pub trait RandomSource: Send + Sync {
    fn token(&self, len: usize) -> String;
}

/// Thread-local RNG from `rand`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn token(&self, len: usize) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect::<String>()
            .to_lowercase()
    }
}

/// Deterministic source producing `prefix` followed by a counter, padded or
/// truncated to the requested length.
#[derive(Debug)]
pub struct SequenceRandom {
    prefix: String,
    counter: AtomicU64,
}

impl SequenceRandom {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl RandomSource for SequenceRandom {
    fn token(&self, len: usize) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut token = format!("{}{:x}", self.prefix, n);
        while token.len() < len {
            token.push('0');
        }
        token.truncate(len);
        token
    }
}
