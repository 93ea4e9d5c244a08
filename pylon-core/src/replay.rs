//! Payment replay protection
//!
//! A proof is identified by the first 128 bits of its SHA-256 hash. Once
//! seen, the identifier is held for the TTL; a second appearance inside the
//! window is a replay. Entries are swept opportunistically on insert.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a proof identifier is remembered.
pub const REPLAY_TTL: Duration = Duration::from_secs(300);

/// Sweep expired identifiers every N inserts.
const SWEEP_EVERY: u64 = 64;

/// Identifier for a payment proof: first 128 bits of SHA-256.
pub fn proof_id(proof: &str) -> u128 {
    let digest = Sha256::digest(proof.as_bytes());
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&digest[..16]);
    u128::from_be_bytes(prefix)
}

#[derive(Debug)]
struct Inner {
    seen: HashMap<u128, Instant>,
    inserts: u64,
}

/// TTL-bounded set of proof identifiers.
#[derive(Debug)]
pub struct ReplayGuard {
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl ReplayGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                inserts: 0,
            }),
        }
    }

    /// Record an identifier. Returns `false` when it was already present
    /// within the TTL (a replay); `true` when it is fresh.
    pub fn insert(&self, id: u128) -> bool {
        let mut inner = self.lock();
        let now = Instant::now();

        inner.inserts += 1;
        if inner.inserts % SWEEP_EVERY == 0 {
            let ttl = self.ttl;
            inner.seen.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
        }

        match inner.seen.get(&id) {
            Some(seen_at) if now.duration_since(*seen_at) < self.ttl => false,
            _ => {
                inner.seen.insert(id, now);
                true
            }
        }
    }

    /// Whether an identifier is currently held (without inserting).
    pub fn contains(&self, id: u128) -> bool {
        let inner = self.lock();
        matches!(inner.seen.get(&id), Some(seen_at) if seen_at.elapsed() < self.ttl)
    }

    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(REPLAY_TTL)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_proof_id_is_stable() {
        assert_eq!(proof_id("abc"), proof_id("abc"));
        assert_ne!(proof_id("abc"), proof_id("abd"));
    }

    #[test]
    fn test_second_insert_is_replay() {
        let guard = ReplayGuard::default();
        let id = proof_id("payment-proof-1");
        assert!(guard.insert(id));
        assert!(!guard.insert(id));
        assert!(guard.contains(id));
    }

    #[test]
    fn test_expired_entry_is_fresh_again() {
        let guard = ReplayGuard::new(Duration::ZERO);
        let id = proof_id("payment-proof-2");
        assert!(guard.insert(id));
        // TTL zero: immediately expired.
        assert!(guard.insert(id));
        assert!(!guard.contains(id));
    }

    #[test]
    fn test_distinct_proofs_do_not_collide() {
        let guard = ReplayGuard::default();
        assert!(guard.insert(proof_id("a")));
        assert!(guard.insert(proof_id("b")));
        assert_eq!(guard.len(), 2);
    }
}
