//! Consistent-hash placement ring
//!
//! Node addresses and content keys are hashed onto a shared 64-bit token
//! space; a key is owned by the node with the smallest token greater than
//! or equal to the key's hash, wrapping to the smallest token on the ring.
//! The ring is a pure data structure: connection handles and migration
//! live in `content::network`.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from ring membership mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("node {0} already exists")]
    DuplicateNode(String),
    #[error("node {0} does not exist")]
    UnknownNode(String),
    #[error("token collision between {addr} and {existing}")]
    TokenCollision { addr: String, existing: String },
}

/// Hash an address or content key onto the ring: the first 8 bytes of
/// SHA-256 over the string, interpreted big-endian.
pub fn token_of(s: &str) -> u64 {
    let digest = Sha256::digest(s.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

/// Wrap-aware arc membership test: is `x` in the left-open, right-closed
/// arc `(start, end]`?
///
/// A degenerate arc with `start == end` contains only `end` itself; this
/// case never drives a migration (a single-node ring skips migration) but
/// keeps the predicate total.
pub fn in_range_exclusive(start: u64, end: u64, x: u64) -> bool {
    if start == end {
        x == end
    } else if start < end {
        x > start && x <= end
    } else {
        x > start || x <= end
    }
}

/// Sorted ring of node tokens.
///
/// Invariants: the token list is strictly ascending, every address maps to
/// exactly one token, and the list and both maps agree in membership.
#[derive(Debug, Default)]
pub struct Ring {
    tokens: Vec<u64>,
    token_to_addr: HashMap<u64, String>,
    addr_to_token: HashMap<String, u64>,
}

impl Ring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.addr_to_token.contains_key(addr)
    }

    /// Token assigned to a member address.
    pub fn token(&self, addr: &str) -> Option<u64> {
        self.addr_to_token.get(addr).copied()
    }

    /// Address owning a member token.
    pub fn addr_of(&self, token: u64) -> Option<&str> {
        self.token_to_addr.get(&token).map(String::as_str)
    }

    /// Add a node and return its token. Duplicate addresses and token
    /// collisions are hard errors and leave the ring untouched.
    pub fn insert(&mut self, addr: &str) -> Result<u64, RingError> {
        if self.contains(addr) {
            return Err(RingError::DuplicateNode(addr.to_string()));
        }
        let token = token_of(addr);
        if let Some(existing) = self.token_to_addr.get(&token) {
            return Err(RingError::TokenCollision {
                addr: addr.to_string(),
                existing: existing.clone(),
            });
        }

        let idx = match self.tokens.binary_search(&token) {
            Ok(i) | Err(i) => i,
        };
        self.tokens.insert(idx, token);
        self.token_to_addr.insert(token, addr.to_string());
        self.addr_to_token.insert(addr.to_string(), token);
        Ok(token)
    }

    /// Remove a node and return the token it held.
    pub fn remove(&mut self, addr: &str) -> Result<u64, RingError> {
        let token = self
            .addr_to_token
            .remove(addr)
            .ok_or_else(|| RingError::UnknownNode(addr.to_string()))?;
        self.token_to_addr.remove(&token);
        if let Ok(idx) = self.tokens.binary_search(&token) {
            self.tokens.remove(idx);
        }
        Ok(token)
    }

    /// Address owning `key`: the node whose token is the smallest token
    /// greater than or equal to the key's hash, wrapping to index 0.
    pub fn owner(&self, key: &str) -> Option<&str> {
        if self.tokens.is_empty() {
            return None;
        }
        let hash = token_of(key);
        let idx = match self.tokens.binary_search(&hash) {
            Ok(i) | Err(i) => i,
        };
        let idx = if idx == self.tokens.len() { 0 } else { idx };
        self.addr_of(self.tokens[idx])
    }

    /// Predecessor and successor tokens of a member token, with wrap. On a
    /// single-node ring both are the node itself.
    pub fn neighbors(&self, token: u64) -> Option<(u64, u64)> {
        let idx = self.tokens.binary_search(&token).ok()?;
        let len = self.tokens.len();
        let pred = self.tokens[(idx + len - 1) % len];
        let succ = self.tokens[(idx + 1) % len];
        Some((pred, succ))
    }

    /// Member addresses in token-ascending order.
    pub fn addresses(&self) -> Vec<String> {
        self.tokens
            .iter()
            .filter_map(|t| self.token_to_addr.get(t).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference owner lookup: linear scan over the sorted tokens.
    fn owner_by_scan<'a>(ring: &'a Ring, key: &str) -> Option<&'a str> {
        let hash = token_of(key);
        let token = ring
            .tokens
            .iter()
            .copied()
            .find(|t| *t >= hash)
            .or_else(|| ring.tokens.first().copied())?;
        ring.addr_of(token)
    }

    #[test]
    fn test_token_is_deterministic() {
        assert_eq!(token_of("node-a:9001"), token_of("node-a:9001"));
        assert_ne!(token_of("node-a:9001"), token_of("node-b:9001"));
    }

    #[test]
    fn test_owner_matches_reference_scan() {
        let mut ring = Ring::new();
        for addr in ["a:1", "b:1", "c:1", "d:1", "e:1"] {
            ring.insert(addr).unwrap();
        }

        for i in 0..200 {
            let key = format!("video-{}/seg-{}.m4s", i % 7, i);
            assert_eq!(ring.owner(&key), owner_by_scan(&ring, &key), "key {}", key);
        }
    }

    #[test]
    fn test_owner_wraps_past_largest_token() {
        let mut ring = Ring::new();
        ring.insert("a:1").unwrap();
        ring.insert("b:1").unwrap();

        let largest = *ring.tokens.last().unwrap();
        let smallest = ring.tokens[0];

        // Any key hashing beyond the largest token wraps to the smallest.
        let key = (0..100_000)
            .map(|i| format!("probe-{}", i))
            .find(|k| token_of(k) > largest)
            .expect("no probe key beyond the largest token");
        assert_eq!(ring.owner(&key), ring.addr_of(smallest));
    }

    #[test]
    fn test_empty_ring_has_no_owner() {
        let ring = Ring::new();
        assert_eq!(ring.owner("v/f"), None);
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let mut ring = Ring::new();
        ring.insert("a:1").unwrap();
        assert_eq!(
            ring.insert("a:1"),
            Err(RingError::DuplicateNode("a:1".to_string()))
        );
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_remove_unknown_fails() {
        let mut ring = Ring::new();
        ring.insert("a:1").unwrap();
        assert_eq!(
            ring.remove("b:1"),
            Err(RingError::UnknownNode("b:1".to_string()))
        );
    }

    #[test]
    fn test_remove_restores_prior_placement() {
        let mut ring = Ring::new();
        ring.insert("a:1").unwrap();
        ring.insert("b:1").unwrap();
        ring.insert("c:1").unwrap();

        let before: Vec<Option<String>> = (0..50)
            .map(|i| {
                let mut r = Ring::new();
                r.insert("a:1").unwrap();
                r.insert("b:1").unwrap();
                r.owner(&format!("v/seg-{}.m4s", i)).map(String::from)
            })
            .collect();

        ring.remove("c:1").unwrap();
        let after: Vec<Option<String>> = (0..50)
            .map(|i| ring.owner(&format!("v/seg-{}.m4s", i)).map(String::from))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_neighbors_wrap() {
        let mut ring = Ring::new();
        ring.insert("a:1").unwrap();
        ring.insert("b:1").unwrap();
        ring.insert("c:1").unwrap();

        let tokens = ring.tokens.clone();
        let (pred, succ) = ring.neighbors(tokens[0]).unwrap();
        assert_eq!(pred, tokens[2]);
        assert_eq!(succ, tokens[1]);

        let (pred, succ) = ring.neighbors(tokens[2]).unwrap();
        assert_eq!(pred, tokens[1]);
        assert_eq!(succ, tokens[0]);
    }

    #[test]
    fn test_single_node_is_its_own_neighbor() {
        let mut ring = Ring::new();
        let token = ring.insert("only:1").unwrap();
        assert_eq!(ring.neighbors(token), Some((token, token)));
    }

    #[test]
    fn test_addresses_are_token_ascending() {
        let mut ring = Ring::new();
        for addr in ["n1:1", "n2:1", "n3:1", "n4:1"] {
            ring.insert(addr).unwrap();
        }
        let addrs = ring.addresses();
        let tokens: Vec<u64> = addrs.iter().map(|a| ring.token(a).unwrap()).collect();
        let mut sorted = tokens.clone();
        sorted.sort_unstable();
        assert_eq!(tokens, sorted);
    }

    #[test]
    fn test_in_range_exclusive_plain_arc() {
        assert!(in_range_exclusive(10, 20, 11));
        assert!(in_range_exclusive(10, 20, 20));
        assert!(!in_range_exclusive(10, 20, 10));
        assert!(!in_range_exclusive(10, 20, 21));
    }

    #[test]
    fn test_in_range_exclusive_wrapped_arc() {
        assert!(in_range_exclusive(u64::MAX - 5, 5, u64::MAX));
        assert!(in_range_exclusive(u64::MAX - 5, 5, 0));
        assert!(in_range_exclusive(u64::MAX - 5, 5, 5));
        assert!(!in_range_exclusive(u64::MAX - 5, 5, 6));
        assert!(!in_range_exclusive(u64::MAX - 5, 5, u64::MAX - 5));
    }

    #[test]
    fn test_in_range_exclusive_degenerate_arc() {
        // start == end: only the endpoint itself is in range.
        assert!(in_range_exclusive(42, 42, 42));
        assert!(!in_range_exclusive(42, 42, 41));
        assert!(!in_range_exclusive(42, 42, 43));
        assert!(!in_range_exclusive(42, 42, 0));
    }
}
