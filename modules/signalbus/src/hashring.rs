//! Weighted consistent hashing over connection names.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Virtual nodes placed per unit of weight.
const REPLICAS_PER_WEIGHT: u32 = 160;

/// Largest weight a node may carry.
pub const MAX_WEIGHT: u32 = 10_000;

/// Maps keys (event names) onto nodes (connection names). A key keeps its
/// node for as long as membership is unchanged; adding or removing a node
/// only moves the keys adjacent to its virtual nodes.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    ring: BTreeMap<u64, String>,
    weights: BTreeMap<String, u32>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or re-weight `node`. Zero weight counts as one and anything above
    /// [`MAX_WEIGHT`] is capped.
    pub fn add(&mut self, node: &str, weight: u32) {
        self.remove(node);
        let weight = weight.clamp(1, MAX_WEIGHT);
        for i in 0..weight * REPLICAS_PER_WEIGHT {
            self.ring.insert(hash(&format!("{node}#{i}")), node.to_string());
        }
        self.weights.insert(node.to_string(), weight);
    }

    pub fn remove(&mut self, node: &str) {
        if self.weights.remove(node).is_some() {
            self.ring.retain(|_, owner| owner != node);
        }
    }

    /// The node owning `key`, or `None` on an empty ring.
    pub fn locate(&self, key: &str) -> Option<&str> {
        let point = hash(key);
        self.ring
            .range(point..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, u32)> {
        self.weights.iter().map(|(n, w)| (n.as_str(), *w))
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

fn hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}
