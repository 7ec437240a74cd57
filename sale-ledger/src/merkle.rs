//! Allowlist Merkle tree and membership verification
//!
//! # Design
//!
//! - Binary Merkle tree with SHA-256 hashing
//! - Leaf = SHA-256(address bytes)
//! - Parent = SHA-256(min(a, b) || max(a, b)), so a proof is just the list of
//!   sibling hashes and does not carry left/right positions
//! - Odd levels duplicate their last node

use crate::types::{Address, Hash};
use sha2::{Digest, Sha256};
use std::fmt;

/// Checks that a candidate belongs to the allowlist committed to by `root`
pub trait MembershipVerifier: Send + Sync {
    /// Verify `proof` for `candidate` against `root`
    fn verify(&self, candidate: &Address, proof: &[Hash], root: &Hash) -> bool;
}

/// Real Merkle-inclusion verifier
#[derive(Debug, Clone, Copy, Default)]
pub struct MerkleVerifier;

impl MembershipVerifier for MerkleVerifier {
    fn verify(&self, candidate: &Address, proof: &[Hash], root: &Hash) -> bool {
        compute_root(leaf_hash(candidate), proof) == *root
    }
}

/// Allowlist bypass: accepts every proof
///
/// Only selected through `AllowlistMode::Disabled`; the ledger logs a warning
/// when it opens with this verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl MembershipVerifier for AcceptAll {
    fn verify(&self, _candidate: &Address, _proof: &[Hash], _root: &Hash) -> bool {
        true
    }
}

/// Leaf hash for an allowlisted address
pub fn leaf_hash(address: &Address) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.finalize().into()
}

/// Hash a pair of nodes, order-independent
fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize().into()
}

/// Fold a proof into the root it implies
pub fn compute_root(leaf: Hash, proof: &[Hash]) -> Hash {
    proof
        .iter()
        .fold(leaf, |current, sibling| hash_pair(&current, sibling))
}

/// Allowlist tree built from a fixed member list
pub struct AllowlistTree {
    /// Each level from leaves (index 0) up to the root
    levels: Vec<Vec<Hash>>,
}

impl AllowlistTree {
    /// Build from member addresses (order is preserved as leaf order)
    pub fn from_members<'a>(members: impl IntoIterator<Item = &'a Address>) -> Self {
        let leaves: Vec<Hash> = members.into_iter().map(leaf_hash).collect();
        let mut levels = vec![leaves];

        while levels.last().map_or(false, |level| level.len() > 1) {
            let current = &levels[levels.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.levels[0].len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    /// Merkle root (all zeroes for an empty list)
    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first().copied())
            .unwrap_or([0u8; 32])
    }

    /// Proof for the member at `index`
    pub fn proof(&self, index: usize) -> Option<Vec<Hash>> {
        if index >= self.len() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut position = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if position % 2 == 0 {
                // No right neighbour: the node was paired with itself
                level.get(position + 1).unwrap_or(&level[position])
            } else {
                &level[position - 1]
            };
            siblings.push(*sibling);
            position /= 2;
        }

        Some(siblings)
    }

    /// Proof for a member address, if present
    pub fn proof_for(&self, member: &Address) -> Option<Vec<Hash>> {
        let leaf = leaf_hash(member);
        let index = self.levels[0].iter().position(|h| *h == leaf)?;
        self.proof(index)
    }
}

impl fmt::Debug for AllowlistTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllowlistTree")
            .field("members", &self.len())
            .field("root", &hex::encode(self.root()))
            .finish()
    }
}
