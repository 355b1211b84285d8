//! Merkle tree implementation
//!
//! Computes transaction merkle roots and builds the compact
//! partial-merkle-tree inclusion proofs that cross-chain evidence is
//! carried in.

use super::{hash_pair, Hash};
use serde::{Deserialize, Serialize};

/// Compute the merkle root of a list of hashes
///
/// If the list is empty, returns zero hash.
/// If odd number of elements, duplicates the last element.
///
/// `mutated`, when provided, is set if any level pairs two identical
/// hashes at distinct positions - the CVE-2012-2459 style tree mutation.
pub fn compute_merkle_root(hashes: &[Hash], mutated: Option<&mut bool>) -> Hash {
    let mut found_mutation = false;

    let root = if hashes.is_empty() {
        Hash::zero()
    } else {
        let mut current_level: Vec<Hash> = hashes.to_vec();

        while current_level.len() > 1 {
            for pair in current_level.chunks(2) {
                if pair.len() == 2 && pair[0] == pair[1] {
                    found_mutation = true;
                }
            }

            // If odd number, duplicate last
            if current_level.len() % 2 == 1 {
                current_level.push(*current_level.last().unwrap());
            }

            let mut next_level = Vec::with_capacity(current_level.len() / 2);
            for chunk in current_level.chunks(2) {
                next_level.push(hash_pair(&chunk[0], &chunk[1]));
            }
            current_level = next_level;
        }

        current_level[0]
    };

    if let Some(flag) = mutated {
        *flag = found_mutation;
    }
    root
}

/// Compact multi-leaf inclusion proof over a block's transaction list
///
/// Stores one flag bit per traversed node and a hash for every pruned
/// subtree, in depth-first order. Matched leaves are recovered together
/// with their indices by [`PartialMerkleTree::extract_matches`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialMerkleTree {
    /// Number of leaves in the full tree
    num_leaves: u32,
    /// Depth-first traversal flags
    bits: Vec<bool>,
    /// Hashes of pruned subtrees and matched leaves
    hashes: Vec<Hash>,
}

impl PartialMerkleTree {
    /// Build a proof over `leaves`, marking leaves where `matches` is true
    pub fn from_leaves(leaves: &[Hash], matches: &[bool]) -> Self {
        debug_assert_eq!(leaves.len(), matches.len());
        let mut pmt = PartialMerkleTree {
            num_leaves: leaves.len() as u32,
            bits: Vec::new(),
            hashes: Vec::new(),
        };

        if !leaves.is_empty() {
            let mut height = 0u32;
            while pmt.width_at(height) > 1 {
                height += 1;
            }
            pmt.build(height, 0, leaves, matches);
        }
        pmt
    }

    /// Extract matched leaves and their indices, returning the implied root
    ///
    /// Returns `None` when the encoding is inconsistent (truncated,
    /// padded, or carrying a duplicated right branch).
    pub fn extract_matches(&self, matches: &mut Vec<Hash>, indices: &mut Vec<u32>) -> Option<Hash> {
        matches.clear();
        indices.clear();

        if self.num_leaves == 0 || self.hashes.is_empty() {
            return None;
        }
        if self.hashes.len() as u32 > self.num_leaves {
            return None;
        }
        if self.bits.len() < self.hashes.len() {
            return None;
        }

        let mut height = 0u32;
        while self.width_at(height) > 1 {
            height += 1;
        }

        let mut bits_used = 0usize;
        let mut hashes_used = 0usize;
        let root = self.extract(height, 0, &mut bits_used, &mut hashes_used, matches, indices)?;

        // Every flag and hash must be consumed exactly once
        if bits_used != self.bits.len() || hashes_used != self.hashes.len() {
            return None;
        }
        Some(root)
    }

    /// Number of leaves in the proven tree
    pub fn num_leaves(&self) -> u32 {
        self.num_leaves
    }

    fn width_at(&self, height: u32) -> u32 {
        (self.num_leaves + (1 << height) - 1) >> height
    }

    fn subtree_hash(&self, height: u32, pos: u32, leaves: &[Hash]) -> Hash {
        if height == 0 {
            leaves[pos as usize]
        } else {
            let left = self.subtree_hash(height - 1, pos * 2, leaves);
            let right = if pos * 2 + 1 < self.width_at(height - 1) {
                self.subtree_hash(height - 1, pos * 2 + 1, leaves)
            } else {
                left
            };
            hash_pair(&left, &right)
        }
    }

    fn build(&mut self, height: u32, pos: u32, leaves: &[Hash], matches: &[bool]) {
        // Does this subtree contain any matched leaf?
        let mut any_match = false;
        let from = pos << height;
        let to = ((pos + 1) << height).min(leaves.len() as u32);
        for i in from..to {
            if matches[i as usize] {
                any_match = true;
            }
        }

        self.bits.push(any_match);
        if height == 0 || !any_match {
            self.hashes.push(self.subtree_hash(height, pos, leaves));
        } else {
            self.build(height - 1, pos * 2, leaves, matches);
            if pos * 2 + 1 < self.width_at(height - 1) {
                self.build(height - 1, pos * 2 + 1, leaves, matches);
            }
        }
    }

    fn extract(
        &self,
        height: u32,
        pos: u32,
        bits_used: &mut usize,
        hashes_used: &mut usize,
        matches: &mut Vec<Hash>,
        indices: &mut Vec<u32>,
    ) -> Option<Hash> {
        if *bits_used >= self.bits.len() {
            return None;
        }
        let flag = self.bits[*bits_used];
        *bits_used += 1;

        if height == 0 || !flag {
            if *hashes_used >= self.hashes.len() {
                return None;
            }
            let hash = self.hashes[*hashes_used];
            *hashes_used += 1;
            if height == 0 && flag {
                matches.push(hash);
                indices.push(pos);
            }
            Some(hash)
        } else {
            let left = self.extract(height - 1, pos * 2, bits_used, hashes_used, matches, indices)?;
            let right = if pos * 2 + 1 < self.width_at(height - 1) {
                let right =
                    self.extract(height - 1, pos * 2 + 1, bits_used, hashes_used, matches, indices)?;
                if right == left {
                    // Identical left/right implies a mutated tree
                    return None;
                }
                right
            } else {
                left
            };
            Some(hash_pair(&left, &right))
        }
    }
}

/// SPV proof: a block hash plus a partial merkle tree over its txids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpvProof {
    pub block_hash: Hash,
    pub pmt: PartialMerkleTree,
}

impl SpvProof {
    /// Build a proof for `txids` out of a block's full txid list
    pub fn build(block_hash: Hash, leaves: &[Hash], txids: &std::collections::HashSet<Hash>) -> Self {
        let matches: Vec<bool> = leaves.iter().map(|h| txids.contains(h)).collect();
        SpvProof {
            block_hash,
            pmt: PartialMerkleTree::from_leaves(leaves, &matches),
        }
    }

    /// Hex wire form used by the redeem RPC
    pub fn to_hex(&self) -> String {
        hex::encode(bincode::serialize(self).expect("in-memory serialization cannot fail"))
    }

    /// Decode the hex wire form
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        bincode::deserialize(&bytes).ok()
    }
}

/// Verify an inclusion proof against an expected merkle root
///
/// Returns the leaf index of `query_tx_hash` when the proof commits to
/// exactly that one transaction under `merkle_root`; `None` on root
/// mismatch, on a missing query hash, or when more than one leaf is
/// marked.
pub fn check_spv_proof(merkle_root: &Hash, pmt: &PartialMerkleTree, query_tx_hash: &Hash) -> Option<u32> {
    let mut matches = Vec::new();
    let mut indices = Vec::new();
    let root = pmt.extract_matches(&mut matches, &mut indices)?;
    if root != *merkle_root {
        return None;
    }
    if !matches.contains(query_tx_hash) {
        return None;
    }
    if indices.len() > 1 {
        return None;
    }
    Some(indices[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;
    use std::collections::HashSet;

    fn make_hashes(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash_bytes(&i.to_le_bytes())).collect()
    }

    #[test]
    fn test_empty_merkle_root() {
        let root = compute_merkle_root(&[], None);
        assert_eq!(root, Hash::zero());
    }

    #[test]
    fn test_single_element() {
        let hashes = make_hashes(1);
        let root = compute_merkle_root(&hashes, None);
        assert_eq!(root, hashes[0]);
    }

    #[test]
    fn test_two_elements() {
        let hashes = make_hashes(2);
        let root = compute_merkle_root(&hashes, None);
        let expected = hash_pair(&hashes[0], &hashes[1]);
        assert_eq!(root, expected);
    }

    #[test]
    fn test_mutation_detected() {
        let mut hashes = make_hashes(4);
        hashes[3] = hashes[2];
        let mut mutated = false;
        compute_merkle_root(&hashes, Some(&mut mutated));
        assert!(mutated);

        let mut clean = false;
        compute_merkle_root(&make_hashes(4), Some(&mut clean));
        assert!(!clean);
    }

    #[test]
    fn test_spv_proof_every_index() {
        for n in [1usize, 2, 3, 5, 8, 13] {
            let hashes = make_hashes(n);
            let root = compute_merkle_root(&hashes, None);
            for (i, h) in hashes.iter().enumerate() {
                let mut txids = HashSet::new();
                txids.insert(*h);
                let proof = SpvProof::build(Hash::zero(), &hashes, &txids);
                assert_eq!(
                    check_spv_proof(&root, &proof.pmt, h),
                    Some(i as u32),
                    "n={} i={}",
                    n,
                    i
                );
            }
        }
    }

    #[test]
    fn test_spv_proof_wrong_root_fails() {
        let hashes = make_hashes(6);
        let mut txids = HashSet::new();
        txids.insert(hashes[2]);
        let proof = SpvProof::build(Hash::zero(), &hashes, &txids);

        let wrong_root = hash_bytes(b"wrong");
        assert_eq!(check_spv_proof(&wrong_root, &proof.pmt, &hashes[2]), None);
    }

    #[test]
    fn test_spv_proof_absent_hash_fails() {
        let hashes = make_hashes(6);
        let root = compute_merkle_root(&hashes, None);
        let mut txids = HashSet::new();
        txids.insert(hashes[2]);
        let proof = SpvProof::build(Hash::zero(), &hashes, &txids);

        let outsider = hash_bytes(b"not in block");
        assert_eq!(check_spv_proof(&root, &proof.pmt, &outsider), None);
    }

    #[test]
    fn test_spv_proof_two_matches_rejected() {
        let hashes = make_hashes(6);
        let root = compute_merkle_root(&hashes, None);
        let mut txids = HashSet::new();
        txids.insert(hashes[1]);
        txids.insert(hashes[4]);
        let proof = SpvProof::build(Hash::zero(), &hashes, &txids);

        // A proof carrying two matched leaves pins down neither
        assert_eq!(check_spv_proof(&root, &proof.pmt, &hashes[1]), None);
    }

    #[test]
    fn test_extract_matches_root_equals_full_root() {
        let hashes = make_hashes(9);
        let root = compute_merkle_root(&hashes, None);
        let mut txids = HashSet::new();
        txids.insert(hashes[7]);
        let proof = SpvProof::build(Hash::zero(), &hashes, &txids);

        let mut matches = Vec::new();
        let mut indices = Vec::new();
        let extracted = proof.pmt.extract_matches(&mut matches, &mut indices).unwrap();
        assert_eq!(extracted, root);
        assert_eq!(matches, vec![hashes[7]]);
        assert_eq!(indices, vec![7]);
    }

    #[test]
    fn test_empty_tree_rejected() {
        let pmt = PartialMerkleTree::default();
        let mut matches = Vec::new();
        let mut indices = Vec::new();
        assert_eq!(pmt.extract_matches(&mut matches, &mut indices), None);
    }
}
