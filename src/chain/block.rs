//! Block structure
//!
//! Branch block headers carry, besides the usual fields, the stake
//! outpoint and miner signature that tie the block to a main-chain
//! mortgage, and two extra merkle roots committing to the contract
//! state read (prev-data) and produced (final-data) by each tx.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::crypto::{
    compute_merkle_root, hash_bytes, Hash, PrivateKey, PublicKey, SchnorrSignature, SpvProof,
};
use crate::validation::{OutPoint, Transaction};

/// Miner signature over a header's signing hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    pub pubkey: PublicKey,
    pub signature: SchnorrSignature,
}

/// Block header containing all metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version
    pub version: u32,
    /// Hash of the previous block
    pub hash_prev_block: Hash,
    /// Merkle root of all transactions
    pub hash_merkle_root: Hash,
    /// Merkle root over tx hashes bound to observed contract prev-data
    pub hash_merkle_root_with_prev_data: Hash,
    /// Merkle root over tx hashes bound to produced contract final-data
    pub hash_merkle_root_with_data: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub time: u64,
    /// Difficulty target (compact representation)
    pub bits: u32,
    /// Nonce used for PoW
    pub nonce: u64,
    /// The mine coin this block stakes (null on the main chain)
    pub prevout_stake: OutPoint,
    /// Miner signature; None until signed
    pub block_sig: Option<BlockSignature>,
}

impl Default for BlockHeader {
    fn default() -> Self {
        BlockHeader {
            version: 1,
            hash_prev_block: Hash::zero(),
            hash_merkle_root: Hash::zero(),
            hash_merkle_root_with_prev_data: Hash::zero(),
            hash_merkle_root_with_data: Hash::zero(),
            time: 0,
            bits: 0x1d00ffff,
            nonce: 0,
            prevout_stake: OutPoint::null(),
            block_sig: None,
        }
    }
}

impl BlockHeader {
    /// Serialize the header for hashing
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("in-memory serialization cannot fail")
    }

    /// Calculate the hash of this header
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }

    /// Hash covered by the miner signature (signature field zeroed)
    pub fn signing_hash(&self) -> Hash {
        let mut unsigned = self.clone();
        unsigned.block_sig = None;
        hash_bytes(&unsigned.to_bytes())
    }

    /// Sign the header with the staking miner's key
    pub fn sign(&mut self, key: &PrivateKey) {
        let signature = key.sign(&self.signing_hash());
        self.block_sig = Some(BlockSignature { pubkey: key.public_key(), signature });
    }

    /// Verify the miner signature, if any
    pub fn verify_signature(&self) -> bool {
        match &self.block_sig {
            Some(sig) => sig.pubkey.verify(&self.signing_hash(), &sig.signature),
            None => false,
        }
    }
}

/// A complete block containing header and transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// List of transactions in this block
    pub vtx: Vec<Transaction>,
}

impl Block {
    /// Create a new block
    pub fn new(header: BlockHeader, vtx: Vec<Transaction>) -> Self {
        Self { header, vtx }
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Merkle root over the tx list, with mutation detection
    pub fn vtx_merkle_root(&self, mutated: Option<&mut bool>) -> Hash {
        let tx_hashes: Vec<Hash> = self.vtx.iter().map(|tx| tx.hash()).collect();
        compute_merkle_root(&tx_hashes, mutated)
    }

    /// Build an SPV proof for `txids` over this block's tx list
    pub fn spv_proof(&self, txids: &HashSet<Hash>) -> SpvProof {
        let leaves: Vec<Hash> = self.vtx.iter().map(|tx| tx.hash()).collect();
        SpvProof::build(self.hash(), &leaves, txids)
    }
}
