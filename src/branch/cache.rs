//! Per-block staging cache
//!
//! Mirrors the additions a connecting block is about to make to the
//! store, so that txs later in the same block see their predecessors.
//! `has_in_cache` must be consulted before the persistent store to
//! catch a double-submit inside one block.

use std::collections::{HashMap, HashSet};

use crate::branch::{get_prove_tx_hash_key, get_report_tx_hash_key, ReportFlag};
use crate::crypto::Hash;
use crate::validation::Transaction;

/// Staged view of a connecting block's cross-chain effects
#[derive(Debug, Default)]
pub struct BranchCache {
    /// `(branch hash, block hash)` pairs staged by SyncBranchInfo txs
    block_infos: HashSet<(Hash, Hash)>,
    /// Report-key flags staged by Report/Prove txs
    pub report_flag_cache: HashMap<Hash, ReportFlag>,
    /// Step-2 receive records staged in this block
    tx_records: HashSet<Vec<u8>>,
}

impl BranchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Is this SyncBranchInfo header already staged?
    pub fn has_in_cache(&self, tx: &Transaction) -> bool {
        match &tx.branch_block_data {
            Some(info) => self
                .block_infos
                .contains(&(info.branch_id, info.header.hash())),
            None => false,
        }
    }

    pub fn has_tx_record(&self, key: &[u8]) -> bool {
        self.tx_records.contains(key)
    }

    /// Stage a verified tx's effect
    pub fn stage(&mut self, tx: &Transaction) {
        if tx.is_sync_branch_info() {
            if let Some(info) = &tx.branch_block_data {
                self.block_infos.insert((info.branch_id, info.header.hash()));
            }
        }
        if tx.is_report() {
            if let Some(key) = get_report_tx_hash_key(tx) {
                self.report_flag_cache.insert(key, ReportFlag::Reported);
            }
        }
        if tx.is_prove() {
            if let Some(key) = get_prove_tx_hash_key(tx) {
                self.report_flag_cache.insert(key, ReportFlag::Proved);
            }
        }
        if tx.is_branch_chain_trans_step2() {
            if let (Some(from), true) = (&tx.from_branch_id, !tx.from_tx.is_empty()) {
                if let Ok(from_tx) = Transaction::from_bytes(&tx.from_tx) {
                    self.tx_records
                        .insert(super::tx_record_key(from, &from_tx.hash()));
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.block_infos.clear();
        self.report_flag_cache.clear();
        self.tx_records.clear();
    }
}
