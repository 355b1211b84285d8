//! Chain context
//!
//! The explicit state bundle every verifier runs against: chain params,
//! the branch database, the contract re-execution pool, and the connect
//! and disconnect drivers that keep the store consistent with the chain.
//! No process-wide singletons; everything is passed by reference.

use std::collections::{HashMap, HashSet};

use crate::branch::{
    check_branch_block_info_tx, check_branch_duplicate_tx, check_branch_transaction_local,
    check_mortgage_mine_tx, check_prove_tx, check_report_cheat_tx, check_report_reward_transaction,
    BranchCache, BranchDb, ContractVmPool, MainChainTxIndex, ReportFlag,
};
use crate::chain::{Block, ChainParams};
use crate::crypto::Hash;
use crate::validation::{Transaction, TxReject, TxResult};

/// Everything cross-chain verification needs, passed explicitly
pub struct ChainCtx {
    pub params: ChainParams,
    pub db: BranchDb,
    pub vm_pool: ContractVmPool,
    /// Skip peer-chain cross-checks while re-verifying the local db
    pub uncheck_branch_tx_in_verify_db: bool,
    /// Main chain: accept step-2s from branches with no config entry
    pub uncheck_no_config_branch: bool,
}

impl ChainCtx {
    pub fn new(params: ChainParams, db: BranchDb) -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
        ChainCtx {
            params,
            db,
            vm_pool: ContractVmPool::new(workers),
            uncheck_branch_tx_in_verify_db: true,
            uncheck_no_config_branch: false,
        }
    }

    /// Verify and apply a block's cross-chain txs in block order
    ///
    /// Txs later in the block see the effects of earlier ones: header
    /// submissions are absorbed as soon as they verify, and the cache
    /// carries the dedup view for the rest of the block. Peer-chain
    /// evidence must have been checked at admission; connect re-runs
    /// only the local rules.
    pub fn connect_block_cross_chain(
        &mut self,
        block: &Block,
        connect_height: u64,
        adjusted_time: u64,
        tx_index: Option<&dyn MainChainTxIndex>,
    ) -> TxResult {
        let mut cache = BranchCache::new();

        for tx in &block.vtx {
            check_branch_duplicate_tx(tx, Some(&cache), &self.db)?;
            self.verify_connected_tx(tx, connect_height, adjusted_time, &cache, tx_index)?;
            self.apply_tx(tx)?;
            cache.stage(tx);
        }
        Ok(())
    }

    fn verify_connected_tx(
        &self,
        tx: &Transaction,
        connect_height: u64,
        adjusted_time: u64,
        cache: &BranchCache,
        tx_index: Option<&dyn MainChainTxIndex>,
    ) -> TxResult {
        if tx.is_sync_branch_info() {
            check_branch_block_info_tx(tx, &self.db, Some(cache), adjusted_time)?;
        }
        if tx.is_branch_chain_trans_step2() {
            check_branch_transaction_local(tx, &self.params)?;
        }
        if tx.is_mortgage() {
            check_mortgage_mine_tx(tx)?;
        }
        if tx.is_report() {
            check_report_cheat_tx(tx, &self.db)?;
        }
        if tx.is_prove() {
            check_prove_tx(tx, &self.db, &self.vm_pool)?;
        }
        if tx.is_report_reward() {
            let index = tx_index
                .ok_or_else(|| TxReject::missing("report reward needs a main-chain tx index"))?;
            check_report_reward_transaction(tx, &self.db, index, connect_height, &self.params)?;
        }
        Ok(())
    }

    /// Commit one verified tx's effect to the store
    pub fn apply_tx(&mut self, tx: &Transaction) -> TxResult {
        let store_err = |_| TxReject::missing("branch store write failed");

        if tx.is_branch_create() {
            self.db.add_branch_created(tx.hash()).map_err(store_err)?;
        }
        if tx.is_sync_branch_info() {
            if let Some(info) = &tx.branch_block_data {
                self.db.add_block_info(info).map_err(store_err)?;
            }
        }
        if tx.is_branch_chain_trans_step2() {
            if let (Some(from_branch), Ok(from_tx)) =
                (&tx.from_branch_id, Transaction::from_bytes(&tx.from_tx))
            {
                self.db.add_tx_record(from_branch, &from_tx.hash()).map_err(store_err)?;
            }
        }
        if tx.is_report() {
            if let (Some(key), Some(data)) =
                (crate::branch::get_report_tx_hash_key(tx), &tx.report_data)
            {
                self.db
                    .set_report_flag(
                        key,
                        ReportFlag::Reported,
                        &data.reported_branch_id,
                        &data.reported_block_hash,
                    )
                    .map_err(store_err)?;
            }
        }
        if tx.is_prove() {
            if let (Some(key), Some(data)) =
                (crate::branch::get_prove_tx_hash_key(tx), &tx.prove_data)
            {
                self.db
                    .set_report_flag(key, ReportFlag::Proved, &data.branch_id, &data.block_hash)
                    .map_err(store_err)?;
            }
        }
        Ok(())
    }

    /// Roll a block's cross-chain effects back out of the store
    pub fn disconnect_block_cross_chain(&mut self, block: &Block) -> TxResult {
        let store_err = |_| TxReject::missing("branch store write failed");

        for tx in block.vtx.iter().rev() {
            if tx.is_prove() {
                // The matching report is still connected; fall back to Reported
                if let (Some(key), Some(data)) =
                    (crate::branch::get_prove_tx_hash_key(tx), &tx.prove_data)
                {
                    self.db
                        .set_report_flag(key, ReportFlag::Reported, &data.branch_id, &data.block_hash)
                        .map_err(store_err)?;
                }
            }
            if tx.is_report() {
                if let (Some(key), Some(data)) =
                    (crate::branch::get_report_tx_hash_key(tx), &tx.report_data)
                {
                    self.db
                        .remove_report_flag(&key, &data.reported_branch_id, &data.reported_block_hash)
                        .map_err(store_err)?;
                }
            }
            if tx.is_branch_chain_trans_step2() {
                if let (Some(from_branch), Ok(from_tx)) =
                    (&tx.from_branch_id, Transaction::from_bytes(&tx.from_tx))
                {
                    self.db.remove_tx_record(from_branch, &from_tx.hash()).map_err(store_err)?;
                }
            }
            if tx.is_sync_branch_info() {
                if let Some(info) = &tx.branch_block_data {
                    self.db
                        .remove_block_info(&info.branch_id, &info.header.hash())
                        .map_err(store_err)?;
                }
            }
        }
        Ok(())
    }
}

/// In-memory main-chain tx index for tests and single-process setups
///
/// The production node wires the base engine's index in through the
/// same trait.
#[derive(Debug, Default)]
pub struct MemoryTxIndex {
    txs: HashMap<Hash, (Transaction, Hash)>,
    heights: HashMap<Hash, u64>,
    active: HashSet<Hash>,
}

impl MemoryTxIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_block(&mut self, block_hash: Hash, height: u64, txs: &[Transaction]) {
        for tx in txs {
            self.txs.insert(tx.hash(), (tx.clone(), block_hash));
        }
        self.heights.insert(block_hash, height);
        self.active.insert(block_hash);
    }
}

impl MainChainTxIndex for MemoryTxIndex {
    fn read_tx_data(&self, txid: &Hash) -> Option<(Transaction, Hash)> {
        self.txs.get(txid).cloned()
    }

    fn block_height(&self, block_hash: &Hash) -> Option<u64> {
        self.heights.get(block_hash).copied()
    }

    fn is_in_active_chain(&self, block_hash: &Hash) -> bool {
        self.active.contains(block_hash)
    }
}
