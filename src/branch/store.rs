//! Branch-header store
//!
//! Per-branch header DAG tracked on the main chain, plus the flat
//! report-flag map and the step-2 receive records. Persisted with sled;
//! the full working set is held in memory and every mutation is flushed
//! through before returning.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::chain::{calculate_work, BlockHeader};
use crate::crypto::Hash;
use crate::validation::{BranchBlockInfo, BranchId, Transaction, TxReject, TxResult};

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Adjudication state of a report key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFlag {
    Reported,
    Proved,
}

/// One submitted branch block header with its accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchBlockData {
    pub block_hash: Hash,
    pub header: BlockHeader,
    pub height: u64,
    /// Cumulative work from the branch root through this block
    pub chain_work: u128,
    /// The stake tx (`vtx[1]`) that ties the block to a mortgage
    pub stake_tx: Transaction,
    /// Reports pinned to this block, by report key
    pub report_status: BTreeMap<Hash, ReportFlag>,
}

impl BranchBlockData {
    /// Decode a submitted `BranchBlockInfo` into block data
    ///
    /// `chain_work` is left at this block's own work; the store makes it
    /// cumulative on insert.
    pub fn from_info(info: &BranchBlockInfo) -> TxResult<Self> {
        let stake_tx = Transaction::from_bytes(&info.stake_tx_data)
            .map_err(|_| TxReject::malformed("stake tx data does not decode"))?;
        Ok(BranchBlockData {
            block_hash: info.header.hash(),
            header: info.header.clone(),
            height: info.block_height,
            chain_work: calculate_work(info.header.bits),
            stake_tx,
            report_status: BTreeMap::new(),
        })
    }
}

/// All tracked data of one branch: header DAG plus the active chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchData {
    /// Every submitted header, by block hash
    pub heads: HashMap<Hash, BranchBlockData>,
    /// Best-work path, root first
    pub active_chain: Vec<Hash>,
}

impl BranchData {
    /// Height of the best tip (0 when nothing is tracked)
    pub fn height(&self) -> u64 {
        self.active_chain
            .last()
            .and_then(|hash| self.heads.get(hash))
            .map(|data| data.height)
            .unwrap_or(0)
    }

    /// Hash of the best tip, if any
    pub fn best_tip_hash(&self) -> Option<Hash> {
        self.active_chain.last().copied()
    }

    pub fn get_branch_block_data(&self, block_hash: &Hash) -> Option<&BranchBlockData> {
        self.heads.get(block_hash)
    }

    /// Walk parent pointers from `from` down to `height`
    pub fn get_ancestor(&self, from: &BranchBlockData, height: u64) -> Option<&BranchBlockData> {
        if height > from.height {
            return None;
        }
        let mut current = self.heads.get(&from.block_hash)?;
        while current.height > height {
            current = self.heads.get(&current.header.hash_prev_block)?;
        }
        if current.height == height {
            Some(current)
        } else {
            None
        }
    }

    /// Insert a block and re-activate the best-work chain if it now wins
    pub fn add_block(&mut self, mut data: BranchBlockData) {
        if let Some(parent) = self.heads.get(&data.header.hash_prev_block) {
            data.chain_work += parent.chain_work;
        }

        let tip_work = self
            .best_tip_hash()
            .and_then(|hash| self.heads.get(&hash))
            .map(|tip| tip.chain_work)
            .unwrap_or(0);

        let block_hash = data.block_hash;
        let new_work = data.chain_work;
        self.heads.insert(block_hash, data);

        if new_work > tip_work || self.active_chain.is_empty() {
            self.activate_chain_from(block_hash);
        }
    }

    fn activate_chain_from(&mut self, tip: Hash) {
        let mut chain = Vec::new();
        let mut cursor = Some(tip);
        while let Some(hash) = cursor {
            match self.heads.get(&hash) {
                Some(data) => {
                    chain.push(hash);
                    cursor = if self.heads.contains_key(&data.header.hash_prev_block) {
                        Some(data.header.hash_prev_block)
                    } else {
                        None
                    };
                }
                None => break,
            }
        }
        chain.reverse();
        self.active_chain = chain;
    }

    /// Remove a block (disconnect); re-activates from the remaining best work
    pub fn remove_block(&mut self, block_hash: &Hash) {
        self.heads.remove(block_hash);
        let best = self
            .heads
            .values()
            .max_by_key(|data| data.chain_work)
            .map(|data| data.block_hash);
        match best {
            Some(tip) => self.activate_chain_from(tip),
            None => self.active_chain.clear(),
        }
    }
}

/// Key for the step-2 receive records: (source chain, step-1 txid)
pub fn tx_record_key(from_branch: &BranchId, from_txid: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(64);
    key.extend_from_slice(from_branch.to_string().as_bytes());
    key.extend_from_slice(&from_txid.0);
    key
}

/// The persistent branch database
///
/// Updated only on block connect and rolled back on disconnect; the
/// in-flight block stages its view through `BranchCache`.
pub struct BranchDb {
    db: sled::Db,
    branches_tree: sled::Tree,
    flags_tree: sled::Tree,
    records_tree: sled::Tree,
    created_tree: sled::Tree,

    branches: HashMap<Hash, BranchData>,
    /// Flat report-flag map, by report key
    report_flags: HashMap<Hash, ReportFlag>,
    tx_records: HashSet<Vec<u8>>,
    created: HashSet<Hash>,
}

impl BranchDb {
    /// Open or create the database and load the working set
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let branches_tree = db.open_tree("branches")?;
        let flags_tree = db.open_tree("report_flags")?;
        let records_tree = db.open_tree("tx_records")?;
        let created_tree = db.open_tree("created")?;

        let mut branches = HashMap::new();
        for item in branches_tree.iter() {
            let (key, value) = item?;
            if key.len() != 32 {
                continue;
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key);
            let data: BranchData = bincode::deserialize(&value)?;
            branches.insert(Hash(hash), data);
        }

        let mut report_flags = HashMap::new();
        for item in flags_tree.iter() {
            let (key, value) = item?;
            if key.len() != 32 {
                continue;
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key);
            let flag: ReportFlag = bincode::deserialize(&value)?;
            report_flags.insert(Hash(hash), flag);
        }

        let mut tx_records = HashSet::new();
        for item in records_tree.iter() {
            let (key, _) = item?;
            tx_records.insert(key.to_vec());
        }

        let mut created = HashSet::new();
        for item in created_tree.iter() {
            let (key, _) = item?;
            if key.len() != 32 {
                continue;
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key);
            created.insert(Hash(hash));
        }

        Ok(Self {
            db,
            branches_tree,
            flags_tree,
            records_tree,
            created_tree,
            branches,
            report_flags,
            tx_records,
            created,
        })
    }

    pub fn has_branch_data(&self, branch_hash: &Hash) -> bool {
        self.branches.contains_key(branch_hash)
    }

    pub fn get_branch_data(&self, branch_hash: &Hash) -> Option<&BranchData> {
        self.branches.get(branch_hash)
    }

    /// Has the branch-create tx for this branch been connected?
    pub fn is_branch_created(&self, branch_hash: &Hash) -> bool {
        self.created.contains(branch_hash)
    }

    pub fn add_branch_created(&mut self, branch_hash: Hash) -> Result<(), StoreError> {
        self.created.insert(branch_hash);
        self.created_tree.insert(branch_hash.0, &[])?;
        self.db.flush()?;
        Ok(())
    }

    /// Insert a validated header submission
    pub fn add_block_info(&mut self, info: &BranchBlockInfo) -> Result<(), StoreError> {
        let data = match BranchBlockData::from_info(info) {
            Ok(data) => data,
            // Validated upstream; an undecodable stake tx cannot reach here
            Err(_) => return Ok(()),
        };
        let branch = self.branches.entry(info.branch_id).or_default();
        branch.add_block(data);
        self.save_branch(&info.branch_id)
    }

    /// Remove a header submission (block disconnect)
    pub fn remove_block_info(&mut self, branch_hash: &Hash, block_hash: &Hash) -> Result<(), StoreError> {
        if let Some(branch) = self.branches.get_mut(branch_hash) {
            branch.remove_block(block_hash);
        }
        self.save_branch(branch_hash)
    }

    pub fn get_report_flag(&self, report_key: &Hash) -> Option<ReportFlag> {
        self.report_flags.get(report_key).copied()
    }

    /// Record a report-key state, also pinning it on the named block
    pub fn set_report_flag(
        &mut self,
        report_key: Hash,
        flag: ReportFlag,
        branch_hash: &Hash,
        block_hash: &Hash,
    ) -> Result<(), StoreError> {
        self.report_flags.insert(report_key, flag);
        self.flags_tree.insert(report_key.0, bincode::serialize(&flag)?)?;

        if let Some(branch) = self.branches.get_mut(branch_hash) {
            if let Some(block) = branch.heads.get_mut(block_hash) {
                block.report_status.insert(report_key, flag);
            }
        }
        self.save_branch(branch_hash)
    }

    /// Drop a report key entirely (block disconnect of the report tx)
    pub fn remove_report_flag(
        &mut self,
        report_key: &Hash,
        branch_hash: &Hash,
        block_hash: &Hash,
    ) -> Result<(), StoreError> {
        self.report_flags.remove(report_key);
        self.flags_tree.remove(report_key.0)?;

        if let Some(branch) = self.branches.get_mut(branch_hash) {
            if let Some(block) = branch.heads.get_mut(block_hash) {
                block.report_status.remove(report_key);
            }
        }
        self.save_branch(branch_hash)
    }

    pub fn is_tx_recv_repeat(&self, from_branch: &BranchId, from_txid: &Hash) -> bool {
        self.tx_records.contains(&tx_record_key(from_branch, from_txid))
    }

    pub fn add_tx_record(&mut self, from_branch: &BranchId, from_txid: &Hash) -> Result<(), StoreError> {
        let key = tx_record_key(from_branch, from_txid);
        self.records_tree.insert(key.as_slice(), &[])?;
        self.tx_records.insert(key);
        self.db.flush()?;
        Ok(())
    }

    pub fn remove_tx_record(&mut self, from_branch: &BranchId, from_txid: &Hash) -> Result<(), StoreError> {
        let key = tx_record_key(from_branch, from_txid);
        self.records_tree.remove(key.as_slice())?;
        self.tx_records.remove(&key);
        self.db.flush()?;
        Ok(())
    }

    fn save_branch(&mut self, branch_hash: &Hash) -> Result<(), StoreError> {
        match self.branches.get(branch_hash) {
            Some(branch) => {
                self.branches_tree.insert(branch_hash.0, bincode::serialize(branch)?)?;
            }
            None => {
                self.branches_tree.remove(branch_hash.0)?;
            }
        }
        self.db.flush()?;
        Ok(())
    }
}
