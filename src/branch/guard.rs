//! Duplicate / admission guard
//!
//! The single entry consulted from mempool acceptance and block connect
//! before any cross-chain tx is verified. This is the only place that
//! reads the fused cache+store view; downstream verifiers assume
//! uniqueness.

use crate::branch::{
    get_prove_tx_hash_key, get_report_tx_hash_key, tx_record_key, BranchCache, BranchDb, ReportFlag,
};
use crate::validation::{Transaction, TxReject, TxResult};

/// Reject a cross-chain tx that would double-apply
pub fn check_branch_duplicate_tx(
    tx: &Transaction,
    cache: Option<&BranchCache>,
    db: &BranchDb,
) -> TxResult {
    if tx.is_sync_branch_info() {
        if let Some(cache) = cache {
            if cache.has_in_cache(tx) {
                return Err(TxReject::duplicate("branch block info duplicate"));
            }
        }
        if let Some(info) = &tx.branch_block_data {
            if let Some(branch_data) = db.get_branch_data(&info.branch_id) {
                if branch_data.get_branch_block_data(&info.header.hash()).is_some() {
                    return Err(TxReject::duplicate("blockheader info has include before"));
                }
            }
        }
    }

    if tx.is_branch_chain_trans_step2() {
        if let (Some(from_branch), Ok(from_tx)) =
            (&tx.from_branch_id, Transaction::from_bytes(&tx.from_tx))
        {
            let key = tx_record_key(from_branch, &from_tx.hash());
            if let Some(cache) = cache {
                if cache.has_tx_record(&key) {
                    return Err(TxReject::duplicate("txn-already-in-records"));
                }
            }
            if db.is_tx_recv_repeat(from_branch, &from_tx.hash()) {
                return Err(TxReject::duplicate("txn-already-in-records"));
            }
        }
    }

    if tx.is_report() {
        if let Some(report_key) = get_report_tx_hash_key(tx) {
            if let Some(cache) = cache {
                if cache.report_flag_cache.contains_key(&report_key) {
                    return Err(TxReject::duplicate("duplicate report in cache"));
                }
            }
            if db.get_report_flag(&report_key).is_some() {
                return Err(TxReject::duplicate("duplicate report in db"));
            }
        }
    }

    if tx.is_prove() {
        if let Some(prove_key) = get_prove_tx_hash_key(tx) {
            if let Some(cache) = cache {
                if cache.report_flag_cache.get(&prove_key) == Some(&ReportFlag::Proved) {
                    return Err(TxReject::duplicate("duplicate prove in cache"));
                }
            }
            if db.get_report_flag(&prove_key) == Some(ReportFlag::Proved) {
                return Err(TxReject::duplicate("duplicate prove in db"));
            }
        }
    }

    Ok(())
}
