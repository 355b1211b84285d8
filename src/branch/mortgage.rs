//! Mortgage / mine-coin engine
//!
//! Collateral lifecycle checks: the mortgage tx on the main chain, the
//! redeem statement on the branch, the main chain's redemption
//! acceptance, and the report-driven lock/unlock of a branch's mine
//! coin.

use crate::branch::{BranchDb, ReportFlag};
use crate::chain::ChainParams;
use crate::constants::{money_range, BRANCH_CHAIN_MATURITY, REPORT_LOCK_COIN_HEIGHT};
use crate::crypto::{check_spv_proof, Hash, SpvProof};
use crate::rpc::ChainBridge;
use crate::script::{get_mortgage_coin_data, get_mortgage_mine_data, get_redeem_script_data};
use crate::validation::{BranchId, Transaction, TxReject, TxResult};

/// Shape check for a mortgage tx on the main chain
pub fn check_mortgage_mine_tx(tx: &Transaction) -> TxResult {
    if !tx.is_mortgage() {
        return Err(TxReject::malformed("not a mortgage tx"));
    }
    let branch_hash = match tx.send_to_branchid {
        Some(BranchId::Branch(hash)) => hash,
        _ => return Err(TxReject::malformed("mortgage must target a branch")),
    };
    let vout0 = tx
        .vout
        .first()
        .ok_or_else(|| TxReject::malformed("mortgage tx has no outputs"))?;
    let (script_branch, height, _) = get_mortgage_mine_data(&vout0.script_pubkey)
        .ok_or_else(|| TxReject::malformed("invalid mortgage mine script"))?;
    if script_branch != branch_hash {
        return Err(TxReject::malformed("mortgage script branch mismatch"));
    }
    if height < 0 || !money_range(vout0.value) {
        return Err(TxReject::malformed("mortgage script out of range"));
    }
    Ok(())
}

/// Content hash of the mine-coin outpoint a stake tx spends
///
/// Both sides of the lock/unlock linkage (`coin_preout_hash` on the
/// branch, `preminecoinvouthash` from the main chain) derive it the
/// same way.
pub fn mine_coin_outpoint_hash(prevout: &crate::validation::OutPoint) -> Hash {
    crate::crypto::hash_bytes(
        &bincode::serialize(prevout).expect("in-memory serialization cannot fail"),
    )
}

/// Extract the mortgage txid a redeem statement points at
pub fn get_redeem_statement_target(tx: &Transaction) -> Option<Hash> {
    if !tx.is_redeem_mortgage_statement() {
        return None;
    }
    tx.vout
        .iter()
        .find_map(|txout| get_redeem_script_data(&txout.script_pubkey))
}

/// Main-chain acceptance of a branch's mortgage redemption
///
/// The statement must be proven inside a mature branch block, and no
/// block staked with this mortgage's mine coin may carry a report that
/// has not been proved away.
pub fn check_redeem_mortgage(
    coin_from_txid: &Hash,
    statement_tx: &Transaction,
    spv: &SpvProof,
    branch_hash: &Hash,
    db: &BranchDb,
) -> TxResult {
    let target = get_redeem_statement_target(statement_tx)
        .ok_or_else(|| TxReject::malformed("not a redeem mortgage statement"))?;
    if target != *coin_from_txid {
        return Err(TxReject::malformed("redeem statement targets a different mortgage"));
    }

    let branch_data = db
        .get_branch_data(branch_hash)
        .ok_or_else(|| TxReject::missing("redeem branch unknown"))?;
    let block_data = branch_data
        .get_branch_block_data(&spv.block_hash)
        .ok_or_else(|| TxReject::missing("redeem statement block unknown"))?;

    if check_spv_proof(&block_data.header.hash_merkle_root, &spv.pmt, &statement_tx.hash()).is_none() {
        return Err(TxReject::spv("redeem statement spv check fail"));
    }

    if branch_data.height() < block_data.height + BRANCH_CHAIN_MATURITY as u64 {
        return Err(TxReject::missing("redeem statement not mature"));
    }

    // The quiet-period rule: any surviving report against a block staked
    // by this mortgage's mine coin blocks the redemption
    for data in branch_data.heads.values() {
        let staked = data
            .stake_tx
            .vout
            .first()
            .and_then(|vout| get_mortgage_coin_data(&vout.script_pubkey))
            .map(|(from_txid, _, _)| from_txid == *coin_from_txid)
            .unwrap_or(false);
        if staked
            && data
                .report_status
                .values()
                .any(|flag| *flag == ReportFlag::Reported)
        {
            return Err(TxReject::missing("mortgage still under unproved report"));
        }
    }

    Ok(())
}

/// Branch-side check of a lock-mine-coin tx against the main chain's report
pub fn check_lock_mortgage_mine_coin_tx(
    tx: &Transaction,
    this_chain: &ChainParams,
    bridge: &dyn ChainBridge,
) -> TxResult {
    if !tx.is_lock_mortgage_mine_coin() {
        return Err(TxReject::malformed("not a lock mortgage mine coin tx"));
    }
    let report_txid = tx
        .report_txid
        .ok_or_else(|| TxReject::malformed("lock tx missing reporttxid"))?;

    let fetched = bridge
        .get_report_tx_data(&report_txid)
        .map_err(|err| TxReject::peer_rpc(format!("RPC call getreporttxdata fail: {}", err)))?;

    if fetched.confirmations < REPORT_LOCK_COIN_HEIGHT {
        return Err(TxReject::missing(format!(
            "Need {} blocks to be mature, now is {}",
            REPORT_LOCK_COIN_HEIGHT, fetched.confirmations
        )));
    }

    let report_tx = Transaction::from_hex(&fetched.tx_hex)
        .ok_or_else(|| TxReject::malformed("getreporttxdata decode hex tx fail"))?;
    if !report_tx.is_report() {
        return Err(TxReject::missing("fetched tx is not a report"));
    }
    let report_data = report_tx
        .report_data
        .as_ref()
        .ok_or_else(|| TxReject::missing("fetched tx is not a report"))?;

    if Some(report_data.reported_branch_id) != this_chain.branch_hash() {
        return Err(TxReject::malformed("Report-branchid-not-match"));
    }

    match tx.coin_preout_hash {
        Some(hash) if hash == fetched.pre_mine_coin_vout_hash => Ok(()),
        _ => Err(TxReject::missing("lock-mine-coin-error!")),
    }
}

/// Branch-side check of an unlock-mine-coin tx against the main chain's prove
pub fn check_unlock_mortgage_mine_coin_tx(
    tx: &Transaction,
    this_chain: &ChainParams,
    bridge: &dyn ChainBridge,
) -> TxResult {
    if !tx.is_unlock_mortgage_mine_coin() {
        return Err(TxReject::malformed("not an unlock mortgage mine coin tx"));
    }
    let prove_txid = tx
        .prove_txid
        .ok_or_else(|| TxReject::malformed("unlock tx missing provetxid"))?;

    let fetched = bridge
        .get_prove_tx_data(&prove_txid)
        .map_err(|err| TxReject::missing(format!("RPC call getprovetxdata fail: {}", err)))?;

    if fetched.confirmations < REPORT_LOCK_COIN_HEIGHT {
        return Err(TxReject::missing(format!(
            "Need {} blocks to be mature, now is {}",
            REPORT_LOCK_COIN_HEIGHT, fetched.confirmations
        )));
    }

    let prove_tx = Transaction::from_hex(&fetched.tx_hex)
        .ok_or_else(|| TxReject::missing("getprovetxdata decode hex tx fail"))?;
    let prove_data = prove_tx
        .prove_data
        .as_ref()
        .ok_or_else(|| TxReject::missing("fetched tx is not a prove"))?;

    if Some(prove_data.branch_id) != this_chain.branch_hash() {
        return Err(TxReject::malformed("prove-branchid-not-match"));
    }

    match tx.coin_preout_hash {
        Some(hash) if hash == fetched.pre_mine_coin_vout_hash => Ok(()),
        _ => Err(TxReject::missing("lock-mine-coin-error!")),
    }
}
