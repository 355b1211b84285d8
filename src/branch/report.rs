//! Report / prove state machine
//!
//! Anyone may report a branch block or tx as invalid; the accused
//! miner's side answers with a prove carrying enough data to re-check
//! the block. A report key moves `∅ → Reported → Proved` and `Proved`
//! is terminal; a report that survives unproved past the deadline lets
//! the reporter claim half the slashed collateral.

use crate::branch::{
    check_prove_contract_data, check_prove_smart_contract, BranchData, BranchDb, ContractVmPool,
    ReportFlag,
};
use crate::chain::ChainParams;
use crate::constants::{money_range, MAX_MONEY, REDEEM_SAFE_HEIGHT, REPORT_OUTOF_HEIGHT};
use crate::crypto::{check_spv_proof, Hash, HashWriter};
use crate::script::{
    get_contract_addr, get_mortgage_coin_data, is_contract_change_script, is_contract_script,
    make_contract_script, verify_input,
};
use crate::validation::{
    Amount, ProveDataItem, ReportType, Transaction, TxReject, TxResult,
};

/// Main-chain lookups the reward check needs from the base node
pub trait MainChainTxIndex {
    /// A confirmed tx together with its containing block hash
    fn read_tx_data(&self, txid: &Hash) -> Option<(Transaction, Hash)>;
    /// Height of a main-chain block
    fn block_height(&self, block_hash: &Hash) -> Option<u64>;
    /// Is the block on the active main chain?
    fn is_in_active_chain(&self, block_hash: &Hash) -> bool;
}

/// Content key of a report tx
///
/// Reporter-side and prover-side key derivation must land on the same
/// hash for the state machine to join them.
pub fn get_report_tx_hash_key(tx: &Transaction) -> Option<Hash> {
    if !tx.is_report() {
        return None;
    }
    let data = tx.report_data.as_ref()?;
    let mut writer = HashWriter::new();
    writer.write_u8(data.report_type.tag());
    writer.write_hash(&data.reported_branch_id);
    writer.write_hash(&data.reported_block_hash);
    writer.write_hash(&data.reported_tx_hash);
    Some(writer.finish())
}

/// Content key of a prove tx; equals the matching report's key
pub fn get_prove_tx_hash_key(tx: &Transaction) -> Option<Hash> {
    if !tx.is_prove() {
        return None;
    }
    let data = tx.prove_data.as_ref()?;
    let mut writer = HashWriter::new();
    writer.write_u8(data.prove_type.tag());
    if matches!(
        data.prove_type,
        ReportType::Tx | ReportType::Coinbase | ReportType::MerkleTree
    ) {
        writer.write_hash(&data.branch_id);
        writer.write_hash(&data.block_hash);
        writer.write_hash(&data.tx_hash);
    }
    Some(writer.finish())
}

/// Shared block-pinned report rules: the block exists, is not from the
/// future, and is not past the challenge horizon
pub fn check_report_tx_commonly(tx: &Transaction, branch_data: &BranchData) -> TxResult {
    let data = tx
        .report_data
        .as_ref()
        .ok_or_else(|| TxReject::malformed("report tx missing report data"))?;
    let block_data = branch_data
        .get_branch_block_data(&data.reported_block_hash)
        .ok_or_else(|| TxReject::missing("Can not found block data in mapHeads"))?;
    if branch_data.height() < block_data.height {
        return Err(TxReject::missing(format!(
            "Report block height larger than branchdata height, chainheight {}, blockheight {}",
            branch_data.height(),
            block_data.height
        )));
    }
    if branch_data.height() - block_data.height > REDEEM_SAFE_HEIGHT {
        return Err(TxReject::missing(format!(
            "Report block too old, chainheight {}, blockheight {}",
            branch_data.height(),
            block_data.height
        )));
    }
    Ok(())
}

/// Verify a report tx of any kind
pub fn check_report_cheat_tx(tx: &Transaction, db: &BranchDb) -> TxResult {
    if !tx.is_report() {
        return Ok(());
    }
    let data = tx
        .report_data
        .as_ref()
        .ok_or_else(|| TxReject::malformed("report tx missing report data"))?;

    let branch_data = db
        .get_branch_data(&data.reported_branch_id)
        .ok_or_else(|| TxReject::missing("CheckReportCheatTx branchid error"))?;

    match data.report_type {
        ReportType::Tx | ReportType::Coinbase => {
            let spv = tx
                .spv_proof
                .as_ref()
                .ok_or_else(|| TxReject::malformed("report tx missing spv proof"))?;
            let block_data = branch_data
                .get_branch_block_data(&spv.block_hash)
                .ok_or_else(|| TxReject::spv_soft("report spv block unknown"))?;
            if check_spv_proof(&block_data.header.hash_merkle_root, &spv.pmt, &data.reported_tx_hash)
                .is_none()
            {
                return Err(TxReject::spv("report spv check fail"));
            }
            check_report_tx_commonly(tx, branch_data)
        }
        ReportType::MerkleTree => check_report_tx_commonly(tx, branch_data),
        ReportType::ContractData => {
            if !check_prove_contract_data(tx, db) {
                return Err(TxReject::missing("CheckProveContractData fail"));
            }
            Ok(())
        }
    }
}

/// Re-validate a proved tx against its per-input evidence
///
/// Returns the fee the tx paid. `jump_first` skips the leading item of
/// `prove_items`, which a tx-prove spends on the proved tx itself.
pub fn check_transaction_prove_with_prove_data(
    prove_tx: &Transaction,
    prove_items: &[ProveDataItem],
    branch_data: &BranchData,
    jump_first: bool,
) -> TxResult<Amount> {
    if prove_tx.is_coinbase() {
        return Err(TxReject::missing("Prove tx can not a coinbase transaction"));
    }

    let base_index = if jump_first { 1 } else { 0 };
    if prove_items.len() != prove_tx.vin.len() + base_index {
        return Err(TxReject::missing("vectProveData size invalid for prove each input"));
    }

    let contract_script = prove_tx.contract_addr.as_ref().map(make_contract_script);
    let mut in_amount: Amount = 0;
    let mut contract_in: Amount = 0;

    for (i, txin) in prove_tx.vin.iter().enumerate() {
        let item = &prove_items[i + base_index];
        if branch_data.get_branch_block_data(&item.block_hash).is_none() {
            return Err(TxReject::missing("proveitem's block not exist"));
        }

        let prev_tx = Transaction::from_bytes(&item.tx_data)
            .map_err(|_| TxReject::malformed("prove item tx does not decode"))?;

        let block_data = branch_data
            .get_branch_block_data(&item.spv_proof.block_hash)
            .ok_or_else(|| TxReject::spv_soft("prove item spv block unknown"))?;
        if check_spv_proof(&block_data.header.hash_merkle_root, &item.spv_proof.pmt, &prev_tx.hash())
            .is_none()
        {
            return Err(TxReject::spv_soft("Check Prove ReportTx spv check fail"));
        }

        if prev_tx.hash() != txin.prevout.hash {
            return Err(TxReject::missing("Check Prove ReportTx provide tx not match"));
        }
        let Some(prev_out) = prev_tx.vout.get(txin.prevout.n as usize) else {
            return Err(TxReject::missing("Check Prove ReportTx prevout index out of range"));
        };

        let script_pubkey = &prev_out.script_pubkey;
        in_amount += prev_out.value;

        if is_contract_script(script_pubkey) {
            if Some(script_pubkey) != contract_script.as_ref() {
                return Err(TxReject::missing("Invalid contract inpoint"));
            }
            contract_in += prev_out.value;
        }

        if !verify_input(script_pubkey, prove_tx, i) {
            // Contract-held value moves without a user signature, but
            // only into the tx's own contract
            let exempt = prove_tx.is_call_contract()
                && match get_contract_addr(script_pubkey) {
                    Some(contract_id) => Some(contract_id) == prove_tx.contract_addr,
                    None => {
                        return Err(TxReject::missing(
                            "check smartcontract sign fail, contract addr fail",
                        ))
                    }
                };
            if !exempt {
                return Err(TxReject::bad_signature("CheckProveReportTx scriptcheck fail"));
            }
        }
    }

    let mut value_out: Amount = 0;
    let mut contract_out: Amount = 0;
    for txout in &prove_tx.vout {
        if txout.value < 0 {
            return Err(TxReject::malformed("CheckProveReportTx bad-txns-vout-negative"));
        }
        if txout.value > MAX_MONEY {
            return Err(TxReject::malformed("CheckProveReportTx bad-txns-vout-toolarge"));
        }
        value_out += txout.value;
        if !money_range(value_out) {
            return Err(TxReject::malformed("CheckProveReportTx bad-txns-txouttotal-toolarge"));
        }

        if is_contract_change_script(&txout.script_pubkey) {
            match get_contract_addr(&txout.script_pubkey) {
                Some(contract_id) if Some(contract_id) == prove_tx.contract_addr => {}
                _ => return Err(TxReject::missing("Invalid contract out public key")),
            }
            contract_out += txout.value;
        }
    }

    if contract_in - contract_out != prove_tx.contract_out {
        return Err(TxReject::missing("Contract out not match"));
    }
    if in_amount < value_out {
        return Err(TxReject::malformed("value in/out error"));
    }

    Ok(in_amount - value_out)
}

/// Verify a prove of a single reported tx
pub fn check_prove_report_tx(tx: &Transaction, db: &BranchDb, vm_pool: &ContractVmPool) -> TxResult {
    if !tx.is_prove() {
        return Err(TxReject::malformed("not a prove tx"));
    }
    let data = tx
        .prove_data
        .as_ref()
        .ok_or_else(|| TxReject::malformed("prove tx missing prove data"))?;
    if data.prove_type != ReportType::Tx {
        return Err(TxReject::malformed("prove type is not report-tx"));
    }

    let branch_data = db
        .get_branch_data(&data.branch_id)
        .ok_or_else(|| TxReject::missing("prove tx branch unknown"))?;

    if data.vect_prove_data.is_empty() {
        return Err(TxReject::missing("vectProveData size invalid can not zero"));
    }

    let prove_tx = Transaction::from_bytes(&data.vect_prove_data[0].tx_data)
        .map_err(|_| TxReject::malformed("prove tx data does not decode"))?;
    if prove_tx.hash() != data.tx_hash {
        return Err(TxReject::missing("Prove tx data error, first tx's hash is not eq proved txid"));
    }

    let block_data = branch_data
        .get_branch_block_data(&data.vect_prove_data[0].spv_proof.block_hash)
        .ok_or_else(|| TxReject::spv_soft("prove spv block unknown"))?;
    if check_spv_proof(
        &block_data.header.hash_merkle_root,
        &data.vect_prove_data[0].spv_proof.pmt,
        &prove_tx.hash(),
    )
    .is_none()
    {
        return Err(TxReject::spv_soft("Check Prove ReportTx spv check fail"));
    }

    check_transaction_prove_with_prove_data(&prove_tx, &data.vect_prove_data, branch_data, true)?;

    if prove_tx.is_smart_contract()
        && !check_prove_smart_contract(data, &prove_tx, block_data, vm_pool)
    {
        return Err(TxReject::missing("smart contract prove fail"));
    }

    Ok(())
}

/// Verify a prove of a coinbase or of the whole merkle tree
///
/// The prover ships the entire block tx list; the list must rebuild the
/// committed merkle root and every non-coinbase tx must re-validate,
/// with the coinbase collecting exactly the fees (branches mint no
/// subsidy).
pub fn check_prove_coinbase_tx(tx: &Transaction, db: &BranchDb) -> TxResult {
    if !tx.is_prove() {
        return Err(TxReject::malformed("not a prove tx"));
    }
    let data = tx
        .prove_data
        .as_ref()
        .ok_or_else(|| TxReject::malformed("prove tx missing prove data"))?;
    if !matches!(data.prove_type, ReportType::Coinbase | ReportType::MerkleTree) {
        return Err(TxReject::malformed("prove type is not coinbase or merkle tree"));
    }

    let branch_data = db
        .get_branch_data(&data.branch_id)
        .ok_or_else(|| TxReject::missing("prove coinbase tx no branchid data"))?;
    let block_data = branch_data
        .get_branch_block_data(&data.block_hash)
        .ok_or_else(|| TxReject::missing("prove coinbase tx no block data"))?;

    let vtx: Vec<Transaction> = bincode::deserialize(&data.vtx_data)
        .map_err(|_| TxReject::malformed("prove vtx data does not decode"))?;
    if vtx.len() < 2 {
        return Err(TxReject::malformed("invalid vtx size"));
    }
    if data.prove_type == ReportType::Coinbase && vtx[0].hash() != data.tx_hash {
        return Err(TxReject::malformed("coinbase tx is eq txHash"));
    }
    if data.prove_type == ReportType::MerkleTree && !data.tx_hash.is_zero() {
        return Err(TxReject::malformed("merkle poof txhash is invalid,must null"));
    }

    let mut mutated = false;
    let leaves: Vec<Hash> = vtx.iter().map(|t| t.hash()).collect();
    let merkle_root = crate::crypto::compute_merkle_root(&leaves, Some(&mut mutated));
    if block_data.header.hash_merkle_root != merkle_root {
        return Err(TxReject::malformed("Invalid merkle tree for vtx"));
    }
    if mutated {
        return Err(TxReject::malformed("duplicate transaction in vtx"));
    }

    if vtx.len() != data.vec_block_tx_prove.len() + 2 {
        return Err(TxReject::malformed("provide vecblocktxprove size invalid"));
    }

    let mut total_fee: Amount = 0;
    for (i, to_prove) in vtx.iter().enumerate().skip(2) {
        let fee = check_transaction_prove_with_prove_data(
            to_prove,
            &data.vec_block_tx_prove[i - 2],
            branch_data,
            false,
        )?;
        total_fee += fee;
    }

    // Branch blocks collect fees only
    if vtx[0].value_out() != total_fee {
        return Err(TxReject::malformed("Prove coinbase transaction fail, fee invalid"));
    }

    Ok(())
}

/// Verify a prove tx of any kind
pub fn check_prove_tx(tx: &Transaction, db: &BranchDb, vm_pool: &ContractVmPool) -> TxResult {
    if !tx.is_prove() {
        return Ok(());
    }
    let data = tx
        .prove_data
        .as_ref()
        .ok_or_else(|| TxReject::malformed("prove tx missing prove data"))?;
    match data.prove_type {
        ReportType::Tx => check_prove_report_tx(tx, db, vm_pool),
        ReportType::Coinbase | ReportType::MerkleTree => check_prove_coinbase_tx(tx, db),
        ReportType::ContractData => Err(TxReject::missing("Invalid report type")),
    }
}

/// Verify a report-reward tx claiming a slashed collateral
///
/// Valid only on the main chain, only after the report has sat unproved
/// for `REPORT_OUTOF_HEIGHT` blocks, and only when it pays at least
/// half the stake to the reporter's own address.
pub fn check_report_reward_transaction(
    tx: &Transaction,
    db: &BranchDb,
    index: &dyn MainChainTxIndex,
    connect_height: u64,
    this_chain: &ChainParams,
) -> TxResult {
    if !tx.is_report_reward() {
        return Err(TxReject::malformed("not a report reward tx"));
    }
    if !this_chain.is_main_chain() {
        return Err(TxReject::malformed("mainchain-not-accept-reportreward-tx"));
    }

    let report_txid = tx
        .report_txid
        .ok_or_else(|| TxReject::malformed("report reward tx missing reporttxid"))?;
    let (report_tx, report_block_hash) = index
        .read_tx_data(&report_txid)
        .ok_or_else(|| TxReject::missing("report tx not found"))?;

    if !report_tx.is_report() {
        return Err(TxReject::malformed("invalid-report-tx"));
    }
    let report_data = report_tx
        .report_data
        .as_ref()
        .ok_or_else(|| TxReject::malformed("invalid-report-tx"))?;

    if !index.is_in_active_chain(&report_block_hash) {
        return Err(TxReject::missing("report tx not in active chain"));
    }
    let report_height = index
        .block_height(&report_block_hash)
        .ok_or_else(|| TxReject::missing("report block height unknown"))?;
    if connect_height < report_height + REPORT_OUTOF_HEIGHT {
        return Err(TxReject::malformed("Still in prove stage."));
    }

    let branch_data = db
        .get_branch_data(&report_data.reported_branch_id)
        .ok_or_else(|| TxReject::missing("reported branch unknown"))?;
    let block_data = branch_data
        .get_branch_block_data(&report_data.reported_block_hash)
        .ok_or_else(|| TxReject::missing("reported block unknown"))?;

    // The report must still stand: present and not proved away
    let report_key = get_report_tx_hash_key(&report_tx)
        .ok_or_else(|| TxReject::malformed("invalid-report-tx"))?;
    match block_data.report_status.get(&report_key) {
        Some(ReportFlag::Reported) => {}
        _ => return Err(TxReject::missing("report not outstanding")),
    }

    // The reward spends the mortgage the cheating block staked
    let stake_vout = block_data
        .stake_tx
        .vout
        .first()
        .ok_or_else(|| TxReject::malformed("invalid-stake-pubkey"))?;
    let (coin_from_txid, _, _) = get_mortgage_coin_data(&stake_vout.script_pubkey)
        .ok_or_else(|| TxReject::malformed("invalid-stake-pubkey"))?;
    let first_in = tx
        .vin
        .first()
        .ok_or_else(|| TxReject::malformed("Invalid-report-reward-input"))?;
    if first_in.prevout.hash != coin_from_txid || first_in.prevout.n != 0 {
        return Err(TxReject::malformed("Invalid-report-reward-input"));
    }

    let value_in = stake_vout.value;
    let reporter_script = &report_tx.vout.first()
        .ok_or_else(|| TxReject::malformed("report tx has no outputs"))?
        .script_pubkey;
    let reporter_value = value_in / 2;

    let first_out = tx
        .vout
        .first()
        .ok_or_else(|| TxReject::malformed("vout[0]-must-to-reporter"))?;
    if &first_out.script_pubkey != reporter_script {
        return Err(TxReject::malformed("vout[0]-must-to-reporter"));
    }
    if first_out.value < reporter_value {
        return Err(TxReject::malformed("invalid-reporter-out-value"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;
    use crate::validation::{ProveData, ReportData, TxVersion};

    fn report_tx(kind: ReportType, branch: Hash, block: Hash, txh: Hash) -> Transaction {
        let mut tx = Transaction::default();
        tx.version = TxVersion::Report;
        tx.report_data = Some(Box::new(ReportData {
            report_type: kind,
            reported_branch_id: branch,
            reported_block_hash: block,
            reported_tx_hash: txh,
            contract_data: None,
        }));
        tx
    }

    fn prove_tx(kind: ReportType, branch: Hash, block: Hash, txh: Hash) -> Transaction {
        let mut tx = Transaction::default();
        tx.version = TxVersion::Prove;
        tx.prove_data = Some(Box::new(ProveData {
            prove_type: kind,
            branch_id: branch,
            block_hash: block,
            tx_hash: txh,
            vtx_data: Vec::new(),
            vect_prove_data: Vec::new(),
            vec_block_tx_prove: Vec::new(),
            contract_data: None,
        }));
        tx
    }

    #[test]
    fn test_report_and_prove_keys_match() {
        let branch = hash_bytes(b"branch");
        let block = hash_bytes(b"block");
        let txh = hash_bytes(b"bad-tx");

        for kind in [ReportType::Tx, ReportType::Coinbase, ReportType::MerkleTree] {
            let report = report_tx(kind, branch, block, txh);
            let prove = prove_tx(kind, branch, block, txh);
            assert_eq!(
                get_report_tx_hash_key(&report).unwrap(),
                get_prove_tx_hash_key(&prove).unwrap(),
                "kind {:?}",
                kind
            );
        }
    }

    #[test]
    fn test_keys_differ_across_kinds_and_targets() {
        let branch = hash_bytes(b"branch");
        let block = hash_bytes(b"block");
        let txh = hash_bytes(b"bad-tx");

        let a = get_report_tx_hash_key(&report_tx(ReportType::Tx, branch, block, txh)).unwrap();
        let b = get_report_tx_hash_key(&report_tx(ReportType::Coinbase, branch, block, txh)).unwrap();
        assert_ne!(a, b);

        let c = get_report_tx_hash_key(&report_tx(ReportType::Tx, branch, block, hash_bytes(b"other")))
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_only_for_matching_kind() {
        let tx = Transaction::default();
        assert_eq!(get_report_tx_hash_key(&tx), None);
        assert_eq!(get_prove_tx_hash_key(&tx), None);
    }
}
