//! Cross-chain transfer engine
//!
//! Two-phase transfers: a step-1 tx locks value on the originating
//! chain and commits (via `send_to_tx_hex_data`) to the deterministic
//! step-2 tx the destination must produce. The destination rebuilds the
//! step-2, and verification reverts it back to the committed template.

use std::collections::HashSet;

use crate::chain::{Block, ChainParams};
use crate::constants::{money_range, BRANCH_CHAIN_MATURITY};
use crate::crypto::{Hash, SpvProof};
use crate::rpc::ChainBridge;
use crate::script::{
    get_mortgage_coin_data, get_mortgage_mine_data, is_coin_branch_trans_script,
    is_contract_change_script, is_contract_script, make_coin_branch_trans_script,
    make_mortgage_coin_script, spendable_keyid, ScriptOp,
};
use crate::script::{OP_CREATE_BRANCH, OP_CONTRACT, OP_MINE_BRANCH_COIN, OP_MINE_BRANCH_MORTGAGE, OP_RETURN, OP_TRANS_BRANCH};
use crate::validation::{
    Amount, BranchId, OutPoint, Transaction, TxIn, TxReject, TxResult,
};

/// Sum of `OP_CREATE_BRANCH` outputs of a branch-create tx
pub fn get_branch_chain_create_tx_out(tx: &Transaction) -> Amount {
    if !tx.is_branch_create() {
        return 0;
    }
    let mut amount = 0;
    for txout in &tx.vout {
        if let Some(ScriptOp::Op(OP_CREATE_BRANCH)) = txout.script_pubkey.ops().next() {
            amount += txout.value;
        }
    }
    amount
}

/// The transfer amount a step-1 tx moves off this chain
pub fn get_branch_chain_trans_out(step1: &Transaction) -> Amount {
    if !step1.is_branch_chain_trans_step1() {
        return 0;
    }
    let mut amount = 0;
    for txout in &step1.vout {
        let mut ops = txout.script_pubkey.ops();
        match step1.send_to_branchid {
            Some(BranchId::Branch(branch_hash)) => {
                if let Some(ScriptOp::Op(OP_TRANS_BRANCH)) = ops.next() {
                    if let Some(ScriptOp::Push(data)) = ops.next() {
                        if data.len() == 32 && data == branch_hash.0 {
                            amount += txout.value;
                        }
                    }
                }
            }
            Some(BranchId::Main) => {
                if let Some(ScriptOp::Op(OP_RETURN)) = ops.next() {
                    if let Some(ScriptOp::Op(OP_TRANS_BRANCH)) = ops.next() {
                        amount += txout.value;
                    }
                }
            }
            None => {}
        }
    }
    amount
}

/// Collateral value in a mortgage tx, optionally counting the branch vout
pub fn get_mortgage_mine_out(tx: &Transaction, with_branch_out: bool) -> Amount {
    let mut amount = 0;
    for txout in &tx.vout {
        let mut ops = txout.script_pubkey.ops();
        match ops.next() {
            Some(ScriptOp::Op(OP_MINE_BRANCH_MORTGAGE)) => {
                amount += txout.value;
            }
            Some(ScriptOp::Op(OP_TRANS_BRANCH)) if with_branch_out => {
                if let Some(ScriptOp::Push(data)) = ops.next() {
                    if data.len() == 32
                        && tx.send_to_branchid == Some(BranchId::Branch(Hash::from_bytes({
                            let mut arr = [0u8; 32];
                            arr.copy_from_slice(data);
                            arr
                        })))
                    {
                        amount += txout.value;
                    }
                }
            }
            _ => {}
        }
    }
    amount
}

/// Mine-coin value in a tx, optionally counting the main-return vout
pub fn get_mortgage_coin_out(tx: &Transaction, with_branch_out: bool) -> Amount {
    let mut amount = 0;
    for txout in &tx.vout {
        let mut ops = txout.script_pubkey.ops();
        match ops.next() {
            Some(ScriptOp::Op(OP_MINE_BRANCH_COIN)) => {
                amount += txout.value;
            }
            Some(ScriptOp::Op(OP_RETURN)) if with_branch_out => {
                if let Some(ScriptOp::Op(OP_TRANS_BRANCH)) = ops.next() {
                    amount += txout.value;
                }
            }
            _ => {}
        }
    }
    amount
}

/// Value a pregnant tx sends to its destination chain
pub fn get_branch_chain_out(tx: &Transaction) -> Amount {
    if tx.is_branch_chain_trans_step1() {
        get_branch_chain_trans_out(tx)
    } else if tx.is_mortgage() {
        get_mortgage_mine_out(tx, true)
    } else {
        0
    }
}

/// Sum of `OP_CONTRACT` outputs
pub fn get_contract_amount_out(tx: &Transaction) -> Amount {
    let mut amount = 0;
    for txout in &tx.vout {
        if let Some(ScriptOp::Op(OP_CONTRACT)) = txout.script_pubkey.ops().next() {
            amount += txout.value;
        }
    }
    amount
}

/// Strip the destination-added fields off a tx, deterministically
///
/// Reverting a step-2 with `deep` recovers the exact template its
/// step-1 committed to; reverting a smart-contract tx drops the
/// vm-added ins/outs.
pub fn revert_transaction(tx: &Transaction, from_tx: Option<&Transaction>, deep_revert: bool) -> Transaction {
    let mut mtx = tx.clone();

    if deep_revert && tx.is_branch_chain_trans_step2() {
        mtx.from_tx.clear();
        if from_tx.map(|t| t.is_mortgage()).unwrap_or(false) {
            if let Some(vout0) = mtx.vout.first_mut() {
                vout0.script_pubkey.clear();
            }
        }
        if mtx.from_branch_id != Some(BranchId::Main) {
            mtx.spv_proof = Some(Box::new(SpvProof::default()));
        }
    }

    if tx.is_branch_chain_trans_step2() && tx.from_branch_id != Some(BranchId::Main) {
        // Recover the pool-drawing input shape and drop recharge vouts
        mtx.vin.clear();
        mtx.vin.push(TxIn {
            prevout: OutPoint { hash: Hash::zero(), n: 0 },
            script_sig: crate::script::Script::new(),
        });
        mtx.vout.retain(|txout| !is_coin_branch_trans_script(&txout.script_pubkey));
    } else if tx.is_smart_contract() {
        mtx.vin.retain(|txin| !is_contract_script(&txin.script_sig));
        mtx.vout.retain(|txout| !is_contract_change_script(&txout.script_pubkey));
    }

    mtx
}

/// Build the destination chain's step-2 from a received step-1
///
/// `spv_of_step1` is the inclusion proof the source attached; it lands
/// on the step-2 only when this chain is the main chain.
pub fn make_branch_trans_step2_tx(
    step1: &Transaction,
    dest: &ChainParams,
    spv_of_step1: Option<SpvProof>,
) -> TxResult<Transaction> {
    if !step1.is_pregnant() {
        return Err(TxReject::malformed("tx no a branch chain transaction"));
    }
    let hex_data = step1
        .send_to_tx_hex_data
        .as_ref()
        .ok_or_else(|| TxReject::malformed("pregnant tx missing sendToTxHexData"))?;
    let mut tx2 = Transaction::from_hex(hex_data)
        .ok_or_else(|| TxReject::malformed("sendToTxHexData is not a valid transaction data"))?;
    if !tx2.is_branch_chain_trans_step2() {
        return Err(TxReject::malformed("sendToTxHexData does not carry a step-2"));
    }

    tx2.from_tx = step1.to_bytes();
    tx2.in_amount = get_branch_chain_out(step1);

    if step1.is_mortgage() {
        // The template leaves vout[0] blank; the destination derives the
        // mine coin from the mortgage script
        let mortgage_vout = step1
            .vout
            .first()
            .ok_or_else(|| TxReject::malformed("mortgage tx has no outputs"))?;
        let (_, height, keyid) = get_mortgage_mine_data(&mortgage_vout.script_pubkey)
            .ok_or_else(|| TxReject::malformed("invalid mortgage mine script"))?;
        let vout0 = tx2
            .vout
            .first_mut()
            .ok_or_else(|| TxReject::malformed("step-2 template has no outputs"))?;
        vout0.script_pubkey = make_mortgage_coin_script(&step1.hash(), height, &keyid);
    }

    if tx2.from_branch_id != Some(BranchId::Main) {
        // Draw from the recharge pool, not UTXOs
        tx2.vin.clear();
        tx2.vin.push(TxIn {
            prevout: OutPoint { hash: Hash::zero(), n: 0 },
            script_sig: crate::script::Script::new(),
        });
    }

    if dest.is_main_chain() {
        tx2.spv_proof = spv_of_step1.map(Box::new);
    } else {
        // A branch destination mints recharge outputs to back the value
        // arriving from another branch; main-chain sourced templates
        // already commit their final vouts
        if tx2.from_branch_id != Some(BranchId::Main) && !step1.is_mortgage() {
            let step1_hash = step1.hash();
            let recharges: Vec<_> = tx2
                .vout
                .iter()
                .filter_map(|txout| {
                    spendable_keyid(&txout.script_pubkey)
                        .map(|keyid| (txout.value, make_coin_branch_trans_script(&step1_hash, &keyid)))
                })
                .collect();
            for (value, script_pubkey) in recharges {
                tx2.vout.push(crate::validation::TxOut { value, script_pubkey });
            }
        }
        tx2.spv_proof = Some(Box::new(SpvProof::default()));
    }

    Ok(tx2)
}

/// Local (lock-free) half of step-2 verification
///
/// Returns the decoded step-1 for the remote half.
pub fn check_branch_transaction_local(
    step2: &Transaction,
    this_chain: &ChainParams,
) -> TxResult<Transaction> {
    if !step2.is_branch_chain_trans_step2() {
        return Err(TxReject::malformed("is not a IsBranchChainTransStep2"));
    }

    let from_branch = step2
        .from_branch_id
        .ok_or_else(|| TxReject::malformed("step-2 missing fromBranchId"))?;
    if from_branch == this_chain.branch_id {
        return Err(TxReject::malformed("ctFromChain eq ctToChain"));
    }

    let from_tx = Transaction::from_bytes(&step2.from_tx)
        .map_err(|_| TxReject::malformed("step-2 fromTx does not decode"))?;

    if from_tx.is_mortgage() {
        let mortgage_vout = from_tx
            .vout
            .first()
            .ok_or_else(|| TxReject::malformed("invalid mortgage mine script"))?;
        let (_, height1, keyid1) = get_mortgage_mine_data(&mortgage_vout.script_pubkey)
            .ok_or_else(|| TxReject::malformed("invalid mortgage mine script"))?;

        if step2.vout.len() != 1 {
            return Err(TxReject::missing("invalid mortgage transaction"));
        }
        let (_, height2, keyid2) = get_mortgage_coin_data(&step2.vout[0].script_pubkey)
            .ok_or_else(|| TxReject::missing("invalid mortgage transaction"))?;
        if keyid1 != keyid2 || height1 != height2 {
            return Err(TxReject::malformed("invalid mortgage coin script"));
        }
    }

    let hex_data = from_tx
        .send_to_tx_hex_data
        .as_ref()
        .ok_or_else(|| TxReject::malformed("sendToTxHexData is not a valid transaction data"))?;
    let template = Transaction::from_hex(hex_data)
        .ok_or_else(|| TxReject::malformed("sendToTxHexData is not a valid transaction data"))?;

    let reverted = revert_transaction(step2, Some(&from_tx), true);
    if template.hash() != reverted.hash() {
        return Err(TxReject::malformed("transaction hash error"));
    }

    let amount = get_branch_chain_out(&from_tx);
    if amount != step2.in_amount || !money_range(step2.in_amount) {
        return Err(TxReject::malformed("Invalid inAmount"));
    }

    let mut original_out = step2.value_out();
    if step2.from_branch_id != Some(BranchId::Main) {
        // Recalc excluding the branch recharge mints
        original_out = step2
            .vout
            .iter()
            .filter(|txout| !is_coin_branch_trans_script(&txout.script_pubkey))
            .map(|txout| txout.value)
            .sum();
    }
    if original_out > step2.in_amount {
        return Err(TxReject::malformed("GetValueOut larger than inAmount"));
    }

    Ok(from_tx)
}

/// Remote half: fetch the step-1 from its home chain and cross-check
pub fn check_branch_transaction_remote(
    from_branch: &BranchId,
    from_tx_hash: &Hash,
    bridge: &dyn ChainBridge,
) -> TxResult {
    let fetched = bridge
        .get_branch_chain_transaction(from_branch, from_tx_hash)
        .map_err(|err| TxReject::peer_rpc(format!("RPC call getbranchchaintransaction fail: {}", err)))?;

    let fetched_tx = Transaction::from_hex(&fetched.tx_hex)
        .ok_or_else(|| TxReject::malformed("RPC call getbranchchaintransaction DecodeHexTx tx hex fail"))?;
    if fetched_tx.hash() != *from_tx_hash {
        return Err(TxReject::malformed("return transaction is not the one that i wanted"));
    }
    if fetched.confirmations < BRANCH_CHAIN_MATURITY + 1 {
        return Err(TxReject::missing("RPC confirmations not satisfy"));
    }
    Ok(())
}

/// Full step-2 verification, local checks plus the peer fetch
///
/// `skip_remote` is set during db re-verification where peer chains may
/// be unreachable; the local half remains mandatory.
pub fn check_branch_transaction(
    step2: &Transaction,
    this_chain: &ChainParams,
    bridge: &dyn ChainBridge,
    skip_remote: bool,
) -> TxResult {
    let from_tx = check_branch_transaction_local(step2, this_chain)?;
    if skip_remote {
        return Ok(());
    }
    let from_branch = step2
        .from_branch_id
        .ok_or_else(|| TxReject::malformed("step-2 missing fromBranchId"))?;
    check_branch_transaction_remote(&from_branch, &from_tx.hash(), bridge)
}

/// Forward a matured pregnant tx to its destination chain as hex,
/// attaching the step-1 SPV proof when the destination is the main chain
pub fn branch_chain_trans_step2(
    tx: &Transaction,
    block: &Block,
    this_chain: &ChainParams,
    bridge: &dyn ChainBridge,
) -> TxResult {
    if !tx.is_pregnant() {
        return Err(TxReject::malformed("tx no a branch chain transaction"));
    }
    let target = tx
        .send_to_branchid
        .ok_or_else(|| TxReject::malformed("pregnant tx missing sendToBranchid"))?;
    if target == this_chain.branch_id {
        return Err(TxReject::malformed("can not to this chain"));
    }

    let tx_hex = if target.is_main() && tx.is_branch_chain_trans_step1() {
        let mut txids = HashSet::new();
        txids.insert(tx.hash());
        let mut with_proof = tx.clone();
        with_proof.spv_proof = Some(Box::new(block.spv_proof(&txids)));
        with_proof.to_hex()
    } else {
        tx.to_hex()
    };

    bridge
        .make_branch_transaction(&target, &tx_hex)
        .map_err(|err| TxReject::peer_rpc(format!("RPC call makebranchtransaction fail: {}", err)))
}
