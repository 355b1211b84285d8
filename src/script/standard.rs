//! Standard script shapes
//!
//! Builders and parsers for every script shape the cross-chain core
//! recognizes. The shapes are bit-exact consensus: parsers walk the ops
//! in order and fail on any deviation, including a wrong-width push.
//!
//! Collateral shapes all end in the same pay-to-key-id tail:
//! `OP_2DROP OP_DUP OP_HASH160 <keyid:20> OP_EQUALVERIFY OP_CHECKSIG`.

use super::opcodes::*;
use super::script::{Script, ScriptIter, ScriptOp};
use crate::crypto::{Hash, KeyId};

/// Kind of branch collateral script, by leading opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchScriptType {
    Invalid,
    MortgageMine,
    MortgageCoin,
}

/// Classify a script by its first op only (cheap pre-dispatch)
pub fn quick_get_branch_script_type(script: &Script) -> BranchScriptType {
    match script.ops().next() {
        Some(ScriptOp::Op(OP_MINE_BRANCH_MORTGAGE)) => BranchScriptType::MortgageMine,
        Some(ScriptOp::Op(OP_MINE_BRANCH_COIN)) => BranchScriptType::MortgageCoin,
        _ => BranchScriptType::Invalid,
    }
}

/// `OP_DUP OP_HASH160 <keyid:20> OP_EQUALVERIFY OP_CHECKSIG`
pub fn make_p2pkh_script(keyid: &KeyId) -> Script {
    Script::new()
        .push_op(OP_DUP)
        .push_op(OP_HASH160)
        .push_data(&keyid.0)
        .push_op(OP_EQUALVERIFY)
        .push_op(OP_CHECKSIG)
}

/// Extract the key id from a plain pay-to-key-id script
pub fn get_p2pkh_keyid(script: &Script) -> Option<KeyId> {
    let mut ops = script.ops();
    expect_op(&mut ops, OP_DUP)?;
    p2pkh_tail_keyid(&mut ops)
}

/// Consume `OP_HASH160 <keyid> OP_EQUALVERIFY OP_CHECKSIG` after OP_DUP
fn p2pkh_tail_keyid(ops: &mut ScriptIter<'_>) -> Option<KeyId> {
    expect_op(ops, OP_HASH160)?;
    let keyid = expect_push(ops, 20)?;
    expect_op(ops, OP_EQUALVERIFY)?;
    expect_op(ops, OP_CHECKSIG)?;
    if ops.next().is_some() {
        return None;
    }
    let mut arr = [0u8; 20];
    arr.copy_from_slice(keyid);
    Some(KeyId(arr))
}

/// Consume the shared collateral tail and return its key id
fn collateral_tail_keyid(ops: &mut ScriptIter<'_>) -> Option<KeyId> {
    expect_op(ops, OP_2DROP)?;
    expect_op(ops, OP_DUP)?;
    p2pkh_tail_keyid(ops)
}

/// Mortgage collateral vout on the main chain:
/// `OP_MINE_BRANCH_MORTGAGE <branchHash:32> <height> OP_2DROP <tail>`
pub fn make_mortgage_mine_script(branch_hash: &Hash, height: i64, keyid: &KeyId) -> Script {
    Script::new()
        .push_op(OP_MINE_BRANCH_MORTGAGE)
        .push_data(&branch_hash.0)
        .push_num(height)
        .push_op(OP_2DROP)
        .push_op(OP_DUP)
        .push_op(OP_HASH160)
        .push_data(&keyid.0)
        .push_op(OP_EQUALVERIFY)
        .push_op(OP_CHECKSIG)
}

/// Parse a mortgage collateral script into (branch hash, height, key id)
pub fn get_mortgage_mine_data(script: &Script) -> Option<(Hash, i64, KeyId)> {
    let mut ops = script.ops();
    expect_op(&mut ops, OP_MINE_BRANCH_MORTGAGE)?;
    let branch_hash = expect_hash(&mut ops)?;
    let height = expect_num(&mut ops)?;
    let keyid = collateral_tail_keyid(&mut ops)?;
    Some((branch_hash, height, keyid))
}

/// Mine-coin vout on the branch:
/// `OP_MINE_BRANCH_COIN <fromTxId:32> <height> OP_2DROP <tail>`
pub fn make_mortgage_coin_script(from_txid: &Hash, height: i64, keyid: &KeyId) -> Script {
    Script::new()
        .push_op(OP_MINE_BRANCH_COIN)
        .push_data(&from_txid.0)
        .push_num(height)
        .push_op(OP_2DROP)
        .push_op(OP_DUP)
        .push_op(OP_HASH160)
        .push_data(&keyid.0)
        .push_op(OP_EQUALVERIFY)
        .push_op(OP_CHECKSIG)
}

/// Parse a mine-coin script into (mortgage txid, height, key id)
pub fn get_mortgage_coin_data(script: &Script) -> Option<(Hash, i64, KeyId)> {
    let mut ops = script.ops();
    expect_op(&mut ops, OP_MINE_BRANCH_COIN)?;
    let from_txid = expect_hash(&mut ops)?;
    let height = expect_num(&mut ops)?;
    let keyid = collateral_tail_keyid(&mut ops)?;
    Some((from_txid, height, keyid))
}

/// Redeem statement marker: `OP_RETURN OP_REDEEM_MORTGAGE <fromTxId:32>`
pub fn make_redeem_mortgage_script(from_txid: &Hash) -> Script {
    Script::new()
        .push_op(OP_RETURN)
        .push_op(OP_REDEEM_MORTGAGE)
        .push_data(&from_txid.0)
}

/// Parse a redeem statement marker into the mortgage txid
pub fn get_redeem_script_data(script: &Script) -> Option<Hash> {
    let mut ops = script.ops();
    expect_op(&mut ops, OP_RETURN)?;
    expect_op(&mut ops, OP_REDEEM_MORTGAGE)?;
    expect_hash(&mut ops)
}

/// Step-1 vout sending value to a branch: `OP_TRANS_BRANCH <branchHash:32>`
pub fn make_trans_branch_script(branch_hash: &Hash) -> Script {
    Script::new().push_op(OP_TRANS_BRANCH).push_data(&branch_hash.0)
}

/// Step-1 vout sending value back to the main chain: `OP_RETURN OP_TRANS_BRANCH`
pub fn make_trans_main_script() -> Script {
    Script::new().push_op(OP_RETURN).push_op(OP_TRANS_BRANCH)
}

/// Branch-create locked vout: `OP_CREATE_BRANCH <seed:32>`
pub fn make_create_branch_script(seed: &Hash) -> Script {
    Script::new().push_op(OP_CREATE_BRANCH).push_data(&seed.0)
}

/// Recharge vout minted on the branch by an accepted step-2:
/// `OP_TRANS_BRANCH <step1TxId:32> OP_DROP OP_DUP OP_HASH160 <keyid:20> OP_EQUALVERIFY OP_CHECKSIG`
pub fn make_coin_branch_trans_script(step1_txid: &Hash, keyid: &KeyId) -> Script {
    Script::new()
        .push_op(OP_TRANS_BRANCH)
        .push_data(&step1_txid.0)
        .push_op(OP_DROP)
        .push_op(OP_DUP)
        .push_op(OP_HASH160)
        .push_data(&keyid.0)
        .push_op(OP_EQUALVERIFY)
        .push_op(OP_CHECKSIG)
}

/// Parse a recharge vout into (step-1 txid, key id)
pub fn get_coin_branch_trans_data(script: &Script) -> Option<(Hash, KeyId)> {
    let mut ops = script.ops();
    expect_op(&mut ops, OP_TRANS_BRANCH)?;
    let step1_txid = expect_hash(&mut ops)?;
    expect_op(&mut ops, OP_DROP)?;
    expect_op(&mut ops, OP_DUP)?;
    let keyid = p2pkh_tail_keyid(&mut ops)?;
    Some((step1_txid, keyid))
}

/// Recognize the branch recharge shape exactly
pub fn is_coin_branch_trans_script(script: &Script) -> bool {
    let mut ops = script.ops();
    if expect_op(&mut ops, OP_TRANS_BRANCH).is_none() {
        return false;
    }
    if expect_hash(&mut ops).is_none() {
        return false;
    }
    if expect_op(&mut ops, OP_DROP).is_none() {
        return false;
    }
    if expect_op(&mut ops, OP_DUP).is_none() {
        return false;
    }
    p2pkh_tail_keyid(&mut ops).is_some()
}

/// Contract-held output: `OP_CONTRACT <contractId:20>`
pub fn make_contract_script(contract_id: &KeyId) -> Script {
    Script::new().push_op(OP_CONTRACT).push_data(&contract_id.0)
}

/// Contract change output: `OP_CONTRACT_CHANGE <contractId:20>`
pub fn make_contract_change_script(contract_id: &KeyId) -> Script {
    Script::new().push_op(OP_CONTRACT_CHANGE).push_data(&contract_id.0)
}

/// True when the script is contract-held (either mark)
pub fn is_contract_script(script: &Script) -> bool {
    matches!(
        script.ops().next(),
        Some(ScriptOp::Op(OP_CONTRACT)) | Some(ScriptOp::Op(OP_CONTRACT_CHANGE))
    )
}

/// True for the contract change mark specifically
pub fn is_contract_change_script(script: &Script) -> bool {
    matches!(script.ops().next(), Some(ScriptOp::Op(OP_CONTRACT_CHANGE)))
}

/// Extract the contract id from either contract mark
pub fn get_contract_addr(script: &Script) -> Option<KeyId> {
    let mut ops = script.ops();
    match ops.next()? {
        ScriptOp::Op(OP_CONTRACT) | ScriptOp::Op(OP_CONTRACT_CHANGE) => {}
        _ => return None,
    }
    let data = expect_push(&mut ops, 20)?;
    let mut arr = [0u8; 20];
    arr.copy_from_slice(data);
    Some(KeyId(arr))
}

fn expect_op(ops: &mut ScriptIter<'_>, op: u8) -> Option<()> {
    match ops.next()? {
        ScriptOp::Op(found) if found == op => Some(()),
        _ => None,
    }
}

fn expect_push<'a>(ops: &mut ScriptIter<'a>, len: usize) -> Option<&'a [u8]> {
    match ops.next()? {
        ScriptOp::Push(data) if data.len() == len => Some(data),
        _ => None,
    }
}

fn expect_hash(ops: &mut ScriptIter<'_>) -> Option<Hash> {
    let data = expect_push(ops, 32)?;
    let mut arr = [0u8; 32];
    arr.copy_from_slice(data);
    Some(Hash(arr))
}

fn expect_num(ops: &mut ScriptIter<'_>) -> Option<i64> {
    match ops.next()? {
        ScriptOp::Push(data) => super::opcodes::script_num_decode(data),
        _ => None,
    }
}
