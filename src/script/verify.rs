//! Script input verification
//!
//! Every spendable shape in this chain resolves to a key id; verifying
//! an input means checking the witness `(signature, pubkey)` in the
//! script sig against that key id and the spending tx's signing hash.
//! Contract-held outputs have no key id and never verify here; the
//! call-contract exemption is applied by the caller.

use super::standard::*;
use super::script::{Script, ScriptOp};
use crate::crypto::{KeyId, PublicKey, SchnorrSignature};
use crate::validation::Transaction;

/// The key id a script pays to, for any spendable standard shape
pub fn spendable_keyid(script_pubkey: &Script) -> Option<KeyId> {
    if let Some(keyid) = get_p2pkh_keyid(script_pubkey) {
        return Some(keyid);
    }
    if let Some((_, _, keyid)) = get_mortgage_mine_data(script_pubkey) {
        return Some(keyid);
    }
    if let Some((_, _, keyid)) = get_mortgage_coin_data(script_pubkey) {
        return Some(keyid);
    }
    if let Some((_, keyid)) = get_coin_branch_trans_data(script_pubkey) {
        return Some(keyid);
    }
    None
}

/// Build the witness script sig for a signed input
pub fn make_script_sig(signature: &SchnorrSignature, pubkey: &PublicKey) -> Script {
    Script::new().push_data(&signature.0).push_data(&pubkey.0)
}

/// Parse a witness script sig into `(signature, pubkey)`
pub fn parse_script_sig(script_sig: &Script) -> Option<(SchnorrSignature, PublicKey)> {
    let mut ops = script_sig.ops();
    let sig = match ops.next()? {
        ScriptOp::Push(data) if data.len() == 64 => {
            let mut arr = [0u8; 64];
            arr.copy_from_slice(data);
            SchnorrSignature::from_bytes(&arr)
        }
        _ => return None,
    };
    let pubkey = match ops.next()? {
        ScriptOp::Push(data) if data.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(data);
            PublicKey::from_bytes(&arr).ok()?
        }
        _ => return None,
    };
    if ops.next().is_some() {
        return None;
    }
    Some((sig, pubkey))
}

/// Verify one input of `tx` against the output script it spends
pub fn verify_input(script_pubkey: &Script, tx: &Transaction, input_index: usize) -> bool {
    let Some(expected_keyid) = spendable_keyid(script_pubkey) else {
        return false;
    };
    let Some(input) = tx.vin.get(input_index) else {
        return false;
    };
    let Some((signature, pubkey)) = parse_script_sig(&input.script_sig) else {
        return false;
    };
    if pubkey.key_id() != expected_keyid {
        return false;
    }
    pubkey.verify(&tx.signing_hash(), &signature)
}
