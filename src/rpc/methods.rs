//! RPC Method Implementations
//!
//! The six cross-chain methods peer nodes call on each other. Local
//! verification runs under the context lock; peer-chain evidence is
//! fetched with the lock released and the duplicate guard re-checked
//! before committing.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::branch::{
    check_branch_duplicate_tx, check_branch_transaction_local, check_branch_transaction_remote,
    check_branch_block_info_tx, check_redeem_mortgage, make_branch_trans_step2_tx,
    mine_coin_outpoint_hash,
};
use crate::crypto::{Hash, SpvProof};
use crate::node::{ChainCtx, MemoryTxIndex};
use crate::rpc::{BranchChainMan, RpcBridge};
use crate::validation::{BranchId, Transaction};

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: serde_json::Value,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
    pub id: serde_json::Value,
}

/// JSON-RPC Error
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: serde_json::Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

/// RPC Handler State
pub struct NodeState {
    pub ctx: Mutex<ChainCtx>,
    pub chain_man: Arc<Mutex<BranchChainMan>>,
    /// This chain's own confirmed txs, served to peers
    pub tx_index: Mutex<MemoryTxIndex>,
    /// This chain's tip height
    pub chain_height: AtomicU64,
}

impl NodeState {
    fn bridge(&self) -> RpcBridge {
        RpcBridge::new(Arc::clone(&self.chain_man))
    }

    fn confirmations(&self, block_height: u64) -> u64 {
        self.chain_height.load(Ordering::SeqCst).saturating_sub(block_height) + 1
    }
}

fn adjusted_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn param_str(params: &Option<serde_json::Value>, index: usize) -> Option<String> {
    match params {
        Some(serde_json::Value::Array(arr)) => {
            arr.get(index).and_then(|v| v.as_str()).map(|s| s.to_string())
        }
        Some(serde_json::Value::String(s)) if index == 0 => Some(s.clone()),
        _ => None,
    }
}

/// Process a JSON-RPC request and return a response
pub fn handle_request(state: &NodeState, request: JsonRpcRequest) -> JsonRpcResponse {
    match request.method.as_str() {
        "makebranchtransaction" => make_branch_transaction(state, request.id, request.params),
        "getbranchchaintransaction" => get_branch_chain_transaction(state, request.id, request.params),
        "submitbranchblockinfo" => submit_branch_block_info(state, request.id, request.params),
        "redeemmortgagecoin" => redeem_mortgage_coin(state, request.id, request.params),
        "getreporttxdata" => get_report_or_prove_tx_data(state, request.id, request.params, true),
        "getprovetxdata" => get_report_or_prove_tx_data(state, request.id, request.params, false),
        _ => JsonRpcResponse::error(
            request.id,
            -32601,
            format!("Method not found: {}", request.method),
        ),
    }
}

/// Accept a forwarded pregnant tx and admit the derived step-2
fn make_branch_transaction(
    state: &NodeState,
    id: serde_json::Value,
    params: Option<serde_json::Value>,
) -> JsonRpcResponse {
    let Some(tx_hex) = param_str(&params, 0) else {
        return JsonRpcResponse::error(id, -32602, "Invalid params: expected tx hex".into());
    };
    let Some(mut step1) = Transaction::from_hex(&tx_hex) else {
        return JsonRpcResponse::error(id, -22, "TX decode failed".into());
    };
    if !step1.is_pregnant() {
        return JsonRpcResponse::error(id, -8, "tx no a branch chain transaction".into());
    }
    // The sender rides the inclusion proof on the forwarded copy; peel
    // it off so the step-1 hashes as its home chain knows it
    let spv = step1.spv_proof.take().map(|boxed| *boxed);

    // Local half under the lock; copy what the remote half needs
    let (step2, from_branch, from_txid) = {
        let ctx = match state.ctx.lock() {
            Ok(ctx) => ctx,
            Err(_) => return JsonRpcResponse::error(id, -1, "context lock poisoned".into()),
        };
        let step2 = match make_branch_trans_step2_tx(&step1, &ctx.params, spv) {
            Ok(step2) => step2,
            Err(reject) => return JsonRpcResponse::error(id, -25, reject.to_string()),
        };
        let from_tx = match check_branch_transaction_local(&step2, &ctx.params) {
            Ok(from_tx) => from_tx,
            Err(reject) => return JsonRpcResponse::error(id, -25, reject.to_string()),
        };
        if let Err(reject) = check_branch_duplicate_tx(&step2, None, &ctx.db) {
            return JsonRpcResponse::error(id, -27, reject.to_string());
        }
        let from_branch = step2.from_branch_id.unwrap_or(BranchId::Main);
        (step2, from_branch, from_tx.hash())
    };

    // Remote half with the lock released
    let have_config = state
        .chain_man
        .lock()
        .map(|man| man.get_rpc_config(&from_branch).map(|c| c.is_valid()).unwrap_or(false))
        .unwrap_or(false);
    if have_config {
        let bridge = state.bridge();
        if let Err(reject) = check_branch_transaction_remote(&from_branch, &from_txid, &bridge) {
            return JsonRpcResponse::error(id, -26, reject.to_string());
        }
    } else {
        let ctx = match state.ctx.lock() {
            Ok(ctx) => ctx,
            Err(_) => return JsonRpcResponse::error(id, -1, "context lock poisoned".into()),
        };
        if !(ctx.params.is_main_chain() && ctx.uncheck_no_config_branch) {
            return JsonRpcResponse::error(
                id,
                -26,
                format!("can not found branch rpc config for {}", from_branch),
            );
        }
    }

    // Re-acquire and re-verify the dedup invariant before committing
    let mut ctx = match state.ctx.lock() {
        Ok(ctx) => ctx,
        Err(_) => return JsonRpcResponse::error(id, -1, "context lock poisoned".into()),
    };
    if let Err(reject) = check_branch_duplicate_tx(&step2, None, &ctx.db) {
        return JsonRpcResponse::error(id, -27, reject.to_string());
    }
    if let Err(reject) = ctx.apply_tx(&step2) {
        return JsonRpcResponse::error(id, -1, reject.to_string());
    }
    JsonRpcResponse::success(id, serde_json::json!("ok"))
}

/// Serve one of this chain's txs with its confirmation depth
fn get_branch_chain_transaction(
    state: &NodeState,
    id: serde_json::Value,
    params: Option<serde_json::Value>,
) -> JsonRpcResponse {
    let Some(txid_hex) = param_str(&params, 0) else {
        return JsonRpcResponse::error(id, -32602, "Invalid params: expected txid".into());
    };
    let Ok(txid) = Hash::from_hex(&txid_hex) else {
        return JsonRpcResponse::error(id, -8, "invalid txid".into());
    };

    let index = match state.tx_index.lock() {
        Ok(index) => index,
        Err(_) => return JsonRpcResponse::error(id, -1, "tx index lock poisoned".into()),
    };
    use crate::branch::MainChainTxIndex;
    let Some((tx, block_hash)) = index.read_tx_data(&txid) else {
        return JsonRpcResponse::error(id, -5, "No such transaction".into());
    };
    let confirmations = index
        .block_height(&block_hash)
        .map(|height| state.confirmations(height))
        .unwrap_or(0);

    JsonRpcResponse::success(
        id,
        serde_json::json!({
            "hex": tx.to_hex(),
            "confirmations": confirmations,
        }),
    )
}

/// Main chain: accept a branch header submission
fn submit_branch_block_info(
    state: &NodeState,
    id: serde_json::Value,
    params: Option<serde_json::Value>,
) -> JsonRpcResponse {
    let Some(tx_hex) = param_str(&params, 0) else {
        return JsonRpcResponse::error(id, -32602, "Invalid params: expected tx hex".into());
    };
    let Some(tx) = Transaction::from_hex(&tx_hex) else {
        return JsonRpcResponse::error(id, -22, "TX decode failed".into());
    };

    let mut ctx = match state.ctx.lock() {
        Ok(ctx) => ctx,
        Err(_) => return JsonRpcResponse::error(id, -1, "context lock poisoned".into()),
    };
    if !ctx.params.is_main_chain() {
        return JsonRpcResponse::error(id, -8, "only the main chain accepts branch headers".into());
    }
    if let Err(reject) = check_branch_duplicate_tx(&tx, None, &ctx.db) {
        return JsonRpcResponse::success(
            id,
            serde_json::json!({ "commit_reject_reason": reject.to_string() }),
        );
    }
    if let Err(reject) = check_branch_block_info_tx(&tx, &ctx.db, None, adjusted_time()) {
        return JsonRpcResponse::success(
            id,
            serde_json::json!({ "commit_reject_reason": reject.to_string() }),
        );
    }
    if let Err(reject) = ctx.apply_tx(&tx) {
        return JsonRpcResponse::error(id, -1, reject.to_string());
    }
    JsonRpcResponse::success(id, serde_json::json!({}))
}

/// Main chain: accept a branch's mortgage redemption
fn redeem_mortgage_coin(
    state: &NodeState,
    id: serde_json::Value,
    params: Option<serde_json::Value>,
) -> JsonRpcResponse {
    let (Some(coin_txid_hex), Some(tx_hex), Some(branch_id_str), Some(spv_hex)) = (
        param_str(&params, 0),
        param_str(&params, 2),
        param_str(&params, 3),
        param_str(&params, 4),
    ) else {
        return JsonRpcResponse::error(id, -32602, "Invalid params for redeemmortgagecoin".into());
    };

    let Ok(coin_txid) = Hash::from_hex(&coin_txid_hex) else {
        return JsonRpcResponse::error(id, -8, "invalid coin txid".into());
    };
    let Some(statement_tx) = Transaction::from_hex(&tx_hex) else {
        return JsonRpcResponse::error(id, -22, "TX decode failed".into());
    };
    let Ok(BranchId::Branch(branch_hash)) = branch_id_str.parse::<BranchId>() else {
        return JsonRpcResponse::error(id, -8, "invalid branch id".into());
    };
    let Some(spv) = SpvProof::from_hex(&spv_hex) else {
        return JsonRpcResponse::error(id, -22, "SPV proof decode failed".into());
    };

    let ctx = match state.ctx.lock() {
        Ok(ctx) => ctx,
        Err(_) => return JsonRpcResponse::error(id, -1, "context lock poisoned".into()),
    };
    match check_redeem_mortgage(&coin_txid, &statement_tx, &spv, &branch_hash, &ctx.db) {
        Ok(()) => JsonRpcResponse::success(id, serde_json::json!("ok")),
        Err(reject) => JsonRpcResponse::error(id, -25, reject.to_string()),
    }
}

/// Serve a report (or prove) tx plus the mine-coin linkage hash
fn get_report_or_prove_tx_data(
    state: &NodeState,
    id: serde_json::Value,
    params: Option<serde_json::Value>,
    is_report: bool,
) -> JsonRpcResponse {
    let Some(txid_hex) = param_str(&params, 0) else {
        return JsonRpcResponse::error(id, -32602, "Invalid params: expected txid".into());
    };
    let Ok(txid) = Hash::from_hex(&txid_hex) else {
        return JsonRpcResponse::error(id, -8, "invalid txid".into());
    };

    let (tx, block_hash) = {
        let index = match state.tx_index.lock() {
            Ok(index) => index,
            Err(_) => return JsonRpcResponse::error(id, -1, "tx index lock poisoned".into()),
        };
        use crate::branch::MainChainTxIndex;
        match index.read_tx_data(&txid) {
            Some(found) => found,
            None => return JsonRpcResponse::error(id, -5, "No such transaction".into()),
        }
    };

    // Locate the reported branch block whose stake spends the mine coin
    let (branch_hash, block) = if is_report {
        match &tx.report_data {
            Some(data) if tx.is_report() => (data.reported_branch_id, data.reported_block_hash),
            _ => return JsonRpcResponse::error(id, -8, "tx is not a report".into()),
        }
    } else {
        match &tx.prove_data {
            Some(data) if tx.is_prove() => (data.branch_id, data.block_hash),
            _ => return JsonRpcResponse::error(id, -8, "tx is not a prove".into()),
        }
    };

    let ctx = match state.ctx.lock() {
        Ok(ctx) => ctx,
        Err(_) => return JsonRpcResponse::error(id, -1, "context lock poisoned".into()),
    };
    let coin_hash = ctx
        .db
        .get_branch_data(&branch_hash)
        .and_then(|data| data.get_branch_block_data(&block))
        .and_then(|block_data| block_data.stake_tx.vin.first().map(|vin| vin.prevout))
        .map(|prevout| mine_coin_outpoint_hash(&prevout));
    let Some(coin_hash) = coin_hash else {
        return JsonRpcResponse::error(id, -5, "reported block or stake unknown".into());
    };

    let confirmations = {
        let index = match state.tx_index.lock() {
            Ok(index) => index,
            Err(_) => return JsonRpcResponse::error(id, -1, "tx index lock poisoned".into()),
        };
        use crate::branch::MainChainTxIndex;
        index
            .block_height(&block_hash)
            .map(|height| state.confirmations(height))
            .unwrap_or(0)
    };

    JsonRpcResponse::success(
        id,
        serde_json::json!({
            "txhex": tx.to_hex(),
            "confirmations": confirmations,
            "preminecoinvouthash": coin_hash.to_hex(),
        }),
    )
}
