//! JSON-RPC client and peer-chain registry
//!
//! One HTTP POST per call, JSON-RPC 2.0 framing, Basic auth, fixed
//! 900 s timeout. The registry maps branch ids to the connection info
//! of the node serving that chain; it is read-mostly and mutated only
//! at init or through admin updates.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::crypto::Hash;
use crate::rpc::{ChainBridge, ReportProveTxData, RpcError, TxWithConfirmations};
use crate::validation::BranchId;

/// Fixed client timeout, seconds
pub const DEFAULT_HTTP_CLIENT_TIMEOUT: u64 = 900;

/// Connection info for one peer chain's node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcConfig {
    pub ip: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub wallet: String,
}

impl RpcConfig {
    pub fn is_valid(&self) -> bool {
        !self.ip.is_empty() && self.port != 0
    }

    pub fn reset(&mut self) {
        *self = RpcConfig::default();
    }
}

/// Parse one `{"branchid": ..., "ip": ..., "port": ...}` config entry
pub fn parse_rpc_config(entry: &str) -> Option<(String, RpcConfig)> {
    let value: Value = serde_json::from_str(entry).ok()?;

    let branch_id = value
        .get("branchid")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let ip = value.get("ip")?.as_str()?.to_string();
    let port = value.get("port")?.as_u64()?;
    if port == 0 || port > u16::MAX as u64 {
        return None;
    }

    let mut cfg = RpcConfig { ip, port: port as u16, ..Default::default() };
    if let Some(user) = value.get("usrname").and_then(|v| v.as_str()) {
        cfg.user = user.to_string();
    }
    if let Some(password) = value.get("password").and_then(|v| v.as_str()) {
        cfg.password = password.to_string();
    }
    if let Some(wallet) = value.get("wallet").and_then(|v| v.as_str()) {
        cfg.wallet = wallet.to_string();
    }
    Some((branch_id, cfg))
}

/// Process-wide registry of peer-chain RPC configs, keyed by branch id
#[derive(Debug, Default)]
pub struct BranchChainMan {
    configs: HashMap<String, RpcConfig>,
}

impl BranchChainMan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate from the main-chain entry and the branch entries
    pub fn init(&mut self, main_chain_cfg: Option<&str>, branch_cfgs: &[String]) {
        if let Some(entry) = main_chain_cfg {
            if let Some((_, cfg)) = parse_rpc_config(entry) {
                if cfg.is_valid() {
                    self.configs.insert(BranchId::Main.to_string(), cfg);
                }
            }
        }
        for entry in branch_cfgs {
            if let Some((branch_id, cfg)) = parse_rpc_config(entry) {
                if !branch_id.is_empty() && cfg.is_valid() {
                    self.configs.insert(branch_id, cfg);
                }
            }
        }
    }

    /// A copy of the config for `branch_id`, if registered
    pub fn get_rpc_config(&self, branch_id: &BranchId) -> Option<RpcConfig> {
        self.configs.get(&branch_id.to_string()).cloned()
    }

    /// Override a config at runtime
    pub fn replace_rpc_config(&mut self, branch_id: &BranchId, cfg: RpcConfig) {
        self.configs.insert(branch_id.to_string(), cfg);
    }
}

fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Perform a single JSON-RPC call against a peer chain's node
pub fn call_rpc(cfg: &RpcConfig, method: &str, params: Value) -> Result<Value, RpcError> {
    use base64::Engine;

    let endpoint = if cfg.wallet.is_empty() {
        "/".to_string()
    } else {
        format!("/wallet/{}", uri_encode(&cfg.wallet))
    };
    let url = format!("http://{}:{}{}", cfg.ip, cfg.port, endpoint);

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(DEFAULT_HTTP_CLIENT_TIMEOUT))
        .build()
        .map_err(|err| RpcError::ConnectionFailed(err.to_string()))?;

    let credentials =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", cfg.user, cfg.password));
    let request_body = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });

    let response = client
        .post(&url)
        .header("Authorization", format!("Basic {}", credentials))
        .header("Connection", "close")
        .json(&request_body)
        .send()
        .map_err(|err| RpcError::ConnectionFailed(err.to_string()))?;

    let status = response.status().as_u16();
    if status == 401 {
        return Err(RpcError::Unauthorized);
    }
    if status >= 400 && status != 400 && status != 404 && status != 500 {
        return Err(RpcError::ServerError(status));
    }

    let body = response
        .text()
        .map_err(|err| RpcError::ConnectionFailed(err.to_string()))?;
    if body.is_empty() {
        return Err(RpcError::EmptyResponse);
    }

    let reply: Value = serde_json::from_str(&body).map_err(|_| RpcError::ParseError)?;
    if !reply.is_object() || reply.as_object().map(|o| o.is_empty()).unwrap_or(true) {
        return Err(RpcError::ParseError);
    }

    if let Some(error) = reply.get("error") {
        if !error.is_null() {
            return Err(RpcError::Rpc {
                code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
    }

    reply.get("result").cloned().ok_or(RpcError::Protocol)
}

/// The live bridge: resolves targets through the registry and issues
/// `call_rpc`, interpreting each method's result shape
pub struct RpcBridge {
    man: std::sync::Arc<std::sync::Mutex<BranchChainMan>>,
}

impl RpcBridge {
    pub fn new(man: std::sync::Arc<std::sync::Mutex<BranchChainMan>>) -> Self {
        RpcBridge { man }
    }

    fn config_for(&self, branch_id: &BranchId) -> Result<RpcConfig, RpcError> {
        let man = self
            .man
            .lock()
            .map_err(|_| RpcError::ConnectionFailed("rpc registry poisoned".into()))?;
        match man.get_rpc_config(branch_id) {
            Some(cfg) if cfg.is_valid() => Ok(cfg),
            _ => Err(RpcError::NoConfig(branch_id.to_string())),
        }
    }

    fn fetch_report_prove_data(
        &self,
        method: &str,
        txid: &Hash,
    ) -> Result<ReportProveTxData, RpcError> {
        let cfg = self.config_for(&BranchId::Main)?;
        let result = call_rpc(&cfg, method, json!([txid.to_hex()]))?;

        let tx_hex = result
            .get("txhex")
            .and_then(|v| v.as_str())
            .ok_or(RpcError::Protocol)?
            .to_string();
        let confirmations = result
            .get("confirmations")
            .and_then(|v| v.as_u64())
            .ok_or(RpcError::Protocol)? as u32;
        let coin_hash_hex = result
            .get("preminecoinvouthash")
            .and_then(|v| v.as_str())
            .ok_or(RpcError::Protocol)?;
        let pre_mine_coin_vout_hash =
            Hash::from_hex(coin_hash_hex).map_err(|_| RpcError::Protocol)?;

        Ok(ReportProveTxData { tx_hex, confirmations, pre_mine_coin_vout_hash })
    }
}

impl ChainBridge for RpcBridge {
    fn make_branch_transaction(&self, target: &BranchId, tx_hex: &str) -> Result<(), RpcError> {
        let cfg = self.config_for(target)?;
        let result = call_rpc(&cfg, "makebranchtransaction", json!([tx_hex]))?;
        match result.as_str() {
            Some("ok") => Ok(()),
            _ => Err(RpcError::Protocol),
        }
    }

    fn get_branch_chain_transaction(
        &self,
        source: &BranchId,
        txid: &Hash,
    ) -> Result<TxWithConfirmations, RpcError> {
        let cfg = self.config_for(source)?;
        let result = call_rpc(&cfg, "getbranchchaintransaction", json!([txid.to_hex()]))?;

        let tx_hex = result
            .get("hex")
            .and_then(|v| v.as_str())
            .ok_or(RpcError::Protocol)?
            .to_string();
        let confirmations = result
            .get("confirmations")
            .and_then(|v| v.as_u64())
            .ok_or(RpcError::Protocol)? as u32;
        Ok(TxWithConfirmations { tx_hex, confirmations })
    }

    fn submit_branch_block_info(&self, tx_hex: &str) -> Result<(), RpcError> {
        let cfg = self.config_for(&BranchId::Main)?;
        let result = call_rpc(&cfg, "submitbranchblockinfo", json!([tx_hex]))?;
        if let Some(reason) = result.get("commit_reject_reason").and_then(|v| v.as_str()) {
            return Err(RpcError::Rpc { code: -1, message: reason.to_string() });
        }
        Ok(())
    }

    fn redeem_mortgage_coin(
        &self,
        coin_txid: &Hash,
        tx_hex: &str,
        branch_id: &BranchId,
        spv_proof_hex: &str,
    ) -> Result<(), RpcError> {
        let cfg = self.config_for(&BranchId::Main)?;
        call_rpc(
            &cfg,
            "redeemmortgagecoin",
            json!([coin_txid.to_hex(), 0, tx_hex, branch_id.to_string(), spv_proof_hex]),
        )?;
        Ok(())
    }

    fn get_report_tx_data(&self, report_txid: &Hash) -> Result<ReportProveTxData, RpcError> {
        self.fetch_report_prove_data("getreporttxdata", report_txid)
    }

    fn get_prove_tx_data(&self, prove_txid: &Hash) -> Result<ReportProveTxData, RpcError> {
        self.fetch_report_prove_data("getprovetxdata", prove_txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    #[test]
    fn test_parse_rpc_config() {
        let entry = r#"{"branchid":"main","ip":"127.0.0.1","port":8201,"usrname":"u","password":"p","wallet":"w"}"#;
        let (branch_id, cfg) = parse_rpc_config(entry).unwrap();
        assert_eq!(branch_id, "main");
        assert_eq!(cfg.ip, "127.0.0.1");
        assert_eq!(cfg.port, 8201);
        assert_eq!(cfg.user, "u");
        assert_eq!(cfg.password, "p");
        assert_eq!(cfg.wallet, "w");
        assert!(cfg.is_valid());
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(parse_rpc_config(r#"{"branchid":"main"}"#).is_none());
        assert!(parse_rpc_config(r#"{"ip":"127.0.0.1","port":0}"#).is_none());
        assert!(parse_rpc_config("not json").is_none());
    }

    #[test]
    fn test_registry_init_and_replace() {
        let branch_hash = hash_bytes(b"branch");
        let mut man = BranchChainMan::new();
        man.init(
            Some(r#"{"ip":"10.0.0.1","port":8201}"#),
            &[format!(r#"{{"branchid":"{}","ip":"10.0.0.2","port":8202}}"#, branch_hash)],
        );

        let main_cfg = man.get_rpc_config(&BranchId::Main).unwrap();
        assert_eq!(main_cfg.ip, "10.0.0.1");

        let branch_id = BranchId::Branch(branch_hash);
        let branch_cfg = man.get_rpc_config(&branch_id).unwrap();
        assert_eq!(branch_cfg.port, 8202);

        let updated = RpcConfig { ip: "10.0.0.3".into(), port: 9000, ..Default::default() };
        man.replace_rpc_config(&branch_id, updated.clone());
        assert_eq!(man.get_rpc_config(&branch_id), Some(updated));

        assert!(man.get_rpc_config(&BranchId::Branch(hash_bytes(b"unknown"))).is_none());
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("wallet-1"), "wallet-1");
        assert_eq!(uri_encode("my wallet"), "my%20wallet");
        assert_eq!(uri_encode("a/b"), "a%2Fb");
    }

    #[test]
    fn test_invalid_config_reset() {
        let mut cfg = RpcConfig { ip: "x".into(), port: 1, ..Default::default() };
        assert!(cfg.is_valid());
        cfg.reset();
        assert!(!cfg.is_valid());
        assert!(RpcConfig::default().is_valid() == false);
    }
}
