//! Node configuration
//!
//! A JSON file names the chain this node serves, where its database
//! lives, the RPC listen port, and the peer-chain connection entries
//! fed into the `BranchChainMan` registry.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::chain::ChainParams;
use crate::validation::BranchId;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid chain id: {0}")]
    InvalidChain(String),
}

/// On-disk node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// "main" or the branch-create txid hex of the chain this node serves
    pub chain: String,
    /// JSON-RPC listen port
    pub listen_port: u16,
    /// Branch database directory
    pub db_path: String,
    /// Connection entry for the main chain's node
    #[serde(default)]
    pub main_chain_cfg: Option<String>,
    /// Connection entries for branch-chain nodes
    #[serde(default)]
    pub branch_cfgs: Vec<String>,
    /// During db re-verification, skip peer-chain cross-checks
    #[serde(default = "default_true")]
    pub uncheck_branch_tx_in_verify_db: bool,
    /// On the main chain, pass step-2s from branches with no config entry
    #[serde(default)]
    pub uncheck_no_config_branch: bool,
}

fn default_true() -> bool {
    true
}

impl NodeConfig {
    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolve the chain identity into params
    pub fn chain_params(&self) -> Result<ChainParams, ConfigError> {
        let branch_id: BranchId = self
            .chain
            .parse()
            .map_err(|_| ConfigError::InvalidChain(self.chain.clone()))?;
        Ok(match branch_id {
            BranchId::Main => ChainParams::main(),
            BranchId::Branch(hash) => ChainParams::branch(hash),
        })
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            chain: "main".to_string(),
            listen_port: 8201,
            db_path: "trellis-db".to_string(),
            main_chain_cfg: None,
            branch_cfgs: Vec::new(),
            uncheck_branch_tx_in_verify_db: true,
            uncheck_no_config_branch: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");

        let cfg = NodeConfig {
            chain: hash_bytes(b"branch").to_hex(),
            listen_port: 9301,
            db_path: "/tmp/db".into(),
            main_chain_cfg: Some(r#"{"ip":"127.0.0.1","port":8201}"#.into()),
            branch_cfgs: vec![],
            uncheck_branch_tx_in_verify_db: true,
            uncheck_no_config_branch: false,
        };
        std::fs::write(&path, serde_json::to_string(&cfg).unwrap()).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.listen_port, 9301);
        assert!(!loaded.chain_params().unwrap().is_main_chain());
    }

    #[test]
    fn test_main_chain_params() {
        let cfg = NodeConfig::default();
        assert!(cfg.chain_params().unwrap().is_main_chain());
    }

    #[test]
    fn test_bad_chain_id() {
        let cfg = NodeConfig { chain: "not-a-hash".into(), ..Default::default() };
        assert!(cfg.chain_params().is_err());
    }
}
