//! The chain bridge seam
//!
//! Verifiers fetch cross-chain evidence through this trait; the live
//! implementation speaks JSON-RPC to configured peer chains and tests
//! substitute a mock. Calls are synchronous I/O and must be made
//! outside the validation lock.

use thiserror::Error;

use crate::crypto::Hash;
use crate::validation::BranchId;

/// Bridge failures (non-consensus; the caller decides the reject kind)
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("couldn't connect to server: {0}")]
    ConnectionFailed(String),
    #[error("incorrect rpcuser or rpcpassword (authorization failed)")]
    Unauthorized,
    #[error("server returned HTTP error {0}")]
    ServerError(u16),
    #[error("no response from server")]
    EmptyResponse,
    #[error("couldn't parse reply from server")]
    ParseError,
    #[error("reply missing expected fields")]
    Protocol,
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("no rpc config for chain {0}")]
    NoConfig(String),
}

/// A fetched transaction with its confirmation depth
#[derive(Debug, Clone)]
pub struct TxWithConfirmations {
    pub tx_hex: String,
    pub confirmations: u32,
}

/// Result of `getreporttxdata` / `getprovetxdata`
#[derive(Debug, Clone)]
pub struct ReportProveTxData {
    pub tx_hex: String,
    pub confirmations: u32,
    /// Outpoint hash of the mine coin the report/prove points at
    pub pre_mine_coin_vout_hash: Hash,
}

/// Typed access to the six peer-chain methods the core consumes
pub trait ChainBridge: Send + Sync {
    /// Hand a step-1/step-2 candidate to the destination chain
    fn make_branch_transaction(&self, target: &BranchId, tx_hex: &str) -> Result<(), RpcError>;

    /// Fetch a step-1 tx from its home chain by txid
    fn get_branch_chain_transaction(
        &self,
        source: &BranchId,
        txid: &Hash,
    ) -> Result<TxWithConfirmations, RpcError>;

    /// Submit a branch block header to the main chain
    fn submit_branch_block_info(&self, tx_hex: &str) -> Result<(), RpcError>;

    /// Ask the main chain to release a matured mortgage
    fn redeem_mortgage_coin(
        &self,
        coin_txid: &Hash,
        tx_hex: &str,
        branch_id: &BranchId,
        spv_proof_hex: &str,
    ) -> Result<(), RpcError>;

    /// Fetch a report tx (with mine-coin linkage) from the main chain
    fn get_report_tx_data(&self, report_txid: &Hash) -> Result<ReportProveTxData, RpcError>;

    /// Fetch a prove tx (with mine-coin linkage) from the main chain
    fn get_prove_tx_data(&self, prove_txid: &Hash) -> Result<ReportProveTxData, RpcError>;
}
