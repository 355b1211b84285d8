//! Transaction structure and cross-chain variant payloads
//!
//! A transaction is version-tagged; the version decides which optional
//! payloads are present (branch header data, report data, prove data,
//! SPV proof, ...). Canonical bytes are the bincode encoding; wire hex
//! fields are hex of those bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::chain::BlockHeader;
use crate::crypto::{hash_bytes, Hash, KeyId, PartialMerkleTree, SpvProof};
use crate::script::Script;

/// Amount in base units (8 decimal places)
pub type Amount = i64;

/// Identifier of a chain: the reserved main chain or a branch by its
/// branch-create txid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchId {
    Main,
    Branch(crate::crypto::Hash),
}

impl BranchId {
    pub fn is_main(&self) -> bool {
        matches!(self, BranchId::Main)
    }

    /// The branch hash, for non-main ids
    pub fn branch_hash(&self) -> Option<crate::crypto::Hash> {
        match self {
            BranchId::Main => None,
            BranchId::Branch(hash) => Some(*hash),
        }
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchId::Main => write!(f, "main"),
            BranchId::Branch(hash) => write!(f, "{}", hash),
        }
    }
}

impl FromStr for BranchId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "main" {
            Ok(BranchId::Main)
        } else {
            Ok(BranchId::Branch(crate::crypto::Hash::from_hex(s)?))
        }
    }
}

/// Reference to a transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub n: u32,
}

impl OutPoint {
    /// The coinbase sentinel: null hash, max index
    pub fn null() -> Self {
        OutPoint { hash: Hash::zero(), n: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.hash.is_zero() && self.n == u32::MAX
    }
}

impl Default for OutPoint {
    fn default() -> Self {
        Self::null()
    }
}

/// A transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

/// Transaction version tags; each decides the payloads carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxVersion {
    Transfer,
    BranchCreate,
    TransStep1,
    TransStep2,
    Mortgage,
    SyncBranchInfo,
    Report,
    Prove,
    RedeemMortgageStatement,
    ReportReward,
    LockMortgageMineCoin,
    UnlockMortgageMineCoin,
    CreateContract,
    CallContract,
}

/// What a report accuses (and a prove answers)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportType {
    Tx,
    Coinbase,
    MerkleTree,
    ContractData,
}

impl ReportType {
    /// Stable tag byte fed into report/prove key derivation
    pub fn tag(&self) -> u8 {
        match self {
            ReportType::Tx => 1,
            ReportType::Coinbase => 2,
            ReportType::MerkleTree => 3,
            ReportType::ContractData => 4,
        }
    }
}

/// Where a contract read was observed: the writing block and tx index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPrevDataItem {
    pub block_hash: Hash,
    pub tx_index: u32,
}

/// Contract state snapshot a tx executed against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractPrevData {
    pub coins: Amount,
    pub data_from: BTreeMap<KeyId, ContractPrevDataItem>,
}

/// Per-contract state blob keyed by contract id
pub type ContractBlockData = BTreeMap<KeyId, Vec<u8>>;

/// Origin plus state carried for one contract in a prove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub from: ContractPrevDataItem,
    pub data: Vec<u8>,
}

/// Contract evidence inside a REPORT_CONTRACT_DATA report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportContractData {
    /// Prev-data snapshot the reported tx claims it executed against
    pub reported_contract_prev_data: ContractPrevData,
    /// SPV over the reported block's with-prev-data merkle variant
    pub reported_spv_proof: SpvProof,
    /// The later-writing tx the reporter points at
    pub prove_tx_hash: Hash,
    /// That tx's final contract data
    pub prove_contract_data: ContractBlockData,
    /// SPV over the writer block's with-final-data merkle variant
    pub prove_spv_proof: SpvProof,
}

/// Payload of a Report tx
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportData {
    pub report_type: ReportType,
    pub reported_branch_id: Hash,
    pub reported_block_hash: Hash,
    pub reported_tx_hash: Hash,
    pub contract_data: Option<ReportContractData>,
}

/// One input's worth of prove evidence: the funding tx and its inclusion proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProveDataItem {
    pub block_hash: Hash,
    pub tx_data: Vec<u8>,
    pub spv_proof: SpvProof,
}

/// Contract evidence inside a Prove tx
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractProveData {
    pub coins: Amount,
    pub contract_prev_data: BTreeMap<KeyId, ContractInfo>,
    /// SPV over the proved block's with-prev-data merkle variant
    pub prev_data_spv: PartialMerkleTree,
    /// SPV over the proved block's with-final-data merkle variant
    pub data_spv: PartialMerkleTree,
}

/// Payload of a Prove tx
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProveData {
    pub prove_type: ReportType,
    pub branch_id: Hash,
    pub block_hash: Hash,
    pub tx_hash: Hash,
    /// Full serialized vtx of the defended block (coinbase/merkle proves)
    pub vtx_data: Vec<u8>,
    /// Input evidence for the proved tx (tx proves)
    pub vect_prove_data: Vec<ProveDataItem>,
    /// Input evidence for every non-coinbase tx of the block (coinbase/merkle proves)
    pub vec_block_tx_prove: Vec<Vec<ProveDataItem>>,
    pub contract_data: Option<ContractProveData>,
}

/// Branch header submission carried by a SyncBranchInfo tx
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchBlockInfo {
    pub header: BlockHeader,
    pub branch_id: Hash,
    pub block_height: u64,
    /// Serialized stake tx (`vtx[1]` of the branch block)
    pub stake_tx_data: Vec<u8>,
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: TxVersion,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,

    /// Destination chain of a step-1 / mortgage
    pub send_to_branchid: Option<BranchId>,
    /// Hex of the deterministic step-2 the destination must produce
    pub send_to_tx_hex_data: Option<String>,
    /// Originating chain of a step-2
    pub from_branch_id: Option<BranchId>,
    /// Serialized step-1, carried by the step-2
    pub from_tx: Vec<u8>,
    /// Value entering the destination chain
    pub in_amount: Amount,

    pub branch_block_data: Option<Box<BranchBlockInfo>>,
    pub report_data: Option<Box<ReportData>>,
    pub prove_data: Option<Box<ProveData>>,
    /// SPV proof binding this tx to a source-chain block
    pub spv_proof: Option<Box<SpvProof>>,

    /// Main-chain report referenced by a lock-mine-coin tx
    pub report_txid: Option<Hash>,
    /// Main-chain prove referenced by an unlock-mine-coin tx
    pub prove_txid: Option<Hash>,
    /// Outpoint hash of the mine coin being locked/unlocked
    pub coin_preout_hash: Option<Hash>,

    /// Contract a smart-contract tx targets
    pub contract_addr: Option<KeyId>,
    /// Net value the contract pays out in this tx
    pub contract_out: Amount,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            version: TxVersion::Transfer,
            vin: Vec::new(),
            vout: Vec::new(),
            lock_time: 0,
            send_to_branchid: None,
            send_to_tx_hex_data: None,
            from_branch_id: None,
            from_tx: Vec::new(),
            in_amount: 0,
            branch_block_data: None,
            report_data: None,
            prove_data: None,
            spv_proof: None,
            report_txid: None,
            prove_txid: None,
            coin_preout_hash: None,
            contract_addr: None,
            contract_out: 0,
        }
    }
}

impl Transaction {
    /// A plain transfer with the given inputs and outputs
    pub fn new(vin: Vec<TxIn>, vout: Vec<TxOut>) -> Self {
        Transaction { vin, vout, ..Default::default() }
    }

    /// A coinbase paying `value` to `script_pubkey`
    pub fn coinbase(value: Amount, script_pubkey: Script) -> Self {
        Transaction {
            vin: vec![TxIn { prevout: OutPoint::null(), script_sig: Script::new() }],
            vout: vec![TxOut { value, script_pubkey }],
            ..Default::default()
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    pub fn is_branch_create(&self) -> bool {
        self.version == TxVersion::BranchCreate
    }

    pub fn is_branch_chain_trans_step1(&self) -> bool {
        self.version == TxVersion::TransStep1
    }

    pub fn is_branch_chain_trans_step2(&self) -> bool {
        self.version == TxVersion::TransStep2
    }

    pub fn is_mortgage(&self) -> bool {
        self.version == TxVersion::Mortgage
    }

    /// Step-1 or mortgage: a tx that gives birth to a step-2 elsewhere
    pub fn is_pregnant(&self) -> bool {
        self.is_branch_chain_trans_step1() || self.is_mortgage()
    }

    pub fn is_sync_branch_info(&self) -> bool {
        self.version == TxVersion::SyncBranchInfo
    }

    pub fn is_report(&self) -> bool {
        self.version == TxVersion::Report
    }

    pub fn is_prove(&self) -> bool {
        self.version == TxVersion::Prove
    }

    pub fn is_redeem_mortgage_statement(&self) -> bool {
        self.version == TxVersion::RedeemMortgageStatement
    }

    pub fn is_report_reward(&self) -> bool {
        self.version == TxVersion::ReportReward
    }

    pub fn is_lock_mortgage_mine_coin(&self) -> bool {
        self.version == TxVersion::LockMortgageMineCoin
    }

    pub fn is_unlock_mortgage_mine_coin(&self) -> bool {
        self.version == TxVersion::UnlockMortgageMineCoin
    }

    pub fn is_smart_contract(&self) -> bool {
        matches!(self.version, TxVersion::CreateContract | TxVersion::CallContract)
    }

    pub fn is_call_contract(&self) -> bool {
        self.version == TxVersion::CallContract
    }

    /// Canonical bytes (consensus encoding)
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("in-memory serialization cannot fail")
    }

    /// Decode canonical bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Hex wire form of the canonical bytes
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Decode the hex wire form
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        Self::from_bytes(&bytes).ok()
    }

    /// Transaction hash over the canonical bytes
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }

    /// Hash signed by input witnesses: canonical bytes with script sigs cleared
    pub fn signing_hash(&self) -> Hash {
        let mut stripped = self.clone();
        for input in &mut stripped.vin {
            input.script_sig.clear();
        }
        hash_bytes(&stripped.to_bytes())
    }

    /// Sum of output values
    pub fn value_out(&self) -> Amount {
        self.vout.iter().map(|o| o.value).sum()
    }
}
