//! TRELLIS (TRL) Multi-Chain Core Library
//!
//! A main chain anchoring many branch chains: branch-header tracking,
//! two-phase cross-chain transfers, mining collateral (mortgage /
//! mine-coin), and fraud adjudication by report / prove.
//!
//! TRL is the short form used in addresses, logos, and protocol identifiers.

pub mod crypto;
pub mod script;
pub mod chain;
pub mod validation;
pub mod branch;
pub mod rpc;
pub mod node;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    /// Total supply of TRL coins (in base units, 8 decimal places)
    pub const TOTAL_SUPPLY: i64 = 100_000_000 * 100_000_000; // 100M TRL

    /// Largest valid amount for any single value or running sum
    pub const MAX_MONEY: i64 = TOTAL_SUPPLY;

    /// Confirmations a step-1 tx needs on its home chain before the
    /// destination chain will accept the derived step-2
    pub const BRANCH_CHAIN_MATURITY: u32 = 6;

    /// Extra depth past maturity before a block's cross-chain txs are
    /// forwarded to their destination chains
    pub const CUSHION_HEIGHT: u32 = 12;

    /// How far below the branch tip a reported block may sit; older
    /// blocks are past the challenge horizon and cannot be reported
    pub const REDEEM_SAFE_HEIGHT: u64 = 60;

    /// Main-chain blocks a report must survive unproved before the
    /// reporter may claim the slashed collateral
    pub const REPORT_OUTOF_HEIGHT: u64 = 60;

    /// Main-chain confirmations a report/prove tx needs before a branch
    /// will lock or unlock the reported mine coin
    pub const REPORT_LOCK_COIN_HEIGHT: u32 = 60;

    /// Chain name (short form for addresses/logos)
    pub const CHAIN_NAME: &str = "TRL";

    /// Full chain name
    pub const CHAIN_FULL_NAME: &str = "TRELLIS";

    /// Maximum header timestamp drift past adjusted time (seconds)
    pub const MAX_FUTURE_BLOCK_TIME: u64 = 2 * 60 * 60;

    /// Check an amount is in the consensus-valid range
    pub fn money_range(value: i64) -> bool {
        (0..=MAX_MONEY).contains(&value)
    }
}
