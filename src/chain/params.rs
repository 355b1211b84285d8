//! Chain parameters
//!
//! Which chain this node is, and the consensus parameters used when
//! validating submitted branch headers.

use crate::crypto::Hash;
use crate::validation::BranchId;

/// Parameters of one chain (the node's own, or a tracked branch)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    /// Identity of the chain
    pub branch_id: BranchId,
    /// Easiest allowed difficulty target, compact form
    pub pow_limit: u32,
    /// Minimum accepted header version
    pub min_header_version: u32,
}

impl ChainParams {
    /// The main chain
    pub fn main() -> Self {
        ChainParams {
            branch_id: BranchId::Main,
            pow_limit: 0x20ffffff,
            min_header_version: 1,
        }
    }

    /// A branch chain identified by its branch-create txid
    pub fn branch(branch_hash: Hash) -> Self {
        ChainParams {
            branch_id: BranchId::Branch(branch_hash),
            pow_limit: 0x20ffffff,
            min_header_version: 1,
        }
    }

    pub fn is_main_chain(&self) -> bool {
        self.branch_id.is_main()
    }

    /// The branch hash when this is a branch chain
    pub fn branch_hash(&self) -> Option<Hash> {
        self.branch_id.branch_hash()
    }
}

/// Parameters used to validate headers submitted for a branch
///
/// All branches currently share the base parameter set; the lookup is
/// the seam where per-branch tuning would land.
pub fn branch_params(branch_hash: &Hash) -> ChainParams {
    ChainParams::branch(*branch_hash)
}
