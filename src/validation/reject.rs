//! Consensus reject taxonomy
//!
//! Every cross-chain verifier returns its verdict through [`TxReject`]:
//! a kind, a DoS score for the peer that relayed the offending tx, and a
//! reason string. Nothing in the core retries a reject.

use thiserror::Error;

/// Classification of a transaction reject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectKind {
    /// Malformed script or tx shape; hard reject
    #[error("malformed")]
    Malformed,
    /// Referenced parent/branch data not (yet) known; may succeed later
    #[error("missing-data")]
    MissingData,
    /// Already known; mempool drops silently
    #[error("duplicate")]
    Duplicate,
    /// SPV/merkle proof inconsistent with committed roots
    #[error("spv-mismatch")]
    SpvMismatch,
    /// Peer chain RPC failed while gathering evidence
    #[error("peer-rpc")]
    PeerRpc,
    /// Signature verification failed
    #[error("bad-signature")]
    BadSignature,
}

/// A consensus reject: kind + DoS score + human-readable reason
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {reason} (DoS {dos})")]
pub struct TxReject {
    pub kind: RejectKind,
    pub dos: u32,
    pub reason: String,
}

impl TxReject {
    pub fn new(kind: RejectKind, dos: u32, reason: impl Into<String>) -> Self {
        TxReject { kind, dos, reason: reason.into() }
    }

    /// Hard reject at full DoS score (malformed shape or forged content)
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::new(RejectKind::Malformed, 100, reason)
    }

    /// Soft reject: the needed data may still arrive
    pub fn missing(reason: impl Into<String>) -> Self {
        Self::new(RejectKind::MissingData, 0, reason)
    }

    pub fn duplicate(reason: impl Into<String>) -> Self {
        Self::new(RejectKind::Duplicate, 0, reason)
    }

    /// Proof internally inconsistent
    pub fn spv(reason: impl Into<String>) -> Self {
        Self::new(RejectKind::SpvMismatch, 100, reason)
    }

    /// Proof names a block this node does not know yet
    pub fn spv_soft(reason: impl Into<String>) -> Self {
        Self::new(RejectKind::SpvMismatch, 0, reason)
    }

    pub fn peer_rpc(reason: impl Into<String>) -> Self {
        Self::new(RejectKind::PeerRpc, 1, reason)
    }

    pub fn bad_signature(reason: impl Into<String>) -> Self {
        Self::new(RejectKind::BadSignature, 100, reason)
    }
}

/// Verifier result alias
pub type TxResult<T = ()> = Result<T, TxReject>;
