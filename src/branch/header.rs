//! Branch header submission validation
//!
//! Contextual checks applied on the main chain when a `SyncBranchInfo`
//! tx submits a branch block header. Every failure maps to a distinct
//! reject kind; soft rejects may succeed once missing data arrives.

use crate::branch::{BranchCache, BranchData, BranchDb};
use crate::chain::{bits_in_range, branch_params, validate_pow, BlockHeader};
use crate::constants::MAX_FUTURE_BLOCK_TIME;
use crate::validation::{BranchBlockInfo, Transaction, TxReject, TxResult};

/// Contextual header rules: parent linkage, version, and time drift
pub fn branch_contextual_check_block_header(
    header: &BlockHeader,
    branch_data: Option<&BranchData>,
    min_header_version: u32,
    adjusted_time: u64,
) -> TxResult {
    if header.version < min_header_version {
        return Err(TxReject::malformed("branch header version too old"));
    }
    if header.time > adjusted_time + MAX_FUTURE_BLOCK_TIME {
        return Err(TxReject::malformed("branch header timestamp too far in the future"));
    }

    if let Some(data) = branch_data {
        if !data.heads.is_empty() {
            let parent = data
                .get_branch_block_data(&header.hash_prev_block)
                .ok_or_else(|| TxReject::missing("branch header parent not found"))?;
            if header.time < parent.header.time {
                return Err(TxReject::malformed("branch header timestamp before parent"));
            }
        }
    }
    Ok(())
}

/// Work rules: claimed difficulty within branch params, PoW valid,
/// declared height consistent with the parent
pub fn check_block_header_work(
    info: &BranchBlockInfo,
    pow_limit: u32,
    branch_data: Option<&BranchData>,
) -> TxResult {
    if !bits_in_range(info.header.bits, pow_limit) {
        return Err(TxReject::malformed("branch header bits out of range"));
    }
    if !validate_pow(&info.header) {
        return Err(TxReject::malformed("branch header work check fail"));
    }

    if let Some(data) = branch_data {
        if let Some(parent) = data.get_branch_block_data(&info.header.hash_prev_block) {
            if info.block_height != parent.height + 1 {
                return Err(TxReject::malformed("branch header height not parent height plus one"));
            }
        }
    }
    Ok(())
}

/// Full validation of a `SyncBranchInfo` submission
pub fn check_branch_block_info_tx(
    tx: &Transaction,
    db: &BranchDb,
    cache: Option<&BranchCache>,
    adjusted_time: u64,
) -> TxResult {
    if !tx.is_sync_branch_info() {
        return Err(TxReject::malformed("not a sync branch info tx"));
    }
    let info = tx
        .branch_block_data
        .as_ref()
        .ok_or_else(|| TxReject::malformed("sync branch info tx missing block data"))?;

    if !db.is_branch_created(&info.branch_id) {
        return Err(TxReject::missing("Branch chain has not created"));
    }

    // The header must come staked and signed; the stake ties it to a
    // main-chain mortgage and the signature to the staking key
    if info.header.prevout_stake.is_null() || info.header.block_sig.is_none() {
        return Err(TxReject::malformed(
            "Submit branch chain block header must contain prevoutStake and vchBlockSig",
        ));
    }
    if !info.header.verify_signature() {
        return Err(TxReject::bad_signature("Submit branch chain block header sig check fail"));
    }

    if let Some(cache) = cache {
        if cache.has_in_cache(tx) {
            return Err(TxReject::duplicate("branch block info duplicate"));
        }
    }

    let branch_data = db.get_branch_data(&info.branch_id);
    let params = branch_params(&info.branch_id);

    branch_contextual_check_block_header(
        &info.header,
        branch_data,
        params.min_header_version,
        adjusted_time,
    )
    .map_err(|reject| {
        if reject.kind == crate::validation::RejectKind::MissingData {
            reject
        } else {
            TxReject::malformed(format!("branch-contextual-check-block-header-fail: {}", reject.reason))
        }
    })?;

    check_block_header_work(info, params.pow_limit, branch_data)
        .map_err(|reject| TxReject::malformed(format!("BranchBlockInfo CheckBlockHeaderWork fail: {}", reject.reason)))?;

    // The stake tx must decode; insertion depends on it
    crate::branch::BranchBlockData::from_info(info)?;

    Ok(())
}
