//! Outbound cross-chain flows
//!
//! Once a block sinks `BRANCH_CHAIN_MATURITY + CUSHION_HEIGHT` deep,
//! its pregnant txs are forwarded to their destination chains, branch
//! nodes push their headers to the main chain, and redeem statements
//! trigger the main-chain redemption call. All of it is best-effort
//! bridge I/O outside consensus.

use std::collections::HashSet;

use crate::branch::{branch_chain_trans_step2, get_redeem_statement_target};
use crate::chain::{Block, ChainParams};
use crate::constants::{BRANCH_CHAIN_MATURITY, CUSHION_HEIGHT};
use crate::rpc::ChainBridge;
use crate::validation::{BranchBlockInfo, Transaction, TxReject, TxResult, TxVersion};

/// How deep a block must sink before its cross-chain txs are forwarded
pub fn forward_depth() -> u64 {
    (BRANCH_CHAIN_MATURITY + CUSHION_HEIGHT) as u64
}

/// Forward the cross-chain txs of a matured block to their peers
///
/// Failures are collected, not fatal: a peer being down must not stall
/// the node, and the flows re-run when the operator retries.
pub fn process_matured_block(
    block: &Block,
    this_chain: &ChainParams,
    bridge: &dyn ChainBridge,
) -> Vec<TxReject> {
    let mut failures = Vec::new();
    for tx in block.vtx.iter().skip(1) {
        if tx.is_pregnant() {
            if let Err(reject) = branch_chain_trans_step2(tx, block, this_chain, bridge) {
                failures.push(reject);
            }
        }
        if tx.is_redeem_mortgage_statement() {
            if let Err(reject) = req_main_chain_redeem_mortgage(tx, block, this_chain, bridge) {
                failures.push(reject);
            }
        }
    }
    failures
}

/// Submit this branch block's header to the main chain
pub fn send_branch_block_header(
    block: &Block,
    block_height: u64,
    this_chain: &ChainParams,
    bridge: &dyn ChainBridge,
) -> TxResult {
    let branch_hash = this_chain
        .branch_hash()
        .ok_or_else(|| TxReject::malformed("Can not called in main chain"))?;
    if block.vtx.len() < 2 {
        return Err(TxReject::malformed("block vtx size error"));
    }

    let mut tx = Transaction::default();
    tx.version = TxVersion::SyncBranchInfo;
    tx.branch_block_data = Some(Box::new(BranchBlockInfo {
        header: block.header.clone(),
        branch_id: branch_hash,
        block_height,
        stake_tx_data: block.vtx[1].to_bytes(),
    }));

    bridge
        .submit_branch_block_info(&tx.to_hex())
        .map_err(|err| TxReject::peer_rpc(format!("RPC call submitbranchblockinfo fail: {}", err)))
}

/// Ask the main chain to release the mortgage a statement redeems
pub fn req_main_chain_redeem_mortgage(
    tx: &Transaction,
    block: &Block,
    this_chain: &ChainParams,
    bridge: &dyn ChainBridge,
) -> TxResult {
    let coin_from_txid = get_redeem_statement_target(tx)
        .ok_or_else(|| TxReject::malformed("Is not a redeem mortgage transaction"))?;

    let mut txids = HashSet::new();
    txids.insert(tx.hash());
    let spv_proof = block.spv_proof(&txids);

    bridge
        .redeem_mortgage_coin(
            &coin_from_txid,
            &tx.to_hex(),
            &this_chain.branch_id,
            &spv_proof.to_hex(),
        )
        .map_err(|err| TxReject::peer_rpc(format!("RPC call redeemmortgagecoin fail: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_bytes, Hash, KeyId};
    use crate::rpc::{ReportProveTxData, RpcError, TxWithConfirmations};
    use crate::script::{make_p2pkh_script, make_redeem_mortgage_script};
    use crate::validation::{BranchId, TxOut};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBridge {
        submitted_headers: Mutex<Vec<String>>,
        made_transactions: Mutex<Vec<(BranchId, String)>>,
        redeems: Mutex<Vec<Hash>>,
    }

    impl ChainBridge for RecordingBridge {
        fn make_branch_transaction(&self, target: &BranchId, tx_hex: &str) -> Result<(), RpcError> {
            self.made_transactions.lock().unwrap().push((*target, tx_hex.to_string()));
            Ok(())
        }
        fn get_branch_chain_transaction(
            &self,
            _: &BranchId,
            _: &Hash,
        ) -> Result<TxWithConfirmations, RpcError> {
            Err(RpcError::Protocol)
        }
        fn submit_branch_block_info(&self, tx_hex: &str) -> Result<(), RpcError> {
            self.submitted_headers.lock().unwrap().push(tx_hex.to_string());
            Ok(())
        }
        fn redeem_mortgage_coin(
            &self,
            coin_txid: &Hash,
            _: &str,
            _: &BranchId,
            _: &str,
        ) -> Result<(), RpcError> {
            self.redeems.lock().unwrap().push(*coin_txid);
            Ok(())
        }
        fn get_report_tx_data(&self, _: &Hash) -> Result<ReportProveTxData, RpcError> {
            Err(RpcError::Protocol)
        }
        fn get_prove_tx_data(&self, _: &Hash) -> Result<ReportProveTxData, RpcError> {
            Err(RpcError::Protocol)
        }
    }

    fn coinbase() -> Transaction {
        Transaction::coinbase(50, make_p2pkh_script(&KeyId::of_pubkey(&[1; 32])))
    }

    #[test]
    fn test_send_branch_block_header() {
        let branch = hash_bytes(b"branch");
        let params = ChainParams::branch(branch);
        let bridge = RecordingBridge::default();

        let block = Block::new(Default::default(), vec![coinbase(), coinbase()]);
        send_branch_block_header(&block, 7, &params, &bridge).unwrap();

        let submitted = bridge.submitted_headers.lock().unwrap();
        let tx = Transaction::from_hex(&submitted[0]).unwrap();
        let info = tx.branch_block_data.unwrap();
        assert_eq!(info.branch_id, branch);
        assert_eq!(info.block_height, 7);
        assert_eq!(Transaction::from_bytes(&info.stake_tx_data).unwrap().hash(), block.vtx[1].hash());
    }

    #[test]
    fn test_forward_depth_covers_maturity() {
        assert!(forward_depth() > crate::constants::BRANCH_CHAIN_MATURITY as u64);
    }

    #[test]
    fn test_send_header_refused_on_main() {
        let bridge = RecordingBridge::default();
        let block = Block::new(Default::default(), vec![coinbase(), coinbase()]);
        assert!(send_branch_block_header(&block, 7, &ChainParams::main(), &bridge).is_err());
    }

    #[test]
    fn test_redeem_statement_forwarded() {
        let branch = hash_bytes(b"branch");
        let params = ChainParams::branch(branch);
        let bridge = RecordingBridge::default();
        let mortgage_txid = hash_bytes(b"mortgage");

        let mut statement = Transaction::default();
        statement.version = TxVersion::RedeemMortgageStatement;
        statement.vout.push(TxOut {
            value: 0,
            script_pubkey: make_redeem_mortgage_script(&mortgage_txid),
        });

        let block = Block::new(Default::default(), vec![coinbase(), statement.clone()]);
        let failures = process_matured_block(&block, &params, &bridge);
        assert!(failures.is_empty());
        assert_eq!(bridge.redeems.lock().unwrap().as_slice(), &[mortgage_txid]);
    }
}
