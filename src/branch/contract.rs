//! Contract-data proof hook
//!
//! Binds transactions to the contract state they read (prev-data) and
//! produced (final-data) through two extra merkle roots in the branch
//! header, adjudicates stale-read fraud reports, and re-executes
//! contracts deterministically on a pool of workers to corroborate a
//! prove.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::branch::{BranchBlockData, BranchDb};
use crate::crypto::{check_spv_proof, Hash, HashWriter, KeyId};
use crate::validation::{
    Amount, ContractBlockData, ContractInfo, ContractPrevData, ProveData, ReportType, Transaction,
};

/// Hash binding a tx to the contract state it observed
pub fn tx_hash_with_prev_data(txid: &Hash, prev_data: &ContractPrevData) -> Hash {
    let mut writer = HashWriter::new();
    writer.write_hash(txid);
    writer.write_bytes(&bincode::serialize(prev_data).expect("in-memory serialization cannot fail"));
    writer.finish()
}

/// Hash binding a tx to the contract state it produced
pub fn tx_hash_with_data(txid: &Hash, final_data: &ContractBlockData) -> Hash {
    let mut writer = HashWriter::new();
    writer.write_hash(txid);
    writer.write_bytes(&bincode::serialize(final_data).expect("in-memory serialization cannot fail"));
    writer.finish()
}

/// Deterministic contract executor
///
/// One per worker thread; never shared. Execution folds the observed
/// prev-data, the tx, the coin amount and the block coordinates into
/// the per-contract final state.
#[derive(Default)]
pub struct ContractVm;

impl ContractVm {
    pub fn new() -> Self {
        ContractVm
    }

    pub fn execute(
        &mut self,
        tx: &Transaction,
        prev_data: &BTreeMap<KeyId, ContractInfo>,
        coins: Amount,
        block_time: u64,
        block_height: u64,
    ) -> ContractBlockData {
        let tx_hash = tx.hash();
        let mut out = ContractBlockData::new();
        for (contract_id, info) in prev_data {
            let mut writer = HashWriter::new();
            writer
                .write_bytes(&contract_id.0)
                .write_bytes(&info.data)
                .write_hash(&tx_hash)
                .write_bytes(&coins.to_le_bytes())
                .write_bytes(&block_time.to_le_bytes())
                .write_bytes(&block_height.to_le_bytes());
            out.insert(*contract_id, writer.finish().0.to_vec());
        }
        out
    }
}

struct VmJob {
    tx: Transaction,
    prev_data: BTreeMap<KeyId, ContractInfo>,
    coins: Amount,
    block_time: u64,
    block_height: u64,
    reply: mpsc::Sender<ContractBlockData>,
}

/// Pool of contract re-execution workers
///
/// Each worker owns its own `ContractVm`; the driver serializes result
/// handling through the reply channel.
pub struct ContractVmPool {
    sender: Option<mpsc::Sender<VmJob>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ContractVmPool {
    pub fn new(num_workers: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<VmJob>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..num_workers.max(1))
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                thread::spawn(move || {
                    let mut vm = ContractVm::new();
                    loop {
                        let job = {
                            let guard = match receiver.lock() {
                                Ok(guard) => guard,
                                Err(_) => return,
                            };
                            guard.recv()
                        };
                        match job {
                            Ok(job) => {
                                let result = vm.execute(
                                    &job.tx,
                                    &job.prev_data,
                                    job.coins,
                                    job.block_time,
                                    job.block_height,
                                );
                                let _ = job.reply.send(result);
                            }
                            Err(_) => return,
                        }
                    }
                })
            })
            .collect();

        ContractVmPool { sender: Some(sender), workers }
    }

    /// Re-execute a contract tx on a worker and wait for the result
    pub fn execute(
        &self,
        tx: &Transaction,
        prev_data: &BTreeMap<KeyId, ContractInfo>,
        coins: Amount,
        block_time: u64,
        block_height: u64,
    ) -> Option<ContractBlockData> {
        let (reply, result) = mpsc::channel();
        let job = VmJob {
            tx: tx.clone(),
            prev_data: prev_data.clone(),
            coins,
            block_time,
            block_height,
            reply,
        };
        self.sender.as_ref()?.send(job).ok()?;
        result.recv().ok()
    }
}

impl Drop for ContractVmPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Corroborate a prove of a smart-contract tx by re-execution
///
/// The prev-data SPV pins where the tx sits in the with-prev-data tree;
/// re-execution must land the final-data hash at the same index in the
/// with-final-data tree.
pub fn check_prove_smart_contract(
    prove_data: &ProveData,
    prove_tx: &Transaction,
    block_data: &BranchBlockData,
    vm_pool: &ContractVmPool,
) -> bool {
    let Some(contract_data) = &prove_data.contract_data else {
        return false;
    };

    let mut prev = ContractPrevData { coins: contract_data.coins, data_from: BTreeMap::new() };
    for (contract_id, info) in &contract_data.contract_prev_data {
        prev.data_from.insert(*contract_id, info.from);
    }

    let hash_with_prev = tx_hash_with_prev_data(&prove_tx.hash(), &prev);
    let Some(tx_index) = check_spv_proof(
        &block_data.header.hash_merkle_root_with_prev_data,
        &contract_data.prev_data_spv,
        &hash_with_prev,
    ) else {
        return false;
    };

    let Some(final_data) = vm_pool.execute(
        prove_tx,
        &contract_data.contract_prev_data,
        contract_data.coins,
        block_data.header.time,
        block_data.height,
    ) else {
        return false;
    };

    let hash_with_data = tx_hash_with_data(&prove_tx.hash(), &final_data);
    match check_spv_proof(
        &block_data.header.hash_merkle_root_with_data,
        &contract_data.data_spv,
        &hash_with_data,
    ) {
        Some(final_index) => final_index == tx_index,
        None => false,
    }
}

/// Adjudicate a REPORT_CONTRACT_DATA report: did the reported tx read
/// stale contract state that a later ancestor block had overwritten?
///
/// Returns `true` exactly when the fraud case is established; the
/// return value of every branch mirrors the deployed consensus and must
/// not be reinterpreted.
pub fn check_prove_contract_data(tx: &Transaction, db: &BranchDb) -> bool {
    if !tx.is_report() {
        return false;
    }
    let Some(report_data) = &tx.report_data else {
        return false;
    };
    if report_data.report_type != ReportType::ContractData {
        return false;
    }
    let Some(contract_data) = &report_data.contract_data else {
        return false;
    };

    let Some(branch_data) = db.get_branch_data(&report_data.reported_branch_id) else {
        return false;
    };

    // The reported tx and its prev-data must belong to the named block
    let Some(reported_block) = branch_data.get_branch_block_data(&report_data.reported_block_hash)
    else {
        return false;
    };
    let reported_hash_with_prev = tx_hash_with_prev_data(
        &report_data.reported_tx_hash,
        &contract_data.reported_contract_prev_data,
    );
    let Some(reported_tx_index) = check_spv_proof(
        &reported_block.header.hash_merkle_root_with_prev_data,
        &contract_data.reported_spv_proof.pmt,
        &reported_hash_with_prev,
    ) else {
        return false;
    };

    // The replacing write must belong to its named block
    let Some(prove_block) =
        branch_data.get_branch_block_data(&contract_data.prove_spv_proof.block_hash)
    else {
        return false;
    };
    let prove_hash_with_data =
        tx_hash_with_data(&contract_data.prove_tx_hash, &contract_data.prove_contract_data);
    let Some(prove_tx_index) = check_spv_proof(
        &prove_block.header.hash_merkle_root_with_data,
        &contract_data.prove_spv_proof.pmt,
        &prove_hash_with_data,
    ) else {
        return false;
    };

    if reported_block.height < prove_block.height {
        return false;
    }
    match branch_data.get_ancestor(reported_block, prove_block.height) {
        Some(ancestor) if ancestor.block_hash == prove_block.block_hash => {}
        _ => return false,
    }

    for contract_id in contract_data.prove_contract_data.keys() {
        let Some(read_from) = contract_data
            .reported_contract_prev_data
            .data_from
            .get(contract_id)
        else {
            continue;
        };
        let Some(writer_block) = branch_data.get_branch_block_data(&read_from.block_hash) else {
            // The claimed read origin is not even a tracked block
            return true;
        };
        match branch_data.get_ancestor(reported_block, writer_block.height) {
            Some(ancestor) if ancestor.block_hash == writer_block.block_hash => {}
            _ => return true,
        }

        if prove_block.height > writer_block.height
            || (prove_block.height == writer_block.height
                && prove_tx_index > read_from.tx_index
                && prove_tx_index < reported_tx_index)
        {
            return true;
        }
    }

    false
}
