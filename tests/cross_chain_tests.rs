//! Property-based and end-to-end tests for the cross-chain core
//!
//! Covers the transfer round-trip identity, SPV correctness, report key
//! determinism, the report/prove/redeem lifecycle, collateral slashing,
//! and contract-data fraud adjudication.

use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;

use trellis_core::branch::{
    check_branch_duplicate_tx, check_branch_transaction, check_prove_contract_data,
    check_prove_report_tx, check_report_cheat_tx, check_report_reward_transaction,
    check_redeem_mortgage, get_prove_tx_hash_key, get_report_tx_hash_key, revert_transaction,
    tx_hash_with_data, tx_hash_with_prev_data, BranchDb, ContractVmPool, ReportFlag,
};
use trellis_core::chain::{Block, BlockHeader, ChainParams};
use trellis_core::constants::{BRANCH_CHAIN_MATURITY, REPORT_OUTOF_HEIGHT};
use trellis_core::crypto::{
    check_spv_proof, compute_merkle_root, hash_bytes, Hash, KeyId, PrivateKey, SpvProof,
};
use trellis_core::node::{ChainCtx, MemoryTxIndex};
use trellis_core::rpc::{ChainBridge, ReportProveTxData, RpcError, TxWithConfirmations};
use trellis_core::script::{
    make_mortgage_coin_script, make_p2pkh_script, make_redeem_mortgage_script, make_script_sig,
    make_trans_branch_script,
};
use trellis_core::validation::{
    Amount, BranchBlockInfo, BranchId, ContractPrevData, ContractPrevDataItem, OutPoint,
    ReportContractData, ReportData, ReportType, ProveData, ProveDataItem, Transaction, TxIn, TxOut,
    TxVersion,
};

// ============================================================================
// HELPERS
// ============================================================================

/// Bridge stub returning a fixed step-1 lookup result
struct StubBridge {
    step1: Option<(Transaction, u32)>,
}

impl ChainBridge for StubBridge {
    fn make_branch_transaction(&self, _: &BranchId, _: &str) -> Result<(), RpcError> {
        Ok(())
    }
    fn get_branch_chain_transaction(
        &self,
        _: &BranchId,
        _: &Hash,
    ) -> Result<TxWithConfirmations, RpcError> {
        match &self.step1 {
            Some((tx, confirmations)) => Ok(TxWithConfirmations {
                tx_hex: tx.to_hex(),
                confirmations: *confirmations,
            }),
            None => Err(RpcError::ConnectionFailed("no peer".into())),
        }
    }
    fn submit_branch_block_info(&self, _: &str) -> Result<(), RpcError> {
        Ok(())
    }
    fn redeem_mortgage_coin(&self, _: &Hash, _: &str, _: &BranchId, _: &str) -> Result<(), RpcError> {
        Ok(())
    }
    fn get_report_tx_data(&self, _: &Hash) -> Result<ReportProveTxData, RpcError> {
        Err(RpcError::Protocol)
    }
    fn get_prove_tx_data(&self, _: &Hash) -> Result<ReportProveTxData, RpcError> {
        Err(RpcError::Protocol)
    }
}

fn receiver_keyid() -> KeyId {
    KeyId::of_pubkey(&[42u8; 32])
}

/// A step-1 moving `amount` from the main chain to `branch`, committing
/// to the deterministic step-2 template
fn build_step1(branch: Hash, amount: Amount) -> Transaction {
    let mut template = Transaction::default();
    template.version = TxVersion::TransStep2;
    template.from_branch_id = Some(BranchId::Main);
    template.in_amount = amount;
    template.vin.push(TxIn {
        prevout: OutPoint { hash: Hash::zero(), n: 0 },
        script_sig: Default::default(),
    });
    template.spv_proof = Some(Box::new(SpvProof::default()));
    template.vout.push(TxOut {
        value: amount,
        script_pubkey: make_p2pkh_script(&receiver_keyid()),
    });

    let mut step1 = Transaction::default();
    step1.version = TxVersion::TransStep1;
    step1.send_to_branchid = Some(BranchId::Branch(branch));
    step1.send_to_tx_hex_data = Some(template.to_hex());
    step1.vout.push(TxOut {
        value: amount,
        script_pubkey: make_trans_branch_script(&branch),
    });
    step1
}

fn open_db() -> (BranchDb, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    (BranchDb::open(dir.path()).unwrap(), dir)
}

/// Insert a branch block carrying `vtx` with committed merkle roots
fn add_branch_block(
    db: &mut BranchDb,
    branch: Hash,
    prev: Hash,
    height: u64,
    vtx: &[Transaction],
    root_with_prev_data: Hash,
    root_with_data: Hash,
) -> Hash {
    let leaves: Vec<Hash> = vtx.iter().map(|tx| tx.hash()).collect();
    let mut header = BlockHeader::default();
    header.hash_prev_block = prev;
    header.hash_merkle_root = compute_merkle_root(&leaves, None);
    header.hash_merkle_root_with_prev_data = root_with_prev_data;
    header.hash_merkle_root_with_data = root_with_data;
    header.nonce = height.wrapping_mul(7919);
    header.prevout_stake = OutPoint { hash: hash_bytes(b"stake-prev"), n: 0 };

    let stake = vtx.get(1).cloned().unwrap_or_else(|| vtx[0].clone());
    let info = BranchBlockInfo {
        header: header.clone(),
        branch_id: branch,
        block_height: height,
        stake_tx_data: stake.to_bytes(),
    };
    db.add_block_info(&info).unwrap();
    header.hash()
}

fn spv_for(block_hash: Hash, vtx: &[Transaction], target: Hash) -> SpvProof {
    let leaves: Vec<Hash> = vtx.iter().map(|tx| tx.hash()).collect();
    let mut txids = HashSet::new();
    txids.insert(target);
    SpvProof::build(block_hash, &leaves, &txids)
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

proptest! {
    /// Round-trip: for a derived step-2, the revert recovers the
    /// committed template, and amounts are conserved
    #[test]
    fn prop_step2_roundtrip_and_amounts(amount in 1i64..1_000_000_000i64, seed in 0u8..255u8) {
        let branch = hash_bytes(&[seed]);
        let step1 = build_step1(branch, amount);
        let dest = ChainParams::branch(branch);
        let step2 = trellis_core::branch::make_branch_trans_step2_tx(&step1, &dest, None).unwrap();

        let template = Transaction::from_hex(step1.send_to_tx_hex_data.as_ref().unwrap()).unwrap();
        prop_assert_eq!(revert_transaction(&step2, Some(&step1), true).hash(), template.hash());

        prop_assert_eq!(step2.in_amount, trellis_core::branch::get_branch_chain_out(&step1));
        prop_assert!(step2.value_out() <= step2.in_amount);
    }

    /// SPV correctness: a built proof resolves to the leaf index, and
    /// an absent hash never verifies
    #[test]
    fn prop_spv_correctness(n in 1usize..24usize, pick in 0usize..24usize) {
        let leaves: Vec<Hash> = (0..n).map(|i| hash_bytes(&(i as u64).to_le_bytes())).collect();
        let index = pick % n;
        let root = compute_merkle_root(&leaves, None);

        let mut txids = HashSet::new();
        txids.insert(leaves[index]);
        let proof = SpvProof::build(Hash::zero(), &leaves, &txids);

        prop_assert_eq!(check_spv_proof(&root, &proof.pmt, &leaves[index]), Some(index as u32));

        let outsider = hash_bytes(b"not-in-the-block");
        prop_assert_eq!(check_spv_proof(&root, &proof.pmt, &outsider), None);
    }

    /// Report key determinism: reporter and prover derive the same key
    #[test]
    fn prop_report_key_determinism(a in any::<[u8; 32]>(), b in any::<[u8; 32]>(), c in any::<[u8; 32]>()) {
        let (branch, block, txh) = (Hash(a), Hash(b), Hash(c));

        for kind in [ReportType::Tx, ReportType::Coinbase, ReportType::MerkleTree] {
            let mut report = Transaction::default();
            report.version = TxVersion::Report;
            report.report_data = Some(Box::new(ReportData {
                report_type: kind,
                reported_branch_id: branch,
                reported_block_hash: block,
                reported_tx_hash: txh,
                contract_data: None,
            }));

            let mut prove = Transaction::default();
            prove.version = TxVersion::Prove;
            prove.prove_data = Some(Box::new(ProveData {
                prove_type: kind,
                branch_id: branch,
                block_hash: block,
                tx_hash: txh,
                vtx_data: Vec::new(),
                vect_prove_data: Vec::new(),
                vec_block_tx_prove: Vec::new(),
                contract_data: None,
            }));

            prop_assert_eq!(
                get_report_tx_hash_key(&report).unwrap(),
                get_prove_tx_hash_key(&prove).unwrap()
            );
        }
    }

    /// Ancestor query: `get_ancestor(tip, k)` finds the unique ancestor
    /// at height k, and `get_ancestor(b, b.height) == b`
    #[test]
    fn prop_ancestor_query(chain_len in 2u64..12u64, pick in 1u64..12u64) {
        let (mut db, _dir) = open_db();
        let branch = hash_bytes(b"ancestor-branch");
        let coinbase = Transaction::coinbase(1, make_p2pkh_script(&receiver_keyid()));

        let mut prev = Hash::zero();
        let mut hashes = Vec::new();
        for height in 1..=chain_len {
            prev = add_branch_block(&mut db, branch, prev, height, std::slice::from_ref(&coinbase), Hash::zero(), Hash::zero());
            hashes.push(prev);
        }

        let data = db.get_branch_data(&branch).unwrap();
        let tip = data.get_branch_block_data(&hashes[hashes.len() - 1]).unwrap();

        prop_assert_eq!(data.get_ancestor(tip, tip.height).unwrap().block_hash, tip.block_hash);

        let k = 1 + (pick % chain_len);
        let found = data.get_ancestor(tip, k).unwrap();
        prop_assert_eq!(found.block_hash, hashes[(k - 1) as usize]);
    }
}

// ============================================================================
// END-TO-END SCENARIOS
// ============================================================================

/// Scenario 1: happy transfer main -> branch
#[test]
fn test_happy_transfer_main_to_branch() {
    let branch = hash_bytes(b"branch-alpha");
    let step1 = build_step1(branch, 100);
    let dest = ChainParams::branch(branch);
    let step2 = trellis_core::branch::make_branch_trans_step2_tx(&step1, &dest, None).unwrap();

    let bridge = StubBridge { step1: Some((step1, BRANCH_CHAIN_MATURITY + 1)) };
    check_branch_transaction(&step2, &dest, &bridge, false).unwrap();
}

/// Scenario 1b: immature step-1 is not yet accepted
#[test]
fn test_transfer_rejected_when_immature() {
    let branch = hash_bytes(b"branch-alpha");
    let step1 = build_step1(branch, 100);
    let dest = ChainParams::branch(branch);
    let step2 = trellis_core::branch::make_branch_trans_step2_tx(&step1, &dest, None).unwrap();

    let bridge = StubBridge { step1: Some((step1, BRANCH_CHAIN_MATURITY)) };
    let err = check_branch_transaction(&step2, &dest, &bridge, false).unwrap_err();
    assert_eq!(err.reason, "RPC confirmations not satisfy");
}

/// Scenario 2: tampered amount is rejected with the exact reason
#[test]
fn test_transfer_amount_tampered() {
    let branch = hash_bytes(b"branch-alpha");
    let step1 = build_step1(branch, 100);
    let dest = ChainParams::branch(branch);
    let mut step2 = trellis_core::branch::make_branch_trans_step2_tx(&step1, &dest, None).unwrap();

    // Raise the payout to 101 and rewrite the commitment in lockstep so
    // only the amount rule can catch it
    step2.vout[0].value = 101;
    let mut template = Transaction::from_hex(step1.send_to_tx_hex_data.as_ref().unwrap()).unwrap();
    template.vout[0].value = 101;
    let mut step1_tampered = step1.clone();
    step1_tampered.send_to_tx_hex_data = Some(template.to_hex());
    step2.from_tx = step1_tampered.to_bytes();

    let bridge = StubBridge { step1: Some((step1_tampered, BRANCH_CHAIN_MATURITY + 1)) };
    let err = check_branch_transaction(&step2, &dest, &bridge, false).unwrap_err();
    assert_eq!(err.reason, "GetValueOut larger than inAmount");
}

/// Scenario 3: header submit dedup
#[test]
fn test_header_submit_dedup() {
    let (mut db, _dir) = open_db();
    let branch = hash_bytes(b"branch-beta");
    db.add_branch_created(branch).unwrap();

    let coinbase = Transaction::coinbase(1, make_p2pkh_script(&receiver_keyid()));
    let stake = Transaction::coinbase(2, make_p2pkh_script(&receiver_keyid()));
    let vtx = vec![coinbase, stake];

    let mut header = BlockHeader::default();
    header.hash_prev_block = Hash::zero();
    let mut sync = Transaction::default();
    sync.version = TxVersion::SyncBranchInfo;
    sync.branch_block_data = Some(Box::new(BranchBlockInfo {
        header,
        branch_id: branch,
        block_height: 1,
        stake_tx_data: vtx[1].to_bytes(),
    }));

    // First submit passes the guard and lands in the store
    check_branch_duplicate_tx(&sync, None, &db).unwrap();
    db.add_block_info(sync.branch_block_data.as_ref().unwrap()).unwrap();

    // Second submit is a duplicate
    let err = check_branch_duplicate_tx(&sync, None, &db).unwrap_err();
    assert_eq!(err.kind, trellis_core::validation::RejectKind::Duplicate);
}

/// Build the report/prove fixture: a branch whose block B1 holds a
/// reported tx spending a p2pkh output from block B0, staked by a mine
/// coin derived from `mortgage_txid`
struct ReportFixture {
    db: BranchDb,
    _dir: tempfile::TempDir,
    branch: Hash,
    b1_hash: Hash,
    b1_vtx: Vec<Transaction>,
    b0_hash: Hash,
    b0_vtx: Vec<Transaction>,
    reported_tx: Transaction,
    mortgage_txid: Hash,
    miner_key: PrivateKey,
}

fn build_report_fixture() -> ReportFixture {
    let (mut db, dir) = open_db();
    let branch = hash_bytes(b"branch-gamma");
    db.add_branch_created(branch).unwrap();

    let owner = PrivateKey::generate();
    let miner_key = PrivateKey::generate();
    let mortgage_txid = hash_bytes(b"the-mortgage");

    // Block B0: funds the soon-to-be-reported tx
    let fund_tx = Transaction::coinbase(100, make_p2pkh_script(&owner.public_key().key_id()));
    let b0_vtx = vec![fund_tx.clone()];
    let b0_hash = add_branch_block(&mut db, branch, Hash::zero(), 1, &b0_vtx, Hash::zero(), Hash::zero());

    // The reported tx: spends the fund output, pays 90, fee 10
    let mut reported_tx = Transaction::default();
    reported_tx.vin.push(TxIn {
        prevout: OutPoint { hash: fund_tx.hash(), n: 0 },
        script_sig: Default::default(),
    });
    reported_tx.vout.push(TxOut {
        value: 90,
        script_pubkey: make_p2pkh_script(&receiver_keyid()),
    });
    let sig = owner.sign(&reported_tx.signing_hash());
    reported_tx.vin[0].script_sig = make_script_sig(&sig, &owner.public_key());

    // The stake tx spends the branch's mine coin
    let mut stake = Transaction::default();
    stake.vin.push(TxIn {
        prevout: OutPoint { hash: hash_bytes(b"mine-coin-tx"), n: 0 },
        script_sig: Default::default(),
    });
    stake.vout.push(TxOut {
        value: 5000,
        script_pubkey: make_mortgage_coin_script(&mortgage_txid, 1, &miner_key.public_key().key_id()),
    });

    let coinbase = Transaction::coinbase(10, make_p2pkh_script(&miner_key.public_key().key_id()));
    let b1_vtx = vec![coinbase, stake, reported_tx.clone()];
    let b1_hash = add_branch_block(&mut db, branch, b0_hash, 2, &b1_vtx, Hash::zero(), Hash::zero());

    ReportFixture {
        db,
        _dir: dir,
        branch,
        b1_hash,
        b1_vtx,
        b0_hash,
        b0_vtx,
        reported_tx,
        mortgage_txid,
        miner_key,
    }
}

fn report_tx_for(fixture: &ReportFixture) -> Transaction {
    let mut report = Transaction::default();
    report.version = TxVersion::Report;
    report.report_data = Some(Box::new(ReportData {
        report_type: ReportType::Tx,
        reported_branch_id: fixture.branch,
        reported_block_hash: fixture.b1_hash,
        reported_tx_hash: fixture.reported_tx.hash(),
        contract_data: None,
    }));
    report.spv_proof = Some(Box::new(spv_for(
        fixture.b1_hash,
        &fixture.b1_vtx,
        fixture.reported_tx.hash(),
    )));
    // The reporter's payout address rides on vout[0]
    report.vout.push(TxOut {
        value: 0,
        script_pubkey: make_p2pkh_script(&KeyId::of_pubkey(&[77u8; 32])),
    });
    report
}

fn prove_tx_for(fixture: &ReportFixture) -> Transaction {
    let mut prove = Transaction::default();
    prove.version = TxVersion::Prove;
    prove.prove_data = Some(Box::new(ProveData {
        prove_type: ReportType::Tx,
        branch_id: fixture.branch,
        block_hash: fixture.b1_hash,
        tx_hash: fixture.reported_tx.hash(),
        vtx_data: Vec::new(),
        vect_prove_data: vec![
            // Item 0: the proved tx itself, in B1
            ProveDataItem {
                block_hash: fixture.b1_hash,
                tx_data: fixture.reported_tx.to_bytes(),
                spv_proof: spv_for(fixture.b1_hash, &fixture.b1_vtx, fixture.reported_tx.hash()),
            },
            // Item 1: the funding tx it spends, in B0
            ProveDataItem {
                block_hash: fixture.b0_hash,
                tx_data: fixture.b0_vtx[0].to_bytes(),
                spv_proof: spv_for(fixture.b0_hash, &fixture.b0_vtx, fixture.b0_vtx[0].hash()),
            },
        ],
        vec_block_tx_prove: Vec::new(),
        contract_data: None,
    }));
    prove
}

/// Scenario 4: report, then a valid prove, then the redeem succeeds
#[test]
fn test_report_then_prove_then_redeem() {
    let mut fixture = build_report_fixture();

    // Report the (actually valid) tx; the store moves to Reported
    let report = report_tx_for(&fixture);
    check_report_cheat_tx(&report, &fixture.db).unwrap();
    let key = get_report_tx_hash_key(&report).unwrap();
    fixture
        .db
        .set_report_flag(key, ReportFlag::Reported, &fixture.branch, &fixture.b1_hash)
        .unwrap();

    // While the report stands, the mortgage cannot be redeemed
    let mut statement = Transaction::default();
    statement.version = TxVersion::RedeemMortgageStatement;
    statement.vout.push(TxOut {
        value: 0,
        script_pubkey: make_redeem_mortgage_script(&fixture.mortgage_txid),
    });
    let b2_vtx = vec![
        Transaction::coinbase(1, make_p2pkh_script(&fixture.miner_key.public_key().key_id())),
        statement.clone(),
    ];
    let mut blocked_db = fixture.db;
    let b2_hash = add_branch_block(
        &mut blocked_db,
        fixture.branch,
        fixture.b1_hash,
        3,
        &b2_vtx,
        Hash::zero(),
        Hash::zero(),
    );
    // Bury the statement past maturity
    let mut prev = b2_hash;
    let filler = vec![Transaction::coinbase(1, make_p2pkh_script(&receiver_keyid()))];
    for height in 4..(4 + BRANCH_CHAIN_MATURITY as u64) {
        prev = add_branch_block(
            &mut blocked_db,
            fixture.branch,
            prev,
            height,
            &filler,
            Hash::zero(),
            Hash::zero(),
        );
    }

    let spv = spv_for(b2_hash, &b2_vtx, statement.hash());
    let err = check_redeem_mortgage(&fixture.mortgage_txid, &statement, &spv, &fixture.branch, &blocked_db)
        .unwrap_err();
    assert_eq!(err.reason, "mortgage still under unproved report");

    // A valid prove flips the key to Proved
    fixture.db = blocked_db;
    let prove = prove_tx_for(&fixture);
    let vm_pool = ContractVmPool::new(2);
    check_prove_report_tx(&prove, &fixture.db, &vm_pool).unwrap();
    assert_eq!(get_prove_tx_hash_key(&prove).unwrap(), key);
    fixture
        .db
        .set_report_flag(key, ReportFlag::Proved, &fixture.branch, &fixture.b1_hash)
        .unwrap();

    // Now the redemption goes through
    check_redeem_mortgage(&fixture.mortgage_txid, &statement, &spv, &fixture.branch, &fixture.db)
        .unwrap();

    // Monotonicity: a second identical prove is a duplicate, and the
    // report can never be re-filed
    let err = check_branch_duplicate_tx(&prove, None, &fixture.db).unwrap_err();
    assert_eq!(err.kind, trellis_core::validation::RejectKind::Duplicate);
    let err = check_branch_duplicate_tx(&report, None, &fixture.db).unwrap_err();
    assert_eq!(err.kind, trellis_core::validation::RejectKind::Duplicate);
}

/// Scenario 5: an unanswered report matures into a slash
#[test]
fn test_report_matures_to_slash() {
    let mut fixture = build_report_fixture();

    let report = report_tx_for(&fixture);
    check_report_cheat_tx(&report, &fixture.db).unwrap();
    let key = get_report_tx_hash_key(&report).unwrap();
    fixture
        .db
        .set_report_flag(key, ReportFlag::Reported, &fixture.branch, &fixture.b1_hash)
        .unwrap();

    // The report tx sits in a main-chain block at height 10
    let report_block_hash = hash_bytes(b"main-block-with-report");
    let mut index = MemoryTxIndex::new();
    index.insert_block(report_block_hash, 10, std::slice::from_ref(&report));

    // The reward spends the mortgage output and pays half the stake to
    // the reporter's address
    let stake_value = 5000;
    let mut reward = Transaction::default();
    reward.version = TxVersion::ReportReward;
    reward.report_txid = Some(report.hash());
    reward.vin.push(TxIn {
        prevout: OutPoint { hash: fixture.mortgage_txid, n: 0 },
        script_sig: Default::default(),
    });
    reward.vout.push(TxOut {
        value: stake_value / 2,
        script_pubkey: report.vout[0].script_pubkey.clone(),
    });

    let main = ChainParams::main();

    // Too early: still in the prove window
    let err = check_report_reward_transaction(&reward, &fixture.db, &index, 10 + REPORT_OUTOF_HEIGHT - 1, &main)
        .unwrap_err();
    assert_eq!(err.reason, "Still in prove stage.");

    // At the deadline the reward is valid
    check_report_reward_transaction(&reward, &fixture.db, &index, 10 + REPORT_OUTOF_HEIGHT, &main)
        .unwrap();

    // Underpaying the reporter is invalid
    let mut stingy = reward.clone();
    stingy.vout[0].value = stake_value / 2 - 1;
    let err = check_report_reward_transaction(&stingy, &fixture.db, &index, 10 + REPORT_OUTOF_HEIGHT, &main)
        .unwrap_err();
    assert_eq!(err.reason, "invalid-reporter-out-value");

    // A proved report pays no reward
    fixture
        .db
        .set_report_flag(key, ReportFlag::Proved, &fixture.branch, &fixture.b1_hash)
        .unwrap();
    assert!(check_report_reward_transaction(&reward, &fixture.db, &index, 10 + REPORT_OUTOF_HEIGHT, &main)
        .is_err());
}

/// Scenario 6: contract-data fraud is confirmed
///
/// The reported tx claims it read contract state written in block T,
/// but an ancestor block P (with T < P <= reported) carries a newer
/// write for the same contract.
#[test]
fn test_contract_data_fraud_confirmed() {
    let (mut db, _dir) = open_db();
    let branch = hash_bytes(b"branch-delta");
    db.add_branch_created(branch).unwrap();

    let contract_id = KeyId::of_pubkey(&[5u8; 32]);
    let coinbase = vec![Transaction::coinbase(1, make_p2pkh_script(&receiver_keyid()))];

    // Chain: root(1) -> T(2) -> P(3) -> R(4)
    let root = add_branch_block(&mut db, branch, Hash::zero(), 1, &coinbase, Hash::zero(), Hash::zero());
    let t_hash = add_branch_block(&mut db, branch, root, 2, &coinbase, Hash::zero(), Hash::zero());

    // Block P commits the newer write through its final-data root
    let prove_tx_hash = hash_bytes(b"writer-tx");
    let mut prove_contract_data = BTreeMap::new();
    prove_contract_data.insert(contract_id, vec![9u8, 9, 9]);
    let prove_leaf = tx_hash_with_data(&prove_tx_hash, &prove_contract_data);
    let p_root_with_data = compute_merkle_root(&[prove_leaf], None);
    let p_hash = add_branch_block(&mut db, branch, t_hash, 3, &coinbase, Hash::zero(), p_root_with_data);

    // Block R commits the reported tx's stale prev-data through its
    // prev-data root
    let reported_tx_hash = hash_bytes(b"stale-reader-tx");
    let mut prev_data = ContractPrevData::default();
    prev_data.data_from.insert(
        contract_id,
        ContractPrevDataItem { block_hash: t_hash, tx_index: 0 },
    );
    let reported_leaf = tx_hash_with_prev_data(&reported_tx_hash, &prev_data);
    let r_root_with_prev = compute_merkle_root(&[reported_leaf], None);
    let r_hash = add_branch_block(&mut db, branch, p_hash, 4, &coinbase, r_root_with_prev, Hash::zero());

    let single_leaf_proof = |block_hash: Hash, leaf: Hash| {
        let mut txids = HashSet::new();
        txids.insert(leaf);
        SpvProof::build(block_hash, &[leaf], &txids)
    };

    let mut report = Transaction::default();
    report.version = TxVersion::Report;
    report.report_data = Some(Box::new(ReportData {
        report_type: ReportType::ContractData,
        reported_branch_id: branch,
        reported_block_hash: r_hash,
        reported_tx_hash,
        contract_data: Some(ReportContractData {
            reported_contract_prev_data: prev_data.clone(),
            reported_spv_proof: single_leaf_proof(r_hash, reported_leaf),
            prove_tx_hash,
            prove_contract_data: prove_contract_data.clone(),
            prove_spv_proof: single_leaf_proof(p_hash, prove_leaf),
        }),
    }));

    // P (height 3) wrote after T (height 2): fraud confirmed
    assert!(check_prove_contract_data(&report, &db));
    check_report_cheat_tx(&report, &db).unwrap();

    // If the claimed read origin is P itself, nothing newer exists and
    // the report fails
    let mut honest_prev = ContractPrevData::default();
    honest_prev.data_from.insert(
        contract_id,
        ContractPrevDataItem { block_hash: p_hash, tx_index: 0 },
    );
    let honest_leaf = tx_hash_with_prev_data(&reported_tx_hash, &honest_prev);
    let honest_root = compute_merkle_root(&[honest_leaf], None);
    let r2_hash = add_branch_block(&mut db, branch, r_hash, 5, &coinbase, honest_root, Hash::zero());

    let mut honest_report = report.clone();
    {
        let data = honest_report.report_data.as_mut().unwrap();
        data.reported_block_hash = r2_hash;
        let contract = data.contract_data.as_mut().unwrap();
        contract.reported_contract_prev_data = honest_prev;
        contract.reported_spv_proof = single_leaf_proof(r2_hash, honest_leaf);
    }
    assert!(!check_prove_contract_data(&honest_report, &db));
}

/// Connect-order dependency: a report in the same block as the header
/// submission it targets verifies only because the header lands first
#[test]
fn test_connect_block_absorbs_headers_in_order() {
    let (db, _dir) = open_db();
    let mut ctx = ChainCtx::new(ChainParams::main(), db);

    let branch_create = {
        let mut tx = Transaction::default();
        tx.version = TxVersion::BranchCreate;
        tx
    };
    ctx.apply_tx(&branch_create).unwrap();
    let branch = branch_create.hash();
    assert!(ctx.db.is_branch_created(&branch));

    // The store refuses a second identical header within one block via
    // the staged cache
    let stake = Transaction::coinbase(2, make_p2pkh_script(&receiver_keyid()));
    let miner = PrivateKey::generate();
    let mut header = BlockHeader::default();
    header.hash_prev_block = Hash::zero();
    header.bits = 0x2000ffff;
    header.time = 1000;
    header.prevout_stake = OutPoint { hash: hash_bytes(b"stake-prev"), n: 0 };
    loop {
        header.block_sig = None;
        header.sign(&miner);
        if trellis_core::chain::validate_pow(&header) {
            break;
        }
        header.nonce += 1;
    }
    let mut sync = Transaction::default();
    sync.version = TxVersion::SyncBranchInfo;
    sync.branch_block_data = Some(Box::new(BranchBlockInfo {
        header,
        branch_id: branch,
        block_height: 1,
        stake_tx_data: stake.to_bytes(),
    }));

    let block = Block::new(BlockHeader::default(), vec![sync.clone(), sync]);
    let err = ctx
        .connect_block_cross_chain(&block, 1, 0, None)
        .unwrap_err();
    assert_eq!(err.kind, trellis_core::validation::RejectKind::Duplicate);
}
