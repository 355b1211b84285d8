//! TRELLIS (TRL) Multi-Chain Node
//!
//! Main entry point for running a TRELLIS node, serving either the
//! main chain or one branch chain.

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use trellis_core::branch::BranchDb;
use trellis_core::node::{ChainCtx, MemoryTxIndex, NodeConfig};
use trellis_core::rpc::{start_rpc_server, BranchChainMan, NodeState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║              TRELLIS (TRL) MULTI-CHAIN NODE              ║");
    println!("║         Main Chain · Branch Chains · Cross-Chain         ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "trellis.json".to_string());
    let config = match NodeConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            println!("No usable config at {} ({}); using defaults", config_path, err);
            NodeConfig::default()
        }
    };

    let params = config.chain_params()?;
    println!("Chain:       {}", params.branch_id);
    println!("Database:    {}", config.db_path);
    println!("RPC port:    {}", config.listen_port);
    println!();

    let db = BranchDb::open(&config.db_path)?;
    let mut ctx = ChainCtx::new(params, db);
    ctx.uncheck_branch_tx_in_verify_db = config.uncheck_branch_tx_in_verify_db;
    ctx.uncheck_no_config_branch = config.uncheck_no_config_branch;

    let mut chain_man = BranchChainMan::new();
    chain_man.init(config.main_chain_cfg.as_deref(), &config.branch_cfgs);
    let chain_man = Arc::new(Mutex::new(chain_man));

    let state = Arc::new(NodeState {
        ctx: Mutex::new(ctx),
        chain_man,
        tx_index: Mutex::new(MemoryTxIndex::new()),
        chain_height: AtomicU64::new(0),
    });

    start_rpc_server(state, config.listen_port).await?;
    Ok(())
}
