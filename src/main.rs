use clap::Parser;
use fractal_chain::core::format_units;
use fractal_chain::{
    validate_address, Blockchain, ChainError, Command, Opt, Server, Transaction, WalletStore,
    GLOBAL_CONFIG,
};
use log::{error, LevelFilter};
use std::process;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(e.exit_code());
    }
}

fn run_command(command: Command) -> Result<(), ChainError> {
    match command {
        Command::Createwallet => {
            let mut store = WalletStore::open_default()?;
            let address = store.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::ListAddresses => {
            let store = WalletStore::open_default()?;
            for address in store.addresses() {
                println!("{address}")
            }
        }
        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(ChainError::Format(format!("Invalid address: {address}")));
            }
            let blockchain = open_blockchain()?;
            let balance = blockchain.get_balance(&address)?;
            println!("Balance of {address}: {}", format_units(balance));
        }
        Command::Send {
            from,
            to,
            amount,
            fee,
        } => {
            if !validate_address(&from) {
                return Err(ChainError::Format(format!("Invalid sender address: {from}")));
            }
            if !validate_address(&to) {
                return Err(ChainError::Format(format!(
                    "Invalid recipient address: {to}"
                )));
            }

            let store = WalletStore::open_default()?;
            let (secret, public) = store.signing_keys(&from)?;

            let blockchain = open_blockchain()?;
            let timestamp = fractal_chain::utils::current_timestamp()?;
            let mut tx = Transaction::new_transfer(&from, &to, amount, fee, timestamp);
            tx.sign(&secret, &public)?;
            let txid = tx.get_txid().to_string();
            blockchain.submit_transaction(tx)?;
            println!("Submitted transaction {txid}");
        }
        Command::Printchain => {
            let blockchain = open_blockchain()?;
            for index in 0..=blockchain.height()? {
                if let Some(block) = blockchain.get_block_by_index(index)? {
                    println!("Block {index}: {}", block.get_hash());
                    println!("  prev: {}", block.get_prev_hash());
                    println!("  timestamp: {}", block.get_timestamp());
                    println!(
                        "  dimension: {} (seed {})",
                        block.get_fractal_dimension(),
                        block.get_fractal_seed()
                    );
                    for tx in block.get_transactions() {
                        if tx.is_coinbase() {
                            println!(
                                "  - coinbase {} -> {} ({})",
                                tx.get_txid(),
                                tx.get_to_address(),
                                format_units(tx.get_amount())
                            );
                        } else {
                            println!(
                                "  - tx {} {} -> {} ({}, fee {})",
                                tx.get_txid(),
                                tx.get_from_address(),
                                tx.get_to_address(),
                                format_units(tx.get_amount()),
                                format_units(tx.get_fee())
                            );
                        }
                    }
                }
            }
        }
        Command::StartNode { miner } => {
            let socket_addr = GLOBAL_CONFIG.get_node_addr();
            let node_id = GLOBAL_CONFIG.extract_node_id_from_addr();
            GLOBAL_CONFIG.set_node_id(node_id);

            if let Some(addr) = &miner {
                if !validate_address(addr) {
                    return Err(ChainError::Config(format!("Invalid miner address: {addr}")));
                }
                println!("Mining is on. Address to receive rewards: {addr}");
                GLOBAL_CONFIG.set_mining_addr(addr.clone());
            }

            let blockchain = open_blockchain()?;
            let server = Server::new(blockchain, &socket_addr, miner);
            server.run()?
        }
    }
    Ok(())
}

fn open_blockchain() -> Result<Blockchain, ChainError> {
    match GLOBAL_CONFIG.get_node_id() {
        Some(node_id) => Blockchain::open_with_node_id(&node_id),
        None => Blockchain::open_default(),
    }
}
