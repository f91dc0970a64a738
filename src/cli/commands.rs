use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "fractal-chain")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(name = "getbalance", about = "Get the balance of an address")]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "send", about = "Sign and submit a transfer")]
    Send {
        #[arg(help = "Source wallet address (must be in the local wallet file)")]
        from: String,
        #[arg(help = "Destination address")]
        to: String,
        #[arg(help = "Amount in base units")]
        amount: u64,
        #[arg(long, default_value_t = 0, help = "Fee in base units")]
        fee: u64,
    },
    #[command(name = "printchain", about = "Print every block from genesis to tip")]
    Printchain,
    #[command(name = "startnode", about = "Start the P2P node")]
    StartNode {
        #[arg(long, help = "Enable mining, paying rewards to this address")]
        miner: Option<String>,
    },
}
