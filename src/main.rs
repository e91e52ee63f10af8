//! TALLY node binary
//!
//! `tally run` starts a full node; `tally wallet new` creates a keystore
//! account; `tally balances list` prints the replayed chain state.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use tally_core::constants::{DEFAULT_HTTP_PORT, DEFAULT_IP};
use tally_core::crypto::Address;
use tally_core::node::{Node, NodeConfig};
use tally_core::p2p::PeerNode;
use tally_core::storage::{self, State};
use tally_core::wallet;

#[derive(Parser)]
#[command(name = "tally", version, about = "TALLY - an account-based proof-of-work ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a node: mining, peer sync and the HTTP surface
    Run {
        /// Data directory; a leading ~ expands to the home directory
        #[arg(long, default_value = "~/.tally")]
        datadir: String,

        #[arg(long, default_value = DEFAULT_IP)]
        ip: String,

        #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
        port: u16,

        /// Account credited with block rewards
        #[arg(long)]
        miner: Address,

        /// Bootstrap peer host; port and account must come with it
        #[arg(long, requires = "bootstrap_port")]
        bootstrap_ip: Option<String>,

        #[arg(long, requires = "bootstrap_account")]
        bootstrap_port: Option<u16>,

        #[arg(long, requires = "bootstrap_ip")]
        bootstrap_account: Option<Address>,
    },

    /// Keystore management
    Wallet {
        #[command(subcommand)]
        command: WalletCommand,
    },

    /// Chain state inspection
    Balances {
        #[command(subcommand)]
        command: BalancesCommand,
    },
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Generate a key and store it in the keystore
    New {
        #[arg(long, default_value = "~/.tally")]
        datadir: String,
    },
}

#[derive(Subcommand)]
enum BalancesCommand {
    /// Replay the chain and print every balance
    List {
        #[arg(long, default_value = "~/.tally")]
        datadir: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally_core=info,tally=info".into()),
        )
        .init();

    match Cli::parse().command {
        Command::Run {
            datadir,
            ip,
            port,
            miner,
            bootstrap_ip,
            bootstrap_port,
            bootstrap_account,
        } => {
            let data_dir = storage::expand_path(&datadir);

            let mut config = NodeConfig::new(&data_dir, &ip, port, miner);
            if let (Some(b_ip), Some(b_port), Some(b_account)) =
                (bootstrap_ip, bootstrap_port, bootstrap_account)
            {
                config = config
                    .with_bootstrap(PeerNode::new(&b_ip, b_port, true, b_account, true));
            }

            let node = Node::new(config).context("opening node state")?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            });

            node.run(shutdown_rx).await?;
        }

        Command::Wallet {
            command: WalletCommand::New { datadir },
        } => {
            let data_dir = storage::expand_path(&datadir);
            let address = wallet::new_keystore_account(&data_dir)
                .context("creating keystore account")?;
            println!("{address}");
        }

        Command::Balances {
            command: BalancesCommand::List { datadir },
        } => {
            let data_dir = storage::expand_path(&datadir);
            let state = State::new_from_disk(&data_dir).context("replaying chain state")?;

            println!("Account balances at {}:", state.latest_block_hash());
            let mut balances: Vec<_> = state.balances().iter().collect();
            balances.sort_by_key(|(account, _)| **account);
            for (account, balance) in balances {
                println!("{account}: {balance}");
            }
        }
    }

    Ok(())
}
