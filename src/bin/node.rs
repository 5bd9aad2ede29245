//! The Kaidos node CLI: storage init, the RPC server, one-shot mining,
//! transaction submission, chain queries, consensus and peer management.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kaidos::network::{self, HttpPeers};
use kaidos_core::{
    FileStore, Ledger, Miner, MinerConfig, NetworkParams, PeerExchange, Storage, Transaction,
};
use shared::{Address, ChainError, Result};

/// How often the running node reconciles with its peers.
const CONSENSUS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "node", about = "Kaidos ledger node", version)]
struct Cli {
    /// Data directory holding the chain, UTXO, mempool and peer files.
    #[arg(long, default_value = "./kaidos-data")]
    data_dir: PathBuf,

    /// Log filter (tracing env-filter syntax).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage and the genesis block
    Init,
    /// Run the RPC server with a periodic consensus task
    Start {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8332)]
        port: u16,
    },
    /// Mine one block, paying the reward to ADDRESS
    Mine { address: String },
    /// Submit a transaction read from a JSON file
    Send { file: PathBuf },
    /// Print a range of blocks as JSON
    Blocks {
        #[arg(long)]
        start: Option<u64>,
        #[arg(long)]
        end: Option<u64>,
    },
    /// Reconcile with peers and adopt the longest valid chain
    Consensus,
    /// Record a peer address (host:port)
    AddPeer { addr: String },
    /// List known peers
    ListPeers,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::from(3),
            };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let store = FileStore::open(&cli.data_dir)?;
    let params = NetworkParams::default();

    match cli.command {
        Commands::Init => {
            let ledger = Ledger::init(params, Box::new(store))?;
            println!("initialized; genesis {}", ledger.tip_hash());
            Ok(())
        }
        Commands::Start { host, port } => {
            let ledger = Arc::new(Ledger::open(params, Box::new(store))?);
            serve(ledger, &host, port)
        }
        Commands::Mine { address } => {
            let address: Address = parse_arg(&address)?;
            let ledger = Ledger::open(params, Box::new(store))?;

            let config = MinerConfig {
                reward_address: address,
                ..MinerConfig::default()
            };
            let (chain, transactions) = ledger.mining_snapshot(config.max_transactions);
            let miner = Miner::new(config);
            let result = miner.mine_block(&chain, transactions)?;
            let block = result.block.clone();
            ledger.submit_block(result.block)?;
            println!(
                "mined block {} ({}) in {} attempts",
                block.index, block.hash, result.attempts
            );

            broadcast(&ledger.peers(), |peers_client, peer| {
                peers_client.broadcast_block(peer, &block)
            });
            Ok(())
        }
        Commands::Send { file } => {
            let bytes = std::fs::read(&file).map_err(|e| ChainError::Io(e.to_string()))?;
            let tx: Transaction = serde_json::from_slice(&bytes)
                .map_err(|e| ChainError::Serialization(format!("{}: {e}", file.display())))?;
            let txid = tx.txid;

            let ledger = Ledger::open(params, Box::new(store))?;
            ledger.submit_transaction(tx.clone())?;
            println!("accepted {txid}");

            broadcast(&ledger.peers(), |peers_client, peer| {
                peers_client.broadcast_tx(peer, &tx)
            });
            Ok(())
        }
        Commands::Blocks { start, end } => {
            let ledger = Ledger::open(params, Box::new(store))?;
            let end = end.unwrap_or_else(|| ledger.height());
            let blocks = ledger.block_range(start.unwrap_or(0), end);
            let rendered = serde_json::to_string_pretty(&blocks)
                .map_err(|e| ChainError::Serialization(e.to_string()))?;
            println!("{rendered}");
            Ok(())
        }
        Commands::Consensus => {
            let ledger = Ledger::open(params, Box::new(store))?;
            let client = HttpPeers::new()?;
            let height = ledger.run_consensus(&client)?;
            println!("height {height}, tip {}", ledger.tip_hash());
            Ok(())
        }
        Commands::AddPeer { addr } => {
            store.save_peer(&addr)?;
            println!("added {addr}");
            Ok(())
        }
        Commands::ListPeers => {
            for peer in store.load_peers()? {
                println!("{peer}");
            }
            Ok(())
        }
    }
}

/// Best-effort broadcast: peer failures are logged and skipped.
fn broadcast<F>(peers: &[String], send: F)
where
    F: Fn(&HttpPeers, &str) -> Result<()>,
{
    let client = match HttpPeers::new() {
        Ok(client) => client,
        Err(err) => {
            warn!(%err, "peer client unavailable; skipping broadcast");
            return;
        }
    };
    for peer in peers {
        match send(&client, peer) {
            Ok(()) => info!(peer = %peer, "broadcast delivered"),
            Err(err) => warn!(peer = %peer, %err, "broadcast skipped"),
        }
    }
}

/// Runs the RPC server plus the periodic consensus task.
fn serve(ledger: Arc<Ledger>, host: &str, port: u16) -> Result<()> {
    let runtime =
        tokio::runtime::Runtime::new().map_err(|e| ChainError::Io(e.to_string()))?;
    runtime.block_on(async {
        let consensus_ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CONSENSUS_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let ledger = Arc::clone(&consensus_ledger);
                // The blocking HTTP client must stay off the async workers.
                let outcome = tokio::task::spawn_blocking(move || {
                    let client = HttpPeers::new()?;
                    ledger.run_consensus(&client)
                })
                .await;
                match outcome {
                    Ok(Ok(height)) => info!(height, "consensus round finished"),
                    Ok(Err(err)) => warn!(%err, "consensus round failed"),
                    Err(err) => warn!(%err, "consensus task panicked"),
                }
            }
        });
        network::serve(ledger, host, port).await
    })
}

/// Parses a positional argument, mapping failures to exit code 3.
fn parse_arg<T>(value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = ChainError>,
{
    value.parse().map_err(|err: ChainError| {
        eprintln!("error: {err}");
        std::process::exit(3);
    })
}
