//! The Kaidos wallet CLI: key management, balance queries and building
//! signed transactions against a node's UTXO view.

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use kaidos::network::HttpPeers;
use kaidos_core::{wallet, PeerExchange, UtxoSet};
use shared::{Address, Amount, ChainError, KeyPair, Result};

#[derive(Parser)]
#[command(name = "wallet", about = "Kaidos wallet", version)]
struct Cli {
    /// Directory holding wallet key files.
    #[arg(long, default_value = "./kaidos-wallets")]
    dir: PathBuf,

    /// Node RPC address (host:port) used for UTXO queries and broadcasting.
    #[arg(long, default_value = "127.0.0.1:8332")]
    node: String,

    /// Log filter (tracing env-filter syntax).
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a keypair and address
    Create,
    /// List wallet addresses
    List,
    /// Sum of unspent outputs for ADDRESS
    Balance { address: String },
    /// Build and sign a payment; broadcast it, or write it to --output
    Tx {
        from: String,
        to: String,
        amount: String,
        /// Write the signed transaction to this file instead of broadcasting
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List unspent outpoints for ADDRESS
    Utxos { address: String },
}

/// On-disk wallet record, one file per address.
#[derive(Debug, Serialize, Deserialize)]
struct WalletFile {
    address: Address,
    public_key: String,
    secret_key: String,
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
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn")),
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
    match cli.command {
        Commands::Create => {
            let keys = KeyPair::generate();
            let record = WalletFile {
                address: keys.address(),
                public_key: keys.public_key_hex(),
                secret_key: keys.secret_hex(),
            };
            write_wallet(&cli.dir, &record)?;
            println!("{}", record.address);
            Ok(())
        }
        Commands::List => {
            for address in list_wallets(&cli.dir)? {
                println!("{address}");
            }
            Ok(())
        }
        Commands::Balance { address } => {
            let address: Address = parse_arg(&address)?;
            let utxos = fetch_utxos(&cli.node, &address)?;
            let total = utxos
                .iter()
                .map(|(_, output)| output.amount.units())
                .sum::<u64>();
            println!("{}", Amount::from_units(total));
            Ok(())
        }
        Commands::Utxos { address } => {
            let address: Address = parse_arg(&address)?;
            for (outpoint, output) in fetch_utxos(&cli.node, &address)? {
                println!("{outpoint} {}", output.amount);
            }
            Ok(())
        }
        Commands::Tx {
            from,
            to,
            amount,
            output,
        } => {
            let from: Address = parse_arg(&from)?;
            let to: Address = parse_arg(&to)?;
            let amount: Amount = parse_arg(&amount)?;

            let keys = load_keys(&cli.dir, &from)?;
            let mut view = UtxoSet::new();
            for (outpoint, utxo) in fetch_utxos(&cli.node, &from)? {
                view.insert(outpoint, utxo);
            }

            let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;
            let tx = wallet::build_transaction(&keys, &view, &to, amount, timestamp)?;

            match output {
                Some(path) => {
                    let rendered = serde_json::to_string_pretty(&tx)
                        .map_err(|e| ChainError::Serialization(e.to_string()))?;
                    std::fs::write(&path, rendered).map_err(|e| ChainError::Io(e.to_string()))?;
                    println!("{} written to {}", tx.txid, path.display());
                }
                None => {
                    HttpPeers::new()?.broadcast_tx(&cli.node, &tx)?;
                    println!("{} broadcast to {}", tx.txid, cli.node);
                }
            }
            Ok(())
        }
    }
}

fn wallet_path(dir: &Path, address: &Address) -> PathBuf {
    dir.join(format!("{address}.json"))
}

fn write_wallet(dir: &Path, record: &WalletFile) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| ChainError::Io(e.to_string()))?;
    let rendered = serde_json::to_string_pretty(record)
        .map_err(|e| ChainError::Serialization(e.to_string()))?;
    std::fs::write(wallet_path(dir, &record.address), rendered)
        .map_err(|e| ChainError::Io(e.to_string()))
}

fn list_wallets(dir: &Path) -> Result<Vec<Address>> {
    let mut found = Vec::new();
    if !dir.exists() {
        return Ok(found);
    }
    let entries = std::fs::read_dir(dir).map_err(|e| ChainError::Io(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| ChainError::Io(e.to_string()))?;
        let name = entry.file_name();
        if let Some(address) = name
            .to_str()
            .and_then(|name| name.strip_suffix(".json"))
            .and_then(|stem| stem.parse::<Address>().ok())
        {
            found.push(address);
        }
    }
    found.sort();
    Ok(found)
}

fn load_keys(dir: &Path, address: &Address) -> Result<KeyPair> {
    let path = wallet_path(dir, address);
    let bytes = std::fs::read(&path)
        .map_err(|_| ChainError::MalformedKey(format!("no wallet file for {address}")))?;
    let record: WalletFile = serde_json::from_slice(&bytes)
        .map_err(|e| ChainError::MalformedKey(format!("{}: {e}", path.display())))?;
    let keys = KeyPair::from_secret_hex(&record.secret_key)?;
    if keys.address() != *address {
        return Err(ChainError::MalformedKey(format!(
            "wallet file {} does not match its address",
            path.display()
        )));
    }
    Ok(keys)
}

fn fetch_utxos(
    node: &str,
    address: &Address,
) -> Result<Vec<(kaidos_core::OutPoint, kaidos_core::TxOutput)>> {
    HttpPeers::new()?.get_utxos(node, address)
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
