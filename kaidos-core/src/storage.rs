//! Durable persistence for the chain, the UTXO snapshot, the mempool and
//! the peer list.

use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{ChainError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::block::Block;
use crate::transaction::Transaction;
use crate::utxo::UtxoSet;

/// Persistence contract of the ledger. Writes that alter consensus-critical
/// state (chain append, chain replace) must be durable before returning
/// success; snapshots of derived state are caches and may be rebuilt.
pub trait Storage {
    /// Appends one block to the stored chain.
    fn save_block(&self, block: &Block) -> Result<()>;
    /// Replaces the stored chain wholesale (consensus adoption).
    fn save_chain(&self, blocks: &[Block]) -> Result<()>;
    /// The stored chain, genesis first; empty if never initialized.
    fn load_chain(&self) -> Result<Vec<Block>>;

    fn save_utxo_snapshot(&self, utxos: &UtxoSet) -> Result<()>;
    fn load_utxo_snapshot(&self) -> Result<Option<UtxoSet>>;

    fn save_mempool(&self, transactions: &[Transaction]) -> Result<()>;
    fn load_mempool(&self) -> Result<Vec<Transaction>>;

    fn save_peer(&self, addr: &str) -> Result<()>;
    fn load_peers(&self) -> Result<Vec<String>>;
}

/// JSON files under one data directory.
///
/// Every write lands in a temp file first, is fsynced, then renamed over the
/// live one, so a crash never leaves a half-written chain behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

const CHAIN_FILE: &str = "chain.json";
const UTXO_FILE: &str = "utxo.json";
const MEMPOOL_FILE: &str = "mempool.json";
const PEERS_FILE: &str = "peers.json";

impl FileStore {
    /// Opens (creating if needed) the data directory.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| ChainError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| ChainError::Serialization(e.to_string()))?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));

        let io = |e: std::io::Error| ChainError::Io(e.to_string());
        let mut file = File::create(&tmp).map_err(io)?;
        file.write_all(&bytes).map_err(io)?;
        file.sync_all().map_err(io)?;
        fs::rename(&tmp, &path).map_err(io)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| ChainError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ChainError::StorageCorrupt(format!("{name}: {e}")))
    }
}

impl Storage for FileStore {
    fn save_block(&self, block: &Block) -> Result<()> {
        let mut blocks = self.load_chain()?;
        blocks.push(block.clone());
        self.write_json(CHAIN_FILE, &blocks)
    }

    fn save_chain(&self, blocks: &[Block]) -> Result<()> {
        self.write_json(CHAIN_FILE, &blocks)
    }

    fn load_chain(&self) -> Result<Vec<Block>> {
        Ok(self.read_json(CHAIN_FILE)?.unwrap_or_default())
    }

    fn save_utxo_snapshot(&self, utxos: &UtxoSet) -> Result<()> {
        self.write_json(UTXO_FILE, utxos)
    }

    fn load_utxo_snapshot(&self) -> Result<Option<UtxoSet>> {
        self.read_json(UTXO_FILE)
    }

    fn save_mempool(&self, transactions: &[Transaction]) -> Result<()> {
        self.write_json(MEMPOOL_FILE, &transactions)
    }

    fn load_mempool(&self) -> Result<Vec<Transaction>> {
        Ok(self.read_json(MEMPOOL_FILE)?.unwrap_or_default())
    }

    fn save_peer(&self, addr: &str) -> Result<()> {
        let mut peers = self.load_peers()?;
        if !peers.iter().any(|known| known == addr) {
            peers.push(addr.to_string());
            self.write_json(PEERS_FILE, &peers)?;
        }
        Ok(())
    }

    fn load_peers(&self) -> Result<Vec<String>> {
        Ok(self.read_json(PEERS_FILE)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{funded_chain, payment};
    use shared::Amount;

    #[test]
    fn test_chain_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.load_chain().unwrap().is_empty());

        let (chain, _keys) = funded_chain(2);
        for block in chain.blocks() {
            store.save_block(block).unwrap();
        }
        assert_eq!(store.load_chain().unwrap(), chain.blocks());

        // Wholesale replacement overwrites the append history.
        store.save_chain(&chain.blocks()[..1]).unwrap();
        assert_eq!(store.load_chain().unwrap().len(), 1);
    }

    #[test]
    fn test_utxo_and_mempool_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.load_utxo_snapshot().unwrap().is_none());

        let (chain, keys) = funded_chain(1);
        store.save_utxo_snapshot(chain.utxo_set()).unwrap();
        assert_eq!(
            store.load_utxo_snapshot().unwrap().unwrap(),
            *chain.utxo_set()
        );

        let tx = payment(&chain, &keys, &keys.address(), Amount::from_coins(10));
        store.save_mempool(&[tx.clone()]).unwrap();
        assert_eq!(store.load_mempool().unwrap(), vec![tx]);
    }

    #[test]
    fn test_peer_list_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.save_peer("10.0.0.1:8332").unwrap();
        store.save_peer("10.0.0.2:8332").unwrap();
        store.save_peer("10.0.0.1:8332").unwrap();
        assert_eq!(
            store.load_peers().unwrap(),
            vec!["10.0.0.1:8332".to_string(), "10.0.0.2:8332".to_string()]
        );
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join(CHAIN_FILE), b"{ not json").unwrap();
        assert!(matches!(
            store.load_chain(),
            Err(ChainError::StorageCorrupt(_))
        ));
    }
}
