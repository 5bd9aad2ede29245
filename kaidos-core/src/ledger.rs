//! The single-writer ledger handle shared between the RPC server, the CLI
//! and the miner.
//!
//! Every mutation of the chain, UTXO set or mempool is serialized behind one
//! write lock; read-only queries take the read lock and see a consistent
//! snapshot. The peer list has its own lock. Mining never holds either lock:
//! the worker snapshots a template, scans outside, and submits the result
//! through the normal validation path, so a stale template is rejected as a
//! `BadBlockLink` rather than corrupting state.

use shared::{Address, Amount, ChainError, Result};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::block::Block;
use crate::blockchain::{Blockchain, NetworkParams};
use crate::consensus::run_consensus;
use crate::mempool::Mempool;
use crate::peers::PeerExchange;
use crate::storage::Storage;
use crate::transaction::{Transaction, TxOutput};
use crate::utxo::OutPoint;

struct LedgerState {
    chain: Blockchain,
    mempool: Mempool,
}

/// One node's ledger instance.
pub struct Ledger {
    state: RwLock<LedgerState>,
    peers: RwLock<Vec<String>>,
    storage: Box<dyn Storage + Send + Sync>,
}

impl Ledger {
    /// Creates a fresh ledger holding only the genesis block and persists it.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the initial state cannot be written durably.
    pub fn init(params: NetworkParams, storage: Box<dyn Storage + Send + Sync>) -> Result<Self> {
        if !storage.load_chain()?.is_empty() {
            return Err(ChainError::Io(
                "data directory already holds a chain".to_string(),
            ));
        }
        let chain = Blockchain::new(params)?;
        storage.save_chain(chain.blocks())?;
        storage.save_utxo_snapshot(chain.utxo_set())?;
        storage.save_mempool(&[])?;
        info!(genesis = %chain.tip().hash, "ledger initialized");
        Ok(Self {
            state: RwLock::new(LedgerState {
                chain,
                mempool: Mempool::new(),
            }),
            peers: RwLock::new(Vec::new()),
            storage,
        })
    }

    /// Recovers a ledger from storage. The chain is re-validated by replay
    /// from genesis; an invalid chain is fatal. The UTXO snapshot is only a
    /// cache: a missing or stale one is rebuilt from the replay. Mempool
    /// entries are pushed back through the normal submission path so stale
    /// ones are dropped rather than trusted.
    ///
    /// # Errors
    ///
    /// `StorageCorrupt` if no chain is stored or the stored chain does not
    /// replay.
    pub fn open(params: NetworkParams, storage: Box<dyn Storage + Send + Sync>) -> Result<Self> {
        let blocks = storage.load_chain()?;
        if blocks.is_empty() {
            return Err(ChainError::StorageCorrupt(
                "no chain on disk; run `node init` first".to_string(),
            ));
        }
        let chain = Blockchain::from_blocks(params, blocks)
            .map_err(|err| ChainError::StorageCorrupt(err.to_string()))?;

        match storage.load_utxo_snapshot()? {
            Some(snapshot) if snapshot == *chain.utxo_set() => {}
            Some(_) => {
                warn!("utxo snapshot disagrees with chain replay; rebuilding");
                storage.save_utxo_snapshot(chain.utxo_set())?;
            }
            None => storage.save_utxo_snapshot(chain.utxo_set())?,
        }

        let mut mempool = Mempool::new();
        for tx in storage.load_mempool()? {
            let txid = tx.txid;
            if let Err(err) = mempool.submit(tx, chain.utxo_set()) {
                warn!(%txid, %err, "dropping stale mempool transaction from disk");
            }
        }
        storage.save_mempool(&mempool.transactions())?;

        let peers = storage.load_peers()?;
        info!(height = chain.height(), peers = peers.len(), "ledger recovered");
        Ok(Self {
            state: RwLock::new(LedgerState { chain, mempool }),
            peers: RwLock::new(peers),
            storage,
        })
    }

    /// Admits a transaction to the mempool and persists the pool.
    ///
    /// # Errors
    ///
    /// The validation error, surfaced synchronously to the submitter.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<()> {
        let mut guard = self.write_state();
        let state = &mut *guard;
        state.mempool.submit(tx, state.chain.utxo_set())?;
        self.storage.save_mempool(&state.mempool.transactions())
    }

    /// Appends a block, evicts its transactions from the mempool and makes
    /// the new state durable before returning.
    ///
    /// # Errors
    ///
    /// The block's validation error; state is unchanged on failure.
    pub fn submit_block(&self, block: Block) -> Result<()> {
        let mut guard = self.write_state();
        let state = &mut *guard;
        state.chain.add_block(block)?;
        let tip = state.chain.tip().clone();
        state.mempool.remove_included(&tip);
        state.mempool.reconcile(state.chain.utxo_set());

        self.storage.save_block(&tip)?;
        self.storage.save_utxo_snapshot(state.chain.utxo_set())?;
        self.storage.save_mempool(&state.mempool.transactions())?;
        info!(height = state.chain.height(), hash = %tip.hash, "block appended");
        Ok(())
    }

    /// Snapshot for a mining worker: the chain as of now plus up to
    /// `max_transactions` mempool entries. Taken under the read lock and
    /// mined outside it.
    #[must_use]
    pub fn mining_snapshot(&self, max_transactions: usize) -> (Blockchain, Vec<Transaction>) {
        let state = self.read_state();
        (state.chain.clone(), state.mempool.take(max_transactions))
    }

    /// Runs one consensus round against the current peer list and persists
    /// the outcome if the chain changed. Returns the final height.
    ///
    /// # Errors
    ///
    /// Returns `Io` only for persistence failures; peer failures are skips.
    pub fn run_consensus(&self, exchange: &dyn PeerExchange) -> Result<u64> {
        let peers = self.peers();
        let mut guard = self.write_state();
        let state = &mut *guard;
        let before = state.chain.height();
        let height = run_consensus(&mut state.chain, &mut state.mempool, &peers, exchange);
        if height != before {
            self.storage.save_chain(state.chain.blocks())?;
            self.storage.save_utxo_snapshot(state.chain.utxo_set())?;
            self.storage.save_mempool(&state.mempool.transactions())?;
        }
        Ok(height)
    }

    #[must_use]
    pub fn height(&self) -> u64 {
        self.read_state().chain.height()
    }

    #[must_use]
    pub fn tip_hash(&self) -> shared::Hash256 {
        self.read_state().chain.tip().hash
    }

    #[must_use]
    pub fn balance(&self, address: &Address) -> Amount {
        self.read_state().chain.balance(address)
    }

    #[must_use]
    pub fn utxos_for(&self, address: &Address) -> Vec<(OutPoint, TxOutput)> {
        self.read_state().chain.utxo_set().by_address(address)
    }

    /// The whole chain, for `get_blocks` responses.
    #[must_use]
    pub fn chain_blocks(&self) -> Vec<Block> {
        self.read_state().chain.blocks().to_vec()
    }

    /// Blocks with heights in `start..=end`, clamped.
    #[must_use]
    pub fn block_range(&self, start: u64, end: u64) -> Vec<Block> {
        self.read_state().chain.block_range(start, end).to_vec()
    }

    #[must_use]
    pub fn mempool_size(&self) -> usize {
        self.read_state().mempool.len()
    }

    /// Records a peer address, durably.
    ///
    /// # Errors
    ///
    /// Returns `Io` on persistence failure.
    pub fn add_peer(&self, addr: &str) -> Result<()> {
        let mut peers = self.write_peers();
        if !peers.iter().any(|known| known == addr) {
            peers.push(addr.to_string());
        }
        self.storage.save_peer(addr)
    }

    #[must_use]
    pub fn peers(&self) -> Vec<String> {
        self.read_peers().clone()
    }

    // Lock poisoning only happens after a panic in another accessor, at
    // which point the process state is unrecoverable anyway.
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_peers(&self) -> std::sync::RwLockReadGuard<'_, Vec<String>> {
        self.peers.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_peers(&self) -> std::sync::RwLockWriteGuard<'_, Vec<String>> {
        self.peers.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::{Miner, MinerConfig};
    use crate::storage::FileStore;
    use crate::testutil::{payment, test_params};
    use shared::KeyPair;

    fn file_ledger(dir: &std::path::Path) -> Ledger {
        Ledger::init(test_params(), Box::new(FileStore::open(dir).unwrap())).unwrap()
    }

    fn mine_one(ledger: &Ledger, keys: &KeyPair) {
        let (chain, txs) = ledger.mining_snapshot(100);
        let miner = Miner::new(MinerConfig {
            reward_address: keys.address(),
            ..MinerConfig::default()
        });
        let result = miner.mine_block(&chain, txs).unwrap();
        ledger.submit_block(result.block).unwrap();
    }

    #[test]
    fn test_mine_submit_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = file_ledger(dir.path());
        let keys = KeyPair::generate();

        assert_eq!(ledger.height(), 0);
        mine_one(&ledger, &keys);
        assert_eq!(ledger.height(), 1);
        assert_eq!(ledger.balance(&keys.address()), Amount::from_coins(50));
        assert_eq!(ledger.utxos_for(&keys.address()).len(), 1);
    }

    #[test]
    fn test_stale_mining_template_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = file_ledger(dir.path());
        let keys = KeyPair::generate();

        let (stale_chain, _) = ledger.mining_snapshot(100);
        mine_one(&ledger, &keys);

        let miner = Miner::new(MinerConfig {
            reward_address: keys.address(),
            ..MinerConfig::default()
        });
        let stale = miner.mine_block(&stale_chain, vec![]).unwrap();
        assert!(matches!(
            ledger.submit_block(stale.block),
            Err(ChainError::BadBlockLink(_))
        ));
        assert_eq!(ledger.height(), 1);
    }

    #[test]
    fn test_restart_recovers_chain_mempool_and_peers() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyPair::generate();
        let tip;
        {
            let ledger = file_ledger(dir.path());
            mine_one(&ledger, &keys);
            let (chain, _) = ledger.mining_snapshot(0);
            let tx = payment(&chain, &keys, &keys.address(), Amount::from_coins(10));
            ledger.submit_transaction(tx).unwrap();
            ledger.add_peer("10.0.0.9:8332").unwrap();
            tip = ledger.tip_hash();
        }

        let store = Box::new(FileStore::open(dir.path()).unwrap());
        let reopened = Ledger::open(test_params(), store).unwrap();
        assert_eq!(reopened.height(), 1);
        assert_eq!(reopened.tip_hash(), tip);
        assert_eq!(reopened.mempool_size(), 1);
        assert_eq!(reopened.peers(), vec!["10.0.0.9:8332".to_string()]);
    }

    #[test]
    fn test_open_without_init_is_storage_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = Box::new(FileStore::open(dir.path()).unwrap());
        assert!(matches!(
            Ledger::open(test_params(), store),
            Err(ChainError::StorageCorrupt(_))
        ));
    }

    #[test]
    fn test_tampered_disk_chain_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyPair::generate();
        {
            let ledger = file_ledger(dir.path());
            mine_one(&ledger, &keys);
        }

        // Inflate the stored reward; replay must refuse it.
        let store = FileStore::open(dir.path()).unwrap();
        let mut blocks = store.load_chain().unwrap();
        blocks[1].transactions[0].outputs[0].amount = Amount::from_coins(1000);
        store.save_chain(&blocks).unwrap();

        assert!(matches!(
            Ledger::open(test_params(), Box::new(store)),
            Err(ChainError::StorageCorrupt(_))
        ));
    }

    #[test]
    fn test_stale_snapshot_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyPair::generate();
        {
            let ledger = file_ledger(dir.path());
            mine_one(&ledger, &keys);
        }

        let store = FileStore::open(dir.path()).unwrap();
        store.save_utxo_snapshot(&crate::utxo::UtxoSet::new()).unwrap();

        let reopened = Ledger::open(test_params(), Box::new(store)).unwrap();
        assert_eq!(reopened.balance(&keys.address()), Amount::from_coins(50));
        // And the cache on disk was refreshed.
        let store = FileStore::open(dir.path()).unwrap();
        assert!(!store.load_utxo_snapshot().unwrap().unwrap().is_empty());
    }
}
