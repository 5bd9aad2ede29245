//! The transport contract the consensus layer relies on.
//!
//! Trust is derived from full validation of everything a peer returns,
//! never from the peer's identity; `get_utxos` in particular is advisory
//! and is only used by wallets to assemble payment views.

use shared::{Address, Result};

use crate::block::Block;
use crate::transaction::{Transaction, TxOutput};
use crate::utxo::OutPoint;

/// Capabilities any peer transport must provide. Implementations enforce a
/// per-call timeout and report failures as `PeerUnavailable`,
/// `PeerMalformed` or `Timeout`; callers treat those as skips.
pub trait PeerExchange {
    /// The peer's full chain, genesis first.
    fn get_blocks(&self, peer: &str) -> Result<Vec<Block>>;

    /// The peer's view of the outputs payable to `address`.
    fn get_utxos(&self, peer: &str, address: &Address) -> Result<Vec<(OutPoint, TxOutput)>>;

    /// Offers a transaction for the peer's mempool.
    fn broadcast_tx(&self, peer: &str, tx: &Transaction) -> Result<()>;

    /// Offers a freshly mined block.
    fn broadcast_block(&self, peer: &str, block: &Block) -> Result<()>;

    /// The peer's own peer list, for gossip-style discovery.
    fn exchange_peers(&self, peer: &str) -> Result<Vec<String>>;
}
