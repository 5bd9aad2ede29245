//! Longest-valid-chain consensus over a bounded peer list.

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::mempool::Mempool;
use crate::peers::PeerExchange;

/// Overall deadline for one consensus run, on top of the transport's
/// per-call timeout.
const RUN_DEADLINE: Duration = Duration::from_secs(60);

/// Pulls each peer's chain, then tries the strictly-longer candidates from
/// longest to shortest until one replays cleanly. Individual peer failures
/// are logged and skipped; the run itself never fails. Returns the final
/// local height.
pub fn run_consensus(
    chain: &mut Blockchain,
    mempool: &mut Mempool,
    peers: &[String],
    exchange: &dyn PeerExchange,
) -> u64 {
    let started = Instant::now();
    let cap = chain.params().consensus_peer_cap;
    let mut candidates: Vec<(String, Vec<Block>)> = Vec::new();
    for peer in peers.iter().take(cap) {
        if started.elapsed() > RUN_DEADLINE {
            warn!("consensus run deadline reached; skipping remaining peers");
            break;
        }
        match exchange.get_blocks(peer) {
            Ok(blocks) => candidates.push((peer.clone(), blocks)),
            Err(err) => warn!(peer = %peer, %err, "skipping unreachable peer"),
        }
    }
    candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    for (peer, blocks) in candidates {
        if blocks.len() <= chain.blocks().len() {
            break;
        }
        match chain.replace_chain(blocks) {
            Ok(()) => {
                info!(peer = %peer, height = chain.height(), tip = %chain.tip().hash, "adopted peer chain");
                mempool.reconcile(chain.utxo_set());
                break;
            }
            Err(err) => warn!(peer = %peer, %err, "candidate chain rejected"),
        }
    }

    chain.height()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{funded_chain, mine_to, payment, test_params};
    use crate::transaction::{Transaction, TxOutput};
    use crate::utxo::OutPoint;
    use shared::{Address, Amount, ChainError, KeyPair, Result};
    use std::collections::HashMap;

    /// In-memory transport serving canned chains.
    struct StubPeers {
        chains: HashMap<String, Vec<Block>>,
    }

    impl PeerExchange for StubPeers {
        fn get_blocks(&self, peer: &str) -> Result<Vec<Block>> {
            self.chains
                .get(peer)
                .cloned()
                .ok_or_else(|| ChainError::PeerUnavailable(peer.to_string()))
        }

        fn get_utxos(&self, _peer: &str, _address: &Address) -> Result<Vec<(OutPoint, TxOutput)>> {
            Ok(Vec::new())
        }

        fn broadcast_tx(&self, _peer: &str, _tx: &Transaction) -> Result<()> {
            Ok(())
        }

        fn broadcast_block(&self, _peer: &str, _block: &Block) -> Result<()> {
            Ok(())
        }

        fn exchange_peers(&self, _peer: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn chain_of_height(height: u64) -> Blockchain {
        let keys = KeyPair::generate();
        let mut chain = Blockchain::new(test_params()).unwrap();
        for _ in 0..height {
            mine_to(&mut chain, &keys, vec![]);
        }
        chain
    }

    #[test]
    fn test_adopts_the_longest_valid_chain() {
        let (mut chain, _keys) = funded_chain(1);
        let mut mempool = Mempool::new();

        let three = chain_of_height(3);
        let five = chain_of_height(5);
        let stub = StubPeers {
            chains: HashMap::from([
                ("a:1".to_string(), three.blocks().to_vec()),
                ("b:1".to_string(), five.blocks().to_vec()),
            ]),
        };
        let peers = vec!["a:1".to_string(), "b:1".to_string(), "down:1".to_string()];

        let height = run_consensus(&mut chain, &mut mempool, &peers, &stub);
        assert_eq!(height, 5);
        assert_eq!(chain.blocks(), five.blocks());
    }

    #[test]
    fn test_falls_back_when_the_longest_is_invalid() {
        let (mut chain, _keys) = funded_chain(1);
        let mut mempool = Mempool::new();

        let mut forged = chain_of_height(6).blocks().to_vec();
        forged[4].transactions[0].outputs[0].amount = Amount::from_coins(900);
        let honest = chain_of_height(4);

        let stub = StubPeers {
            chains: HashMap::from([
                ("forged:1".to_string(), forged),
                ("honest:1".to_string(), honest.blocks().to_vec()),
            ]),
        };
        let peers = vec!["forged:1".to_string(), "honest:1".to_string()];

        let height = run_consensus(&mut chain, &mut mempool, &peers, &stub);
        assert_eq!(height, 4);
        assert_eq!(chain.blocks(), honest.blocks());
    }

    #[test]
    fn test_keeps_incumbent_on_ties_and_failures() {
        let (mut chain, _keys) = funded_chain(3);
        let mut mempool = Mempool::new();
        let before = chain.blocks().to_vec();

        let tied = chain_of_height(3);
        let stub = StubPeers {
            chains: HashMap::from([("tied:1".to_string(), tied.blocks().to_vec())]),
        };
        let peers = vec!["tied:1".to_string(), "gone:1".to_string()];

        let height = run_consensus(&mut chain, &mut mempool, &peers, &stub);
        assert_eq!(height, 3);
        assert_eq!(chain.blocks(), &before[..]);
    }

    #[test]
    fn test_reconciles_the_mempool_after_adoption() {
        let (mut chain, alice) = funded_chain(1);
        let bob = KeyPair::generate();
        let tx = payment(&chain, &alice, &bob.address(), Amount::from_coins(5));
        let mut mempool = Mempool::new();
        mempool.submit(tx, chain.utxo_set()).unwrap();

        // The adopted history never paid alice, so her spend must go.
        let other = chain_of_height(4);
        let stub = StubPeers {
            chains: HashMap::from([("far:1".to_string(), other.blocks().to_vec())]),
        };
        let peers = vec!["far:1".to_string()];

        run_consensus(&mut chain, &mut mempool, &peers, &stub);
        assert_eq!(chain.height(), 4);
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_peer_cap_bounds_the_run() {
        let mut params = test_params();
        params.consensus_peer_cap = 1;
        let keys = KeyPair::generate();
        let mut chain = Blockchain::new(params).unwrap();
        mine_to(&mut chain, &keys, vec![]);
        let mut mempool = Mempool::new();

        let five = chain_of_height(5);
        let stub = StubPeers {
            chains: HashMap::from([("second:1".to_string(), five.blocks().to_vec())]),
        };
        // Only the first (unreachable) peer is consulted under the cap.
        let peers = vec!["first:1".to_string(), "second:1".to_string()];
        let height = run_consensus(&mut chain, &mut mempool, &peers, &stub);
        assert_eq!(height, 1);
    }
}
