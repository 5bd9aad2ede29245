//! The mempool: validated transactions waiting for a block.

use shared::{Amount, ChainError, Hash256, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::block::Block;
use crate::transaction::Transaction;
use crate::utxo::{OutPoint, UtxoSet};

#[derive(Debug, Clone)]
struct MempoolEntry {
    tx: Transaction,
    fee: Amount,
    seq: u64,
}

/// Set of standard transactions fully validated against the UTXO set at
/// insertion time. Two mempool transactions never share an input; admission
/// is first-valid, first-served.
#[derive(Debug, Default)]
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    reserved: HashSet<OutPoint>,
    next_seq: u64,
}

impl Mempool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    /// Admits `tx` after validating it against `utxos` and the tentative
    /// spends of every transaction already here. Resubmitting a known txid
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// `DoubleSpendInMempool` on an input conflict, or whatever
    /// [`Transaction::verify`] reports.
    pub fn submit(&mut self, tx: Transaction, utxos: &UtxoSet) -> Result<()> {
        if self.entries.contains_key(&tx.txid) {
            return Ok(());
        }
        if tx.is_coinbase() {
            return Err(ChainError::BadCoinbase(
                "coinbase transactions are minted, not submitted".to_string(),
            ));
        }
        for input in &tx.inputs {
            if self.reserved.contains(&input.outpoint()) {
                return Err(ChainError::DoubleSpendInMempool(
                    input.outpoint().to_string(),
                ));
            }
        }

        let fee = tx.verify(utxos)?;
        for input in &tx.inputs {
            self.reserved.insert(input.outpoint());
        }
        debug!(txid = %tx.txid, fee = %fee, "transaction admitted to mempool");
        self.entries.insert(
            tx.txid,
            MempoolEntry {
                tx,
                fee,
                seq: self.next_seq,
            },
        );
        self.next_seq += 1;
        Ok(())
    }

    /// Up to `max` transactions for block inclusion, ordered by fee
    /// descending, then insertion time ascending.
    #[must_use]
    pub fn take(&self, max: usize) -> Vec<Transaction> {
        let mut entries: Vec<&MempoolEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| b.fee.cmp(&a.fee).then(a.seq.cmp(&b.seq)));
        entries
            .into_iter()
            .take(max)
            .map(|entry| entry.tx.clone())
            .collect()
    }

    /// Every transaction, in insertion order; used for persistence.
    #[must_use]
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut entries: Vec<&MempoolEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.tx.clone()).collect()
    }

    /// Drops the transactions confirmed by `block`.
    pub fn remove_included(&mut self, block: &Block) {
        for tx in &block.transactions {
            if let Some(entry) = self.entries.remove(&tx.txid) {
                for input in &entry.tx.inputs {
                    self.reserved.remove(&input.outpoint());
                }
            }
        }
    }

    /// Re-validates everything against the new tip's UTXO set, evicting
    /// what no longer applies. Run after every append or chain replacement.
    pub fn reconcile(&mut self, utxos: &UtxoSet) {
        let mut kept: Vec<MempoolEntry> = self.entries.drain().map(|(_, entry)| entry).collect();
        kept.sort_by_key(|entry| entry.seq);
        self.reserved.clear();

        for entry in kept {
            let conflicted = entry
                .tx
                .inputs
                .iter()
                .any(|input| self.reserved.contains(&input.outpoint()));
            if conflicted || entry.tx.verify(utxos).is_err() {
                info!(txid = %entry.tx.txid, "evicting stale mempool transaction");
                continue;
            }
            for input in &entry.tx.inputs {
                self.reserved.insert(input.outpoint());
            }
            self.entries.insert(entry.tx.txid, entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{funded_chain, mine_to, pay_with_fee, payment, payment_at};
    use shared::KeyPair;

    #[test]
    fn test_submit_is_idempotent() {
        let (chain, alice) = funded_chain(1);
        let tx = payment(&chain, &alice, &alice.address(), Amount::from_coins(10));

        let mut mempool = Mempool::new();
        mempool.submit(tx.clone(), chain.utxo_set()).unwrap();
        mempool.submit(tx, chain.utxo_set()).unwrap();
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_conflicting_spend_is_rejected() {
        let (chain, alice) = funded_chain(1);
        let bob = KeyPair::generate();
        let carol = KeyPair::generate();

        let to_bob = payment(&chain, &alice, &bob.address(), Amount::from_coins(20));
        let to_carol = payment_at(&chain, &alice, &carol.address(), Amount::from_coins(20), 2.0);
        assert_ne!(to_bob.txid, to_carol.txid);

        let mut mempool = Mempool::new();
        mempool.submit(to_bob, chain.utxo_set()).unwrap();
        assert!(matches!(
            mempool.submit(to_carol, chain.utxo_set()),
            Err(ChainError::DoubleSpendInMempool(_))
        ));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_rejects_coinbase_and_invalid_transactions() {
        let (chain, alice) = funded_chain(1);
        let mut mempool = Mempool::new();

        let coinbase = chain.tip().transactions[0].clone();
        assert!(matches!(
            mempool.submit(coinbase, chain.utxo_set()),
            Err(ChainError::BadCoinbase(_))
        ));

        let mut forged = payment(&chain, &alice, &alice.address(), Amount::from_coins(10));
        forged.outputs[0].amount = Amount::from_coins(500);
        assert!(mempool.submit(forged, chain.utxo_set()).is_err());
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_take_orders_by_fee_then_arrival() {
        let (mut chain, alice) = funded_chain(3);
        let bob = KeyPair::generate();

        // Hand-craft differing fees by shrinking the change output. The
        // second payment is built against a view without the first one's
        // input so the two coexist in the pool.
        let cheap = payment(&chain, &alice, &bob.address(), Amount::from_coins(10));
        let remaining: UtxoSet = Vec::from(chain.utxo_set().clone())
            .into_iter()
            .filter(|(outpoint, _)| *outpoint != cheap.inputs[0].outpoint())
            .collect::<Vec<_>>()
            .into();
        let dear = pay_with_fee(
            &remaining,
            &alice,
            &bob.address(),
            Amount::from_coins(10),
            Amount::from_coins(5),
            2.0,
        );
        assert_ne!(cheap.inputs[0].outpoint(), dear.inputs[0].outpoint());

        let mut mempool = Mempool::new();
        mempool.submit(cheap.clone(), chain.utxo_set()).unwrap();
        mempool.submit(dear.clone(), chain.utxo_set()).unwrap();

        let ordered = mempool.take(10);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].txid, dear.txid);
        assert_eq!(ordered[1].txid, cheap.txid);
        assert_eq!(mempool.take(1).len(), 1);

        // Confirming one of them leaves the other.
        mine_to(&mut chain, &alice, vec![dear.clone()]);
        mempool.remove_included(chain.tip());
        assert_eq!(mempool.len(), 1);
        assert!(mempool.contains(&cheap.txid));
    }

    #[test]
    fn test_reconcile_evicts_spent_inputs() {
        let (mut chain, alice) = funded_chain(1);
        let bob = KeyPair::generate();

        let tx = payment(&chain, &alice, &bob.address(), Amount::from_coins(20));
        let mut mempool = Mempool::new();
        mempool.submit(tx.clone(), chain.utxo_set()).unwrap();

        // The same spend confirms through another path; reconcile drops it.
        mine_to(&mut chain, &alice, vec![tx]);
        mempool.reconcile(chain.utxo_set());
        assert!(mempool.is_empty());
        assert!(mempool.reserved.is_empty());
    }
}
