//! Blocks: header hashing, the proof-of-work predicate and full validation
//! against a parent block.

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{Amount, ChainError, Hash256, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::merkle::merkle_root;
use crate::transaction::Transaction;
use crate::utxo::{BlockUndo, UtxoSet};

/// A cancellation signal is polled at least once per this many nonces.
const CANCEL_CHECK_INTERVAL: u64 = 1 << 16;

/// One block of the chain. The wire form is flat: the six header fields,
/// the header hash, and the transaction list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Block {
    pub index: u64,
    pub previous_hash: Hash256,
    pub timestamp: f64,
    pub merkle_root: Hash256,
    pub difficulty: u32,
    pub nonce: u64,
    pub hash: Hash256,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Builds an unmined block: the merkle root and hash are sealed, the
    /// nonce starts at zero. `transactions[0]` must be the coinbase.
    #[must_use]
    pub fn new(
        index: u64,
        previous_hash: Hash256,
        timestamp: f64,
        difficulty: u32,
        transactions: Vec<Transaction>,
    ) -> Self {
        let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid).collect();
        let mut block = Self {
            index,
            previous_hash,
            timestamp,
            merkle_root: merkle_root(&txids),
            difficulty,
            nonce: 0,
            hash: Hash256::zero(),
            transactions,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Canonical key-sorted header preimage the block hash is taken over.
    #[must_use]
    pub fn header_preimage(&self) -> String {
        json!({
            "index": self.index,
            "previous_hash": self.previous_hash,
            "timestamp": self.timestamp,
            "merkle_root": self.merkle_root,
            "difficulty": self.difficulty,
            "nonce": self.nonce,
        })
        .to_string()
    }

    /// Recomputes the header hash from the current fields.
    #[must_use]
    pub fn compute_hash(&self) -> Hash256 {
        Hash256::sha256(self.header_preimage().as_bytes())
    }

    /// Recomputes the merkle root over the transaction list.
    #[must_use]
    pub fn compute_merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.transactions.iter().map(|tx| tx.txid).collect();
        merkle_root(&txids)
    }

    /// Whether the sealed hash has the required leading hex zeros.
    #[must_use]
    pub fn meets_difficulty(&self) -> bool {
        self.hash.meets_difficulty(self.difficulty)
    }

    /// Scans nonces from 0 up to `max_nonce` until the proof-of-work
    /// predicate holds, resealing the hash as it goes. Returns the number of
    /// attempts on success.
    ///
    /// # Errors
    ///
    /// `MiningStalled` when the window is exhausted (the caller bumps the
    /// timestamp and retries) or `MiningCancelled` when `cancel` is raised.
    pub fn mine(&mut self, max_nonce: u64, cancel: &AtomicBool) -> Result<u64> {
        let mut attempts = 0u64;
        for nonce in 0..=max_nonce {
            if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::SeqCst) {
                return Err(ChainError::MiningCancelled);
            }
            self.nonce = nonce;
            self.hash = self.compute_hash();
            attempts += 1;
            if self.meets_difficulty() {
                return Ok(attempts);
            }
        }
        Err(ChainError::MiningStalled)
    }

    /// Full validation against `previous` under the expected difficulty and
    /// reward. Standard transactions are verified against an evolving UTXO
    /// snapshot, so a spend created earlier in the block is visible and an
    /// intra-block double spend is caught.
    ///
    /// # Errors
    ///
    /// The specific validation error of the first check that fails.
    pub fn verify(
        &self,
        previous: &Self,
        expected_difficulty: u32,
        expected_reward: Amount,
        utxos: &UtxoSet,
    ) -> Result<()> {
        if self.previous_hash != previous.hash {
            return Err(ChainError::BadBlockLink(format!(
                "previous hash {} does not match tip {}",
                self.previous_hash, previous.hash
            )));
        }
        if self.index != previous.index + 1 {
            return Err(ChainError::BadBlockLink(format!(
                "index {} does not follow {}",
                self.index, previous.index
            )));
        }
        if self.timestamp < previous.timestamp {
            return Err(ChainError::BadTimestamp);
        }
        if self.difficulty != expected_difficulty
            || self.hash != self.compute_hash()
            || !self.hash.meets_difficulty(expected_difficulty)
        {
            return Err(ChainError::BadPoW);
        }
        if self.merkle_root != self.compute_merkle_root() {
            return Err(ChainError::BadMerkleRoot);
        }

        let coinbase = self
            .transactions
            .first()
            .ok_or_else(|| ChainError::BadCoinbase("block has no transactions".to_string()))?;
        coinbase.verify_coinbase_structure()?;

        // Walk the standard transactions over a scratch snapshot, applying
        // each one before verifying the next.
        let mut view = utxos.clone();
        let mut undo = BlockUndo::default();
        view.apply_transaction(coinbase, &mut undo)?;

        let mut spent_in_block = HashSet::new();
        let mut fees = Amount::ZERO;
        for tx in &self.transactions[1..] {
            if tx.is_coinbase() {
                return Err(ChainError::BadCoinbase(
                    "more than one coinbase".to_string(),
                ));
            }
            for input in &tx.inputs {
                if !spent_in_block.insert(input.outpoint()) {
                    return Err(ChainError::DoubleSpendInBlock(input.outpoint().to_string()));
                }
            }
            let fee = tx.verify(&view)?;
            fees = fees
                .checked_add(fee)
                .ok_or_else(|| ChainError::Serialization("fee overflow".to_string()))?;
            view.apply_transaction(tx, &mut undo)?;
        }

        let ceiling = expected_reward
            .checked_add(fees)
            .ok_or_else(|| ChainError::Serialization("reward overflow".to_string()))?;
        if coinbase.total_output()? > ceiling {
            return Err(ChainError::BadCoinbase(format!(
                "coinbase pays {} but reward plus fees is {}",
                coinbase.total_output()?,
                ceiling
            )));
        }

        Ok(())
    }
}
