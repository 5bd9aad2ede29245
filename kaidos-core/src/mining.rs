//! The proof-of-work mining worker.

use chrono::Utc;
use shared::{Address, Amount, ChainError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::block::Block;
use crate::blockchain::Blockchain;
use crate::transaction::{Transaction, TxOutput};
use crate::utxo::BlockUndo;

/// Miner configuration.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Address the block reward and collected fees are paid to.
    pub reward_address: Address,
    /// Most standard transactions per block template.
    pub max_transactions: usize,
    /// Nonces scanned per timestamp before it is refreshed.
    pub nonce_window: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            reward_address: Address::reserved(),
            max_transactions: 100,
            nonce_window: 1 << 24,
        }
    }
}

/// Outcome of one successful mining run.
#[derive(Debug, Clone)]
pub struct MiningResult {
    pub block: Block,
    pub attempts: u64,
}

/// Single-threaded, cancellable block producer.
///
/// Runs in its own worker; the cancellation flag is shared so another thread
/// can stop a scan, and is polled at least once per 2¹⁶ nonces.
pub struct Miner {
    config: MinerConfig,
    cancel: Arc<AtomicBool>,
}

impl Miner {
    #[must_use]
    pub fn new(config: MinerConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle another thread can use to stop the current scan.
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Raises the cancellation flag.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Assembles a block of `transactions` on top of `chain` and scans for a
    /// valid nonce, bumping the timestamp each time a window is exhausted.
    /// The caller is expected to hold no ledger lock: a template gone stale
    /// is caught by `add_block` when the result is submitted.
    ///
    /// # Errors
    ///
    /// A validation error if a candidate transaction does not apply,
    /// `MiningCancelled` if the flag was raised.
    pub fn mine_block(
        &self,
        chain: &Blockchain,
        mut transactions: Vec<Transaction>,
    ) -> Result<MiningResult> {
        transactions.truncate(self.config.max_transactions);

        let height = chain.height() + 1;
        let difficulty = chain.next_difficulty();
        let reward = chain.reward_at(height);

        // Validate the candidates against an evolving snapshot and collect
        // their fees; an invalid candidate aborts the template.
        let mut view = chain.utxo_set().clone();
        let mut undo = BlockUndo::default();
        let mut fees = Amount::ZERO;
        for tx in &transactions {
            let fee = tx.verify(&view)?;
            fees = fees
                .checked_add(fee)
                .ok_or_else(|| ChainError::Serialization("fee overflow".to_string()))?;
            view.apply_transaction(tx, &mut undo)?;
        }
        let payout = reward
            .checked_add(fees)
            .ok_or_else(|| ChainError::Serialization("reward overflow".to_string()))?;

        let mut total_attempts = 0u64;
        loop {
            let timestamp = wall_clock().max(chain.tip().timestamp);
            let coinbase = Transaction::coinbase(
                height,
                vec![TxOutput::new(self.config.reward_address.clone(), payout)],
                timestamp,
            );
            let mut all = Vec::with_capacity(transactions.len() + 1);
            all.push(coinbase);
            all.extend(transactions.iter().cloned());

            let mut block = Block::new(height, chain.tip().hash, timestamp, difficulty, all);
            match block.mine(self.config.nonce_window, &self.cancel) {
                Ok(attempts) => {
                    total_attempts += attempts;
                    debug!(
                        height,
                        difficulty,
                        attempts = total_attempts,
                        hash = %block.hash,
                        "block mined"
                    );
                    return Ok(MiningResult {
                        block,
                        attempts: total_attempts,
                    });
                }
                Err(ChainError::MiningStalled) => {
                    total_attempts += self.config.nonce_window;
                    debug!(height, "nonce window exhausted; refreshing timestamp");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Wall-clock unix seconds with millisecond resolution, so consecutive
/// nonce windows never rescan an identical header.
fn wall_clock() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
