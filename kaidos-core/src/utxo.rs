//! The authoritative map of unspent transaction outputs.

use serde::{Deserialize, Serialize};
use shared::{Address, Amount, ChainError, Hash256, Result};
use std::collections::HashMap;
use std::fmt;

use crate::block::Block;
use crate::transaction::{Transaction, TxOutput};

/// Unique reference to one transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    #[must_use]
    pub const fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The synthetic outpoint coinbase inputs reference.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            txid: Hash256::zero(),
            vout: u32::MAX,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.txid == Hash256::zero() && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Undo record produced by [`UtxoSet::apply_block`], consumed by
/// [`UtxoSet::revert_block`].
#[derive(Debug, Clone, Default)]
pub struct BlockUndo {
    spent: Vec<(OutPoint, TxOutput)>,
    created: Vec<OutPoint>,
}

/// Mapping from outpoint to unspent output.
///
/// Every unspent output of every confirmed block is present exactly once;
/// nothing referenced by a confirmed input remains. The set is derivable by
/// replaying the chain from genesis, so persistence of it is only a cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(OutPoint, TxOutput)>", into = "Vec<(OutPoint, TxOutput)>")]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, TxOutput>,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    /// Looks up one unspent output.
    #[must_use]
    pub fn lookup(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.utxos.get(outpoint)
    }

    /// Inserts an output; wallets use this to assemble advisory views
    /// received from peers.
    pub fn insert(&mut self, outpoint: OutPoint, output: TxOutput) {
        self.utxos.insert(outpoint, output);
    }

    /// All unspent outputs payable to `address`.
    #[must_use]
    pub fn by_address(&self, address: &Address) -> Vec<(OutPoint, TxOutput)> {
        let mut found: Vec<(OutPoint, TxOutput)> = self
            .utxos
            .iter()
            .filter(|(_, output)| &output.address == address)
            .map(|(outpoint, output)| (*outpoint, output.clone()))
            .collect();
        found.sort_by_key(|(outpoint, _)| *outpoint);
        found
    }

    /// Sum of all outputs payable to `address`.
    #[must_use]
    pub fn balance(&self, address: &Address) -> Amount {
        // Total supply is bounded well below u64::MAX, so a plain sum is safe.
        Amount::from_units(
            self.utxos
                .values()
                .filter(|output| &output.address == address)
                .map(|output| output.amount.units())
                .sum(),
        )
    }

    /// Applies `block` as one unit: removes every input's outpoint, inserts
    /// every output's. On error the set is left exactly as it was.
    ///
    /// # Errors
    ///
    /// Returns `UnknownInput` if a non-coinbase input references a missing
    /// output.
    pub fn apply_block(&mut self, block: &Block) -> Result<BlockUndo> {
        let mut undo = BlockUndo::default();
        for tx in &block.transactions {
            if let Err(err) = self.apply_transaction(tx, &mut undo) {
                self.revert_block(undo);
                return Err(err);
            }
        }
        Ok(undo)
    }

    /// Applies a single transaction, recording what it spent and created.
    pub(crate) fn apply_transaction(
        &mut self,
        tx: &Transaction,
        undo: &mut BlockUndo,
    ) -> Result<()> {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let outpoint = input.outpoint();
                let output = self
                    .utxos
                    .remove(&outpoint)
                    .ok_or_else(|| ChainError::UnknownInput(outpoint.to_string()))?;
                undo.spent.push((outpoint, output));
            }
        }
        for (vout, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(tx.txid, vout as u32);
            self.utxos.insert(outpoint, output.clone());
            undo.created.push(outpoint);
        }
        Ok(())
    }

    /// Inverse of [`UtxoSet::apply_block`]; used when replacing chains.
    pub fn revert_block(&mut self, undo: BlockUndo) {
        for outpoint in undo.created.into_iter().rev() {
            self.utxos.remove(&outpoint);
        }
        for (outpoint, output) in undo.spent.into_iter().rev() {
            self.utxos.insert(outpoint, output);
        }
    }
}

impl From<Vec<(OutPoint, TxOutput)>> for UtxoSet {
    fn from(entries: Vec<(OutPoint, TxOutput)>) -> Self {
        Self {
            utxos: entries.into_iter().collect(),
        }
    }
}

impl From<UtxoSet> for Vec<(OutPoint, TxOutput)> {
    fn from(set: UtxoSet) -> Self {
        let mut entries: Self = set.utxos.into_iter().collect();
        entries.sort_by_key(|(outpoint, _)| *outpoint);
        entries
    }
}
