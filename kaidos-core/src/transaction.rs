//! Transactions: data model, canonical serialization, txids and
//! ledger-side verification.

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{address_of_public_key, verify_signature, Address, Amount, ChainError, Hash256, Result};
use std::collections::HashSet;

use crate::utxo::{OutPoint, UtxoSet};

/// Transaction input, spending one previous output.
///
/// The coinbase input references the null outpoint and carries the block
/// height in `signature` as a uniqueness nonce; real inputs carry a hex
/// compact ECDSA signature over the shared signing preimage and the hex
/// compressed public key that must hash to the spent output's address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxInput {
    pub txid: Hash256,
    pub vout: u32,
    pub signature: String,
    pub public_key: String,
}

impl TxInput {
    /// Creates an unsigned input spending `outpoint`.
    #[must_use]
    pub fn unsigned(outpoint: OutPoint) -> Self {
        Self {
            txid: outpoint.txid,
            vout: outpoint.vout,
            signature: String::new(),
            public_key: String::new(),
        }
    }

    /// Creates the synthetic coinbase input for a block at `height`.
    #[must_use]
    pub fn coinbase(height: u64) -> Self {
        let null = OutPoint::null();
        Self {
            txid: null.txid,
            vout: null.vout,
            signature: hex::encode(height.to_le_bytes()),
            public_key: String::new(),
        }
    }

    #[must_use]
    pub const fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.outpoint().is_null()
    }
}

/// Transaction output: an amount locked to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TxOutput {
    pub address: Address,
    pub amount: Amount,
}

impl TxOutput {
    #[must_use]
    pub const fn new(address: Address, amount: Amount) -> Self {
        Self { address, amount }
    }
}

/// A transfer of value, either a coinbase or a standard payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Transaction {
    pub txid: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub timestamp: f64,
}

impl Transaction {
    /// Assembles a transaction and seals its txid. Inputs are expected to be
    /// signed already; the txid commits to the signatures.
    #[must_use]
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>, timestamp: f64) -> Self {
        let mut tx = Self {
            txid: Hash256::zero(),
            inputs,
            outputs,
            timestamp,
        };
        tx.txid = tx.compute_txid();
        tx
    }

    /// Builds the coinbase for a block at `height`.
    #[must_use]
    pub fn coinbase(height: u64, outputs: Vec<TxOutput>, timestamp: f64) -> Self {
        Self::new(vec![TxInput::coinbase(height)], outputs, timestamp)
    }

    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Canonical key-sorted preimage shared by every input's signature.
    /// Signatures and public keys are excluded so signing one input does not
    /// invalidate the target of the others.
    #[must_use]
    pub fn signing_preimage(&self) -> String {
        let inputs: Vec<_> = self
            .inputs
            .iter()
            .map(|input| json!({ "txid": input.txid, "vout": input.vout }))
            .collect();
        self.preimage_with(inputs)
    }

    /// Canonical preimage the txid is the SHA-256 of; unlike the signing
    /// preimage it includes signatures and public keys.
    #[must_use]
    pub fn id_preimage(&self) -> String {
        let inputs: Vec<_> = self
            .inputs
            .iter()
            .map(|input| {
                json!({
                    "txid": input.txid,
                    "vout": input.vout,
                    "signature": input.signature,
                    "public_key": input.public_key,
                })
            })
            .collect();
        self.preimage_with(inputs)
    }

    fn preimage_with(&self, inputs: Vec<serde_json::Value>) -> String {
        let outputs: Vec<_> = self
            .outputs
            .iter()
            .map(|output| json!({ "address": output.address, "amount": output.amount }))
            .collect();
        json!({
            "inputs": inputs,
            "outputs": outputs,
            "timestamp": self.timestamp,
        })
        .to_string()
    }

    /// Recomputes the txid from the current contents.
    #[must_use]
    pub fn compute_txid(&self) -> Hash256 {
        Hash256::sha256(self.id_preimage().as_bytes())
    }

    /// Checked sum of the output amounts.
    ///
    /// # Errors
    ///
    /// Returns an error on overflow.
    pub fn total_output(&self) -> Result<Amount> {
        let mut total = Amount::ZERO;
        for output in &self.outputs {
            total = total.checked_add(output.amount).ok_or_else(|| {
                ChainError::Serialization("output value overflow".to_string())
            })?;
        }
        Ok(total)
    }

    /// Checked sum of the referenced input amounts.
    ///
    /// # Errors
    ///
    /// Returns `UnknownInput` if an outpoint is not in `utxos`.
    pub fn total_input(&self, utxos: &UtxoSet) -> Result<Amount> {
        let mut total = Amount::ZERO;
        for input in &self.inputs {
            if input.is_coinbase() {
                continue;
            }
            let outpoint = input.outpoint();
            let output = utxos
                .lookup(&outpoint)
                .ok_or_else(|| ChainError::UnknownInput(outpoint.to_string()))?;
            total = total.checked_add(output.amount).ok_or_else(|| {
                ChainError::Serialization("input value overflow".to_string())
            })?;
        }
        Ok(total)
    }

    /// The surplus of inputs over outputs, claimed by the miner.
    ///
    /// # Errors
    ///
    /// Returns `UnknownInput` for missing outpoints.
    pub fn fee(&self, utxos: &UtxoSet) -> Result<Amount> {
        if self.is_coinbase() {
            return Ok(Amount::ZERO);
        }
        self.total_input(utxos)?
            .checked_sub(self.total_output()?)
            .ok_or(ChainError::InsufficientInputs)
    }

    /// Full ledger-side verification of a standard transaction against a
    /// UTXO snapshot. Returns the fee on success.
    ///
    /// # Errors
    ///
    /// `BadTxid`, `InsufficientInputs`, `NegativeOrZeroAmount`,
    /// `DoubleSpendInBlock`, `UnknownInput` or `SignatureMismatch`, matching
    /// the first check that fails.
    pub fn verify(&self, utxos: &UtxoSet) -> Result<Amount> {
        if self.compute_txid() != self.txid {
            return Err(ChainError::BadTxid);
        }
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(ChainError::InsufficientInputs);
        }
        if self.outputs.iter().any(|output| output.amount.is_zero()) {
            return Err(ChainError::NegativeOrZeroAmount);
        }

        // Outpoint structure first, then signatures, so a duplicated or
        // missing input is reported as such rather than as a bad signature.
        let mut seen = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let outpoint = input.outpoint();
            if outpoint.is_null() {
                return Err(ChainError::BadCoinbase(
                    "null outpoint outside a coinbase".to_string(),
                ));
            }
            if !seen.insert(outpoint) {
                return Err(ChainError::DoubleSpendInBlock(outpoint.to_string()));
            }
            if !utxos.contains(&outpoint) {
                return Err(ChainError::UnknownInput(outpoint.to_string()));
            }
        }

        let preimage = self.signing_preimage();
        for (index, input) in self.inputs.iter().enumerate() {
            let outpoint = input.outpoint();
            let spent = utxos
                .lookup(&outpoint)
                .ok_or_else(|| ChainError::UnknownInput(outpoint.to_string()))?;
            if address_of_public_key(&input.public_key)? != spent.address {
                return Err(ChainError::SignatureMismatch(index));
            }
            if !verify_signature(&input.public_key, &input.signature, preimage.as_bytes())? {
                return Err(ChainError::SignatureMismatch(index));
            }
        }

        self.fee(utxos)
    }

    /// Structural check for a block's first transaction: exactly one null
    /// input and positive outputs. The reward ceiling is enforced during
    /// block validation where the fees are known.
    ///
    /// # Errors
    ///
    /// Returns `BadCoinbase` or `BadTxid`.
    pub fn verify_coinbase_structure(&self) -> Result<()> {
        if !self.is_coinbase() {
            return Err(ChainError::BadCoinbase(
                "first transaction must be the coinbase".to_string(),
            ));
        }
        if self.compute_txid() != self.txid {
            return Err(ChainError::BadTxid);
        }
        if self.outputs.is_empty() {
            return Err(ChainError::BadCoinbase("no outputs".to_string()));
        }
        if self.outputs.iter().any(|output| output.amount.is_zero()) {
            return Err(ChainError::BadCoinbase("zero-amount output".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{funded_chain, payment};
    use shared::KeyPair;

    #[test]
    fn test_coinbase_shape() {
        let keys = KeyPair::generate();
        let coinbase = Transaction::coinbase(
            3,
            vec![TxOutput::new(keys.address(), Amount::from_coins(50))],
            1.0,
        );

        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.inputs.len(), 1);
        assert!(coinbase.inputs[0].outpoint().is_null());
        assert!(coinbase.verify_coinbase_structure().is_ok());
    }

    #[test]
    fn test_coinbase_txids_are_unique_across_heights() {
        let keys = KeyPair::generate();
        let outputs = vec![TxOutput::new(keys.address(), Amount::from_coins(50))];
        let a = Transaction::coinbase(1, outputs.clone(), 1.0);
        let b = Transaction::coinbase(2, outputs, 1.0);
        assert_ne!(a.txid, b.txid);
    }

    #[test]
    fn test_txid_commits_to_signatures_but_preimage_does_not() {
        let (chain, keys) = funded_chain(1);
        let tx = payment(&chain, &keys, &keys.address(), Amount::from_coins(10));

        let mut stripped = tx.clone();
        stripped.inputs[0].signature = String::new();
        assert_eq!(tx.signing_preimage(), stripped.signing_preimage());
        assert_ne!(tx.compute_txid(), stripped.compute_txid());
    }

    #[test]
    fn test_verify_accepts_a_wallet_built_payment() {
        let (chain, keys) = funded_chain(1);
        let tx = payment(&chain, &keys, &keys.address(), Amount::from_coins(10));
        // The wallet spends the whole input back to itself, so no fee.
        assert_eq!(tx.verify(chain.utxo_set()).unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let (chain, keys) = funded_chain(1);
        let other = KeyPair::generate();
        let tx = payment(&chain, &keys, &other.address(), Amount::from_coins(10));

        // Redirecting an output invalidates the txid first.
        let mut redirected = tx.clone();
        redirected.outputs[0].address = keys.address();
        assert_eq!(redirected.verify(chain.utxo_set()), Err(ChainError::BadTxid));

        // Re-sealing the txid then trips the signature check.
        redirected.txid = redirected.compute_txid();
        assert!(matches!(
            redirected.verify(chain.utxo_set()),
            Err(ChainError::SignatureMismatch(0))
        ));
    }

    #[test]
    fn test_verify_rejects_unknown_and_duplicate_inputs() {
        let (chain, keys) = funded_chain(1);
        let tx = payment(&chain, &keys, &keys.address(), Amount::from_coins(10));

        let mut unknown = tx.clone();
        unknown.inputs[0].vout = 9;
        unknown.txid = unknown.compute_txid();
        assert!(matches!(
            unknown.verify(chain.utxo_set()),
            Err(ChainError::UnknownInput(_))
        ));

        let mut duplicated = tx.clone();
        duplicated.inputs.push(duplicated.inputs[0].clone());
        duplicated.txid = duplicated.compute_txid();
        assert!(matches!(
            duplicated.verify(chain.utxo_set()),
            Err(ChainError::DoubleSpendInBlock(_))
        ));
    }

    #[test]
    fn test_verify_rejects_zero_amount_and_overspend() {
        let (chain, keys) = funded_chain(1);
        let tx = payment(&chain, &keys, &keys.address(), Amount::from_coins(10));

        let mut zeroed = tx.clone();
        zeroed.outputs[0].amount = Amount::ZERO;
        zeroed.txid = zeroed.compute_txid();
        assert_eq!(
            zeroed.verify(chain.utxo_set()),
            Err(ChainError::NegativeOrZeroAmount)
        );

        let mut inflated = tx.clone();
        inflated.outputs[0].amount = Amount::from_coins(500);
        inflated.txid = inflated.compute_txid();
        // The signature check runs before the value balance, so re-sign.
        let preimage = inflated.signing_preimage();
        for input in &mut inflated.inputs {
            input.signature = keys.sign(preimage.as_bytes());
        }
        inflated.txid = inflated.compute_txid();
        assert_eq!(
            inflated.verify(chain.utxo_set()),
            Err(ChainError::InsufficientInputs)
        );
    }

    #[test]
    fn test_wire_round_trip_and_unknown_field_rejection() {
        let (chain, keys) = funded_chain(1);
        let tx = payment(&chain, &keys, &keys.address(), Amount::from_coins(10));

        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
        assert_eq!(serde_json::to_string(&back).unwrap(), json);

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["comment"] = serde_json::Value::String("extra".to_string());
        assert!(serde_json::from_value::<Transaction>(value).is_err());
    }
}
