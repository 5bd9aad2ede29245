//! Wallet-side transaction building: coin selection, change and signing.

use shared::{Address, Amount, ChainError, KeyPair, Result};

use crate::transaction::{Transaction, TxInput, TxOutput};
use crate::utxo::UtxoSet;

/// Builds and signs a payment of `amount` from the address owned by `keys`
/// to `recipient`, against the given view of the UTXO set.
///
/// Selection is greedy largest-first until the amount is covered; the
/// surplus returns to the sender as change (omitted when zero). Every input
/// carries the same signature over the shared signing preimage.
///
/// # Errors
///
/// `NegativeOrZeroAmount` for a zero amount, `InsufficientFunds` when the
/// sender's outputs cannot cover it.
pub fn build_transaction(
    keys: &KeyPair,
    utxos: &UtxoSet,
    recipient: &Address,
    amount: Amount,
    timestamp: f64,
) -> Result<Transaction> {
    if amount.is_zero() {
        return Err(ChainError::NegativeOrZeroAmount);
    }

    let sender = keys.address();
    let mut owned = utxos.by_address(&sender);
    owned.sort_by(|a, b| b.1.amount.cmp(&a.1.amount));

    let mut selected = Vec::new();
    let mut covered = Amount::ZERO;
    for (outpoint, output) in owned {
        if covered >= amount {
            break;
        }
        covered = covered
            .checked_add(output.amount)
            .ok_or(ChainError::InsufficientFunds)?;
        selected.push(outpoint);
    }
    if covered < amount {
        return Err(ChainError::InsufficientFunds);
    }

    let mut outputs = vec![TxOutput::new(recipient.clone(), amount)];
    let change = covered
        .checked_sub(amount)
        .ok_or(ChainError::InsufficientFunds)?;
    if !change.is_zero() {
        outputs.push(TxOutput::new(sender, change));
    }

    let inputs: Vec<TxInput> = selected.into_iter().map(TxInput::unsigned).collect();
    let mut tx = Transaction::new(inputs, outputs, timestamp);

    let preimage = tx.signing_preimage();
    let signature = keys.sign(preimage.as_bytes());
    let public_key = keys.public_key_hex();
    for input in &mut tx.inputs {
        input.signature = signature.clone();
        input.public_key = public_key.clone();
    }
    tx.txid = tx.compute_txid();
    Ok(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{funded_chain, now};

    #[test]
    fn test_builds_recipient_and_change_outputs() {
        let (chain, alice) = funded_chain(1);
        let bob = KeyPair::generate();

        let tx = build_transaction(
            &alice,
            chain.utxo_set(),
            &bob.address(),
            Amount::from_coins(20),
            now(),
        )
        .unwrap();

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].address, bob.address());
        assert_eq!(tx.outputs[0].amount, Amount::from_coins(20));
        assert_eq!(tx.outputs[1].address, alice.address());
        assert_eq!(tx.outputs[1].amount, Amount::from_coins(30));
        assert!(tx.verify(chain.utxo_set()).is_ok());
    }

    #[test]
    fn test_exact_spend_omits_change() {
        let (chain, alice) = funded_chain(1);
        let bob = KeyPair::generate();

        let tx = build_transaction(
            &alice,
            chain.utxo_set(),
            &bob.address(),
            Amount::from_coins(50),
            now(),
        )
        .unwrap();

        assert_eq!(tx.outputs.len(), 1);
        assert!(tx.verify(chain.utxo_set()).is_ok());
    }

    #[test]
    fn test_selection_is_largest_first_until_covered() {
        let (chain, alice) = funded_chain(3);
        let bob = KeyPair::generate();

        // 3 coinbase outputs of 50 each; 120 needs all three, 90 needs two.
        let tx = build_transaction(
            &alice,
            chain.utxo_set(),
            &bob.address(),
            Amount::from_coins(120),
            now(),
        )
        .unwrap();
        assert_eq!(tx.inputs.len(), 3);

        let tx = build_transaction(
            &alice,
            chain.utxo_set(),
            &bob.address(),
            Amount::from_coins(90),
            now(),
        )
        .unwrap();
        assert_eq!(tx.inputs.len(), 2);
        // All inputs share one signature over the shared preimage.
        assert_eq!(tx.inputs[0].signature, tx.inputs[1].signature);
        assert!(tx.verify(chain.utxo_set()).is_ok());
    }

    #[test]
    fn test_insufficient_funds_and_zero_amount() {
        let (chain, alice) = funded_chain(1);
        let bob = KeyPair::generate();

        assert_eq!(
            build_transaction(
                &alice,
                chain.utxo_set(),
                &bob.address(),
                Amount::from_coins(51),
                now(),
            ),
            Err(ChainError::InsufficientFunds)
        );
        assert_eq!(
            build_transaction(&alice, chain.utxo_set(), &bob.address(), Amount::ZERO, now()),
            Err(ChainError::NegativeOrZeroAmount)
        );
        // A stranger with no outputs cannot pay at all.
        assert_eq!(
            build_transaction(
                &bob,
                chain.utxo_set(),
                &alice.address(),
                Amount::from_coins(1),
                now(),
            ),
            Err(ChainError::InsufficientFunds)
        );
    }
}
