//! Helpers shared by the crate's unit tests: a low-difficulty network,
//! quick chains and signed payments.

use chrono::Utc;
use shared::{Address, Amount, KeyPair};

use crate::block::Block;
use crate::blockchain::{Blockchain, NetworkParams};
use crate::mining::{Miner, MinerConfig};
use crate::transaction::Transaction;
use crate::utxo::UtxoSet;
use crate::wallet;

/// Difficulty-1 parameters so tests mine in microseconds.
pub fn test_params() -> NetworkParams {
    NetworkParams {
        initial_difficulty: 1,
        ..NetworkParams::default()
    }
}

/// Wall-clock unix seconds.
pub fn now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// A chain with `blocks` blocks mined to a fresh keypair's address.
pub fn funded_chain(blocks: u64) -> (Blockchain, KeyPair) {
    let keys = KeyPair::generate();
    let mut chain = Blockchain::new(test_params()).unwrap();
    for _ in 0..blocks {
        mine_to(&mut chain, &keys, vec![]);
    }
    (chain, keys)
}

/// Mines one block carrying `transactions` to `keys`'s address and appends
/// it.
pub fn mine_to(chain: &mut Blockchain, keys: &KeyPair, transactions: Vec<Transaction>) -> Block {
    let miner = Miner::new(MinerConfig {
        reward_address: keys.address(),
        ..MinerConfig::default()
    });
    let result = miner.mine_block(chain, transactions).unwrap();
    chain.add_block(result.block.clone()).unwrap();
    result.block
}

/// A signed payment from `keys` against the chain's UTXO set.
pub fn payment(chain: &Blockchain, keys: &KeyPair, to: &Address, amount: Amount) -> Transaction {
    payment_at(chain, keys, to, amount, now())
}

/// Same as [`payment`] with an explicit timestamp, for building distinct
/// transactions over the same inputs.
pub fn payment_at(
    chain: &Blockchain,
    keys: &KeyPair,
    to: &Address,
    amount: Amount,
    timestamp: f64,
) -> Transaction {
    wallet::build_transaction(keys, chain.utxo_set(), to, amount, timestamp).unwrap()
}

/// A payment that leaves `fee` on the table by shrinking its change output
/// and re-signing.
pub fn pay_with_fee(
    utxos: &UtxoSet,
    keys: &KeyPair,
    to: &Address,
    amount: Amount,
    fee: Amount,
    timestamp: f64,
) -> Transaction {
    let mut tx = wallet::build_transaction(keys, utxos, to, amount, timestamp).unwrap();
    if !fee.is_zero() {
        let change = tx
            .outputs
            .iter_mut()
            .rfind(|output| output.address == keys.address())
            .expect("change output");
        change.amount = change.amount.checked_sub(fee).expect("change covers fee");
        let preimage = tx.signing_preimage();
        let signature = keys.sign(preimage.as_bytes());
        for input in &mut tx.inputs {
            input.signature = signature.clone();
        }
        tx.txid = tx.compute_txid();
    }
    tx
}
