//! The chain itself: ordered blocks, the cached UTXO set, and the
//! difficulty and reward schedules.

use serde::{Deserialize, Serialize};
use shared::{Address, Amount, ChainError, Hash256, Result};

use crate::block::Block;
use crate::transaction::{Transaction, TxOutput};
use crate::utxo::UtxoSet;

/// Network-wide constants. Every node of one network must agree on these;
/// the genesis block they produce is the network identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Difficulty of the genesis block and floor of the schedule.
    pub initial_difficulty: u32,
    /// Desired seconds between blocks.
    pub target_block_time: f64,
    /// Blocks between difficulty retargets.
    pub retarget_interval: u64,
    /// Blocks between reward halvings.
    pub halving_interval: u64,
    /// Reward of the first halving period.
    pub initial_reward: Amount,
    /// Most peers one consensus run will query.
    pub consensus_peer_cap: usize,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            initial_difficulty: 4,
            target_block_time: 60.0,
            retarget_interval: 10,
            halving_interval: 210_000,
            initial_reward: Amount::from_coins(50),
            consensus_peer_cap: 16,
        }
    }
}

/// The ledger state: blocks from genesis plus the derived UTXO set.
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
    utxo_set: UtxoSet,
    params: NetworkParams,
}

impl Blockchain {
    /// The deterministic genesis block for `params`: fixed header fields and
    /// a single zero-amount coinbase to the reserved address, with the nonce
    /// found by scanning from zero.
    #[must_use]
    pub fn genesis_block(params: &NetworkParams) -> Block {
        let coinbase = Transaction::coinbase(
            0,
            vec![TxOutput::new(Address::reserved(), Amount::ZERO)],
            0.0,
        );
        let mut block = Block::new(
            0,
            Hash256::zero(),
            0.0,
            params.initial_difficulty,
            vec![coinbase],
        );
        while !block.meets_difficulty() {
            block.nonce += 1;
            block.hash = block.compute_hash();
        }
        block
    }

    /// Creates a chain holding only the genesis block.
    ///
    /// # Errors
    ///
    /// Returns an error if the genesis block cannot be applied to an empty
    /// UTXO set, which would indicate a construction bug.
    pub fn new(params: NetworkParams) -> Result<Self> {
        let genesis = Self::genesis_block(&params);
        let mut utxo_set = UtxoSet::new();
        utxo_set.apply_block(&genesis)?;
        Ok(Self {
            blocks: vec![genesis],
            utxo_set,
            params,
        })
    }

    /// Rebuilds a chain by replaying `blocks` from genesis, validating every
    /// block with the difficulty and reward recomputed from the replayed
    /// history itself.
    ///
    /// # Errors
    ///
    /// Returns the first validation error, or `InvalidCandidateChain` if the
    /// first block is not this network's genesis.
    pub fn from_blocks(params: NetworkParams, blocks: Vec<Block>) -> Result<Self> {
        let mut chain = Self::new(params)?;
        let mut iter = blocks.into_iter();
        match iter.next() {
            Some(genesis) if genesis == chain.blocks[0] => {}
            _ => {
                return Err(ChainError::InvalidCandidateChain(
                    "first block is not this network's genesis".to_string(),
                ))
            }
        }
        for block in iter {
            chain.add_block(block)?;
        }
        Ok(chain)
    }

    /// Height of the tip; genesis is height 0.
    #[must_use]
    pub fn height(&self) -> u64 {
        (self.blocks.len() - 1) as u64
    }

    /// The tip block.
    ///
    /// # Panics
    ///
    /// Never panics: the genesis block always exists.
    #[must_use]
    pub fn tip(&self) -> &Block {
        self.blocks.last().unwrap() // genesis always exists
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Blocks with heights in `start..=end`, clamped to the chain.
    #[must_use]
    pub fn block_range(&self, start: u64, end: u64) -> &[Block] {
        let last = self.height().min(end);
        if start > last {
            return &[];
        }
        &self.blocks[start as usize..=last as usize]
    }

    #[must_use]
    pub const fn utxo_set(&self) -> &UtxoSet {
        &self.utxo_set
    }

    #[must_use]
    pub const fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Sum of unspent outputs payable to `address`.
    #[must_use]
    pub fn balance(&self, address: &Address) -> Amount {
        self.utxo_set.balance(address)
    }

    /// Reward for the block at `height`: the initial reward halved once per
    /// completed halving period, floored, reaching zero once the halvings
    /// exhaust the unit precision. The first period covers heights
    /// `1..=halving_interval`.
    #[must_use]
    pub fn reward_at(&self, height: u64) -> Amount {
        if self.params.halving_interval == 0 {
            return self.params.initial_reward;
        }
        let halvings = height.saturating_sub(1) / self.params.halving_interval;
        self.params.initial_reward.halved(halvings)
    }

    /// Difficulty required of the next block. Every `retarget_interval`
    /// blocks the observed average block time over the trailing window moves
    /// the difficulty by at most one step: up when blocks arrive in under
    /// half the target, down (to a floor of 1) when they take more than
    /// twice the target.
    #[must_use]
    pub fn next_difficulty(&self) -> u32 {
        let current = self.tip().difficulty;
        let interval = self.params.retarget_interval;
        let next_height = self.height() + 1;
        if interval < 2 || next_height % interval != 0 {
            return current;
        }

        let window = &self.blocks[self.blocks.len() - interval as usize..];
        let span = window[window.len() - 1].timestamp - window[0].timestamp;
        let observed = span / (interval - 1) as f64;
        let target = self.params.target_block_time;

        if observed < target * 0.5 {
            current.saturating_add(1).min(64)
        } else if observed > target * 2.0 {
            (current.saturating_sub(1)).max(1)
        } else {
            current
        }
    }

    /// Validates `block` against the tip under the current schedule and, if
    /// it passes, applies it: a shadow UTXO set is built first and committed
    /// by swap, so a rejected block changes nothing.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the first failed check.
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        let expected_difficulty = self.next_difficulty();
        let expected_reward = self.reward_at(self.height() + 1);
        block.verify(self.tip(), expected_difficulty, expected_reward, &self.utxo_set)?;

        let mut shadow = self.utxo_set.clone();
        shadow.apply_block(&block)?;
        self.utxo_set = shadow;
        self.blocks.push(block);
        Ok(())
    }

    /// The consensus fold: adopts `candidate` only if it is strictly longer
    /// than the local chain (ties favor incumbency), shares this network's
    /// genesis, and replays cleanly from genesis. On success the blocks and
    /// the UTXO set are swapped atomically.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCandidateChain`; the local chain is unchanged.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<()> {
        if candidate.len() <= self.blocks.len() {
            return Err(ChainError::InvalidCandidateChain(
                "candidate is not strictly longer than the local chain".to_string(),
            ));
        }
        if candidate[0] != self.blocks[0] {
            return Err(ChainError::InvalidCandidateChain(
                "candidate genesis differs".to_string(),
            ));
        }

        let fresh = Self::from_blocks(self.params.clone(), candidate)
            .map_err(|err| ChainError::InvalidCandidateChain(err.to_string()))?;
        self.blocks = fresh.blocks;
        self.utxo_set = fresh.utxo_set;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }
}
