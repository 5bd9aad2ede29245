use thiserror::Error;

/// Every failure the ledger surface can report.
///
/// Validation failures are returned synchronously to whoever submitted the
/// transaction, block or candidate chain. Peer failures are logged and
/// skipped by the consensus loop. `StorageCorrupt` is fatal: the node refuses
/// to start on it. `MiningCancelled` is normal control flow for the miner.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    // Transaction validation
    #[error("insufficient funds to cover the requested amount")]
    InsufficientFunds,
    #[error("signature mismatch on input {0}")]
    SignatureMismatch(usize),
    #[error("txid does not match the transaction contents")]
    BadTxid,
    #[error("input references unknown output {0}")]
    UnknownInput(String),
    #[error("output {0} spent twice within one block")]
    DoubleSpendInBlock(String),
    #[error("output {0} already spent by a mempool transaction")]
    DoubleSpendInMempool(String),
    #[error("transaction amounts must be positive")]
    NegativeOrZeroAmount,
    #[error("inputs are missing or do not cover the outputs")]
    InsufficientInputs,

    // Block validation
    #[error("block does not link to the chain tip: {0}")]
    BadBlockLink(String),
    #[error("block hash does not satisfy the required difficulty")]
    BadPoW,
    #[error("merkle root does not commit to the block's transactions")]
    BadMerkleRoot,
    #[error("invalid coinbase: {0}")]
    BadCoinbase(String),
    #[error("block timestamp precedes its parent")]
    BadTimestamp,

    // Chain and consensus
    #[error("candidate chain rejected: {0}")]
    InvalidCandidateChain(String),
    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),
    #[error("mining exhausted the nonce window")]
    MiningStalled,
    #[error("mining cancelled")]
    MiningCancelled,

    // Peer exchange
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),
    #[error("peer sent a malformed response: {0}")]
    PeerMalformed(String),
    #[error("peer call timed out")]
    Timeout,

    // Encoding and crypto plumbing
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
    #[error("malformed merkle proof: {0}")]
    MalformedProof(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("i/o error: {0}")]
    Io(String),
}

/// Alias used across the workspace.
pub type Result<T> = std::result::Result<T, ChainError>;

impl ChainError {
    /// Process exit code the CLIs map this error to: 1 for validation
    /// failures, 2 for I/O and network failures.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::StorageCorrupt(_)
            | Self::PeerUnavailable(_)
            | Self::PeerMalformed(_)
            | Self::Timeout
            | Self::Io(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ChainError::InsufficientFunds.exit_code(), 1);
        assert_eq!(ChainError::BadPoW.exit_code(), 1);
        assert_eq!(ChainError::Timeout.exit_code(), 2);
        assert_eq!(ChainError::Io("disk full".to_string()).exit_code(), 2);
    }
}
