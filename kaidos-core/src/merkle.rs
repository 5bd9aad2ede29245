//! Merkle commitment over a block's ordered txids.
//!
//! The scheme is the simple documented one: each node is the SHA-256 of the
//! concatenated lowercase-hex forms of its children, and an odd level
//! duplicates its last element.

use serde::{Deserialize, Serialize};
use shared::{ChainError, Hash256, Result};

/// Which side the sibling joins from when recomputing a proof step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One step of an inclusion path, leaf to root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Hash256,
    pub side: Side,
}

/// Inclusion proof for a single leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub steps: Vec<ProofStep>,
}

fn combine(left: &Hash256, right: &Hash256) -> Hash256 {
    Hash256::sha256(format!("{left}{right}").as_bytes())
}

/// Computes the root of the tree over `leaves`.
///
/// The empty list hashes to `SHA256("")`; it never occurs in practice since
/// every block carries a coinbase.
#[must_use]
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::sha256(b"");
    }

    let mut level = leaves.to_vec();
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level[level.len() - 1]);
        }
        level = level
            .chunks(2)
            .map(|pair| combine(&pair[0], &pair[1]))
            .collect();
    }
    level[0]
}

/// Builds the inclusion proof for `leaves[index]`.
///
/// # Errors
///
/// Returns `MalformedProof` if `index` is out of range.
pub fn merkle_proof(leaves: &[Hash256], index: usize) -> Result<MerkleProof> {
    if index >= leaves.len() {
        return Err(ChainError::MalformedProof(format!(
            "leaf index {index} out of range for {} leaves",
            leaves.len()
        )));
    }

    let mut steps = Vec::new();
    let mut level = leaves.to_vec();
    let mut position = index;

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(level[level.len() - 1]);
        }

        let (sibling_index, side) = if position % 2 == 0 {
            (position + 1, Side::Right)
        } else {
            (position - 1, Side::Left)
        };
        steps.push(ProofStep {
            sibling: level[sibling_index],
            side,
        });

        level = level
            .chunks(2)
            .map(|pair| combine(&pair[0], &pair[1]))
            .collect();
        position /= 2;
    }

    Ok(MerkleProof { steps })
}

/// Recomputes the path from `leaf` and compares against `root`.
#[must_use]
pub fn verify_proof(leaf: &Hash256, proof: &MerkleProof, root: &Hash256) -> bool {
    let mut acc = *leaf;
    for step in &proof.steps {
        acc = match step.side {
            Side::Left => combine(&step.sibling, &acc),
            Side::Right => combine(&acc, &step.sibling),
        };
    }
    acc == *root
}
