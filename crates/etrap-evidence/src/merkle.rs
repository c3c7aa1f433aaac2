//! Power-of-two padded binary Merkle tree with per-leaf inclusion proofs.
//!
//! Leaves are lowercase hex sha-256 strings; parents hash the UTF-8
//! concatenation of their children's hex. Padding slots derive from the
//! last original leaf so that replaying the same leaves yields the same
//! tree while distinct batches stay distinct.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::sha256_hex;

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("cannot build a tree from zero leaves")]
    Empty,
}

/// One node of the flat node list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleNode {
    pub index: usize,
    pub hash: String,
    pub level: usize,
    /// Set on leaves only: `false` marks a padding slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_original: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_child: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_child: Option<usize>,
}

/// Which side of the running hash a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPosition {
    Left,
    Right,
}

/// Sibling path for one original leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub proof_path: Vec<String>,
    pub sibling_positions: Vec<SiblingPosition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    pub algorithm: String,
    pub root: String,
    pub height: usize,
    pub nodes: Vec<MerkleNode>,
    /// Keyed `tx-{i}`; entries exist for original leaves only.
    pub proof_index: BTreeMap<String, MerkleProof>,
    pub original_count: usize,
    pub padded_count: usize,
}

impl MerkleTree {
    /// Build the padded tree over `leaf_hashes` in order.
    pub fn build(leaf_hashes: &[String]) -> Result<Self, MerkleError> {
        let original_count = leaf_hashes.len();
        if original_count == 0 {
            return Err(MerkleError::Empty);
        }
        let padded_count = original_count.next_power_of_two();

        let mut nodes: Vec<MerkleNode> = Vec::with_capacity(2 * padded_count - 1);
        let last_original = &leaf_hashes[original_count - 1];
        for slot in 0..padded_count {
            let hash = if slot < original_count {
                leaf_hashes[slot].clone()
            } else {
                sha256_hex(format!("{last_original}-pad-{slot}").as_bytes())
            };
            nodes.push(MerkleNode {
                index: slot,
                hash,
                level: 0,
                is_original: Some(slot < original_count),
                left_child: None,
                right_child: None,
            });
        }

        // Node indices per level, leaves first.
        let mut current: Vec<usize> = (0..padded_count).collect();
        let mut levels: Vec<Vec<usize>> = vec![current.clone()];
        while current.len() > 1 {
            let level = levels.len();
            let mut next = Vec::with_capacity(current.len() / 2);
            for pair in current.chunks(2) {
                let (left, right) = (pair[0], pair[1]);
                let hash =
                    sha256_hex(format!("{}{}", nodes[left].hash, nodes[right].hash).as_bytes());
                let index = nodes.len();
                nodes.push(MerkleNode {
                    index,
                    hash,
                    level,
                    is_original: None,
                    left_child: Some(left),
                    right_child: Some(right),
                });
                next.push(index);
            }
            levels.push(next.clone());
            current = next;
        }

        let root = nodes[current[0]].hash.clone();
        let height = levels.len() - 1;

        let mut proof_index = BTreeMap::new();
        for leaf in 0..original_count {
            let mut proof_path = Vec::with_capacity(height);
            let mut sibling_positions = Vec::with_capacity(height);
            let mut position = leaf;
            for level_nodes in &levels[..height] {
                let (sibling, side) = if position % 2 == 0 {
                    (position + 1, SiblingPosition::Right)
                } else {
                    (position - 1, SiblingPosition::Left)
                };
                proof_path.push(nodes[level_nodes[sibling]].hash.clone());
                sibling_positions.push(side);
                position /= 2;
            }
            proof_index.insert(
                format!("tx-{leaf}"),
                MerkleProof {
                    leaf_index: leaf,
                    proof_path,
                    sibling_positions,
                },
            );
        }

        Ok(Self {
            algorithm: "sha256".to_string(),
            root,
            height,
            nodes,
            proof_index,
            original_count,
            padded_count,
        })
    }

    /// Proof for the original leaf at `index`, if any.
    pub fn proof_for(&self, index: usize) -> Option<&MerkleProof> {
        self.proof_index.get(&format!("tx-{index}"))
    }
}

/// Recompute the root from a leaf and its sibling path.
///
/// At each step the running hash is combined with the recorded sibling on
/// the recorded side, hashing the UTF-8 concatenation of the two hex
/// strings exactly as the builder does.
pub fn verify_proof(
    leaf_hash: &str,
    proof_path: &[String],
    sibling_positions: &[SiblingPosition],
    root: &str,
) -> bool {
    if proof_path.len() != sibling_positions.len() {
        return false;
    }
    let mut current = leaf_hash.to_string();
    for (sibling, side) in proof_path.iter().zip(sibling_positions) {
        current = match side {
            SiblingPosition::Left => sha256_hex(format!("{sibling}{current}").as_bytes()),
            SiblingPosition::Right => sha256_hex(format!("{current}{sibling}").as_bytes()),
        };
    }
    current == root
}
