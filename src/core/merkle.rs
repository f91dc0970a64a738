use crate::error::{ChainError, Result};
use crate::utils::sha256d_digest;
use serde::{Deserialize, Serialize};

/// Merkle tree over transaction ids using double SHA-256.
///
/// Levels with an odd node count duplicate the last node. The root of an
/// empty id list is defined as 32 zero bytes, which is what an empty
/// block (the genesis block) carries as its Merkle root.
pub struct MerkleTree {
    levels: Vec<Vec<Vec<u8>>>,
}

/// Merkle inclusion proof: sibling hashes from leaf to root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Leaf hash being proven
    pub leaf: Vec<u8>,
    /// Merkle root the proof resolves to
    pub merkle_root: Vec<u8>,
    /// Proof path from leaf level upwards
    pub path: Vec<ProofElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofElement {
    /// Sibling hash
    pub hash: Vec<u8>,
    /// True if the sibling sits to the right of the running hash
    pub sibling_is_right: bool,
}

impl MerkleTree {
    /// Build the full tree from leaf hashes. An empty list yields a
    /// tree whose root is 32 zero bytes.
    pub fn new(leaves: &[Vec<u8>]) -> MerkleTree {
        if leaves.is_empty() {
            return MerkleTree { levels: vec![] };
        }

        let mut levels = vec![leaves.to_vec()];
        while levels
            .last()
            .map(|level| level.len() > 1)
            .unwrap_or(false)
        {
            let current = levels.last().expect("levels is non-empty");
            let mut next = Vec::with_capacity(current.len().div_ceil(2));
            for pair in current.chunks(2) {
                let left = &pair[0];
                // Odd count duplicates the last node
                let right = pair.get(1).unwrap_or(left);
                next.push(hash_pair(left, right));
            }
            levels.push(next);
        }

        MerkleTree { levels }
    }

    /// Compute just the root for a list of txid hashes.
    pub fn compute_root(leaves: &[Vec<u8>]) -> Vec<u8> {
        Self::new(leaves).root()
    }

    pub fn root(&self) -> Vec<u8> {
        match self.levels.last().and_then(|level| level.first()) {
            Some(root) => root.clone(),
            None => vec![0u8; 32],
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(|level| level.len()).unwrap_or(0)
    }

    /// Generate an inclusion proof for the leaf at the given index.
    pub fn generate_proof(&self, leaf_index: usize) -> Result<MerkleProof> {
        let leaf_count = self.leaf_count();
        if leaf_index >= leaf_count {
            return Err(ChainError::InvalidBlock(format!(
                "Leaf index {leaf_index} out of bounds (leaf count: {leaf_count})"
            )));
        }

        let mut path = Vec::new();
        let mut index = leaf_index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_index = if index % 2 == 0 { index + 1 } else { index - 1 };
            // Duplicated last node serves as its own sibling
            let sibling = level
                .get(sibling_index)
                .unwrap_or(&level[index])
                .clone();
            path.push(ProofElement {
                hash: sibling,
                sibling_is_right: index % 2 == 0,
            });
            index /= 2;
        }

        Ok(MerkleProof {
            leaf: self.levels[0][leaf_index].clone(),
            merkle_root: self.root(),
            path,
        })
    }

    /// Recompute the root from a proof and compare.
    pub fn verify_proof(proof: &MerkleProof) -> bool {
        let mut current = proof.leaf.clone();
        for element in &proof.path {
            current = if element.sibling_is_right {
                hash_pair(&current, &element.hash)
            } else {
                hash_pair(&element.hash, &current)
            };
        }
        current == proof.merkle_root
    }
}

fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(left.len() + right.len());
    data.extend_from_slice(left);
    data.extend_from_slice(right);
    sha256d_digest(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::sha256_digest;

    fn leaves(n: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| sha256_digest(format!("tx-{i}").as_bytes()))
            .collect()
    }

    #[test]
    fn test_empty_root_is_all_zero() {
        assert_eq!(MerkleTree::compute_root(&[]), vec![0u8; 32]);
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let leaves = leaves(1);
        assert_eq!(MerkleTree::compute_root(&leaves), leaves[0]);
    }

    #[test]
    fn test_two_leaves() {
        let leaves = leaves(2);
        let expected = hash_pair(&leaves[0], &leaves[1]);
        assert_eq!(MerkleTree::compute_root(&leaves), expected);
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        let leaves = leaves(3);
        let left = hash_pair(&leaves[0], &leaves[1]);
        let right = hash_pair(&leaves[2], &leaves[2]);
        assert_eq!(MerkleTree::compute_root(&leaves), hash_pair(&left, &right));
    }

    #[test]
    fn test_root_changes_with_any_leaf() {
        let a = leaves(4);
        let mut b = a.clone();
        b[2] = sha256_digest(b"tampered");
        assert_ne!(MerkleTree::compute_root(&a), MerkleTree::compute_root(&b));
    }

    #[test]
    fn test_proofs_verify_for_every_leaf() {
        for n in 1..=9 {
            let leaves = leaves(n);
            let tree = MerkleTree::new(&leaves);
            for i in 0..n {
                let proof = tree.generate_proof(i).unwrap();
                assert!(MerkleTree::verify_proof(&proof), "leaf {i} of {n}");
                assert_eq!(proof.merkle_root, tree.root());
            }
        }
    }

    #[test]
    fn test_forged_proof_fails() {
        let leaves = leaves(4);
        let tree = MerkleTree::new(&leaves);
        let mut proof = tree.generate_proof(1).unwrap();
        proof.leaf = sha256_digest(b"not in tree");
        assert!(!MerkleTree::verify_proof(&proof));
    }

    #[test]
    fn test_proof_index_out_of_bounds() {
        let tree = MerkleTree::new(&leaves(2));
        assert!(tree.generate_proof(2).is_err());
    }
}
