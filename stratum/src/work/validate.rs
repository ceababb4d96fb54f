// Copyright (C) 2024, 2025 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

//! Rebuild the block header a share commits to and measure its work.

use super::job::Job;
use crate::messages::MinerShare;
use bitcoin::block::{Header, Version};
use bitcoin::hashes::{Hash, sha256d};
use bitcoin::{BlockHash, Target, TxMerkleNode};
use tracing::debug;

/// Header built from a share, with its hash and difficulty.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareProof {
    pub header: Header,
    pub block_hash: BlockHash,
    pub difficulty: f64,
}

/// Concatenate the coinbase parts: coinbase1, extranonce1, extranonce2, coinbase2.
pub fn build_coinbase(job: &Job, extranonce1: &[u8], extranonce2: &[u8]) -> Vec<u8> {
    let mut coinbase = Vec::with_capacity(
        job.coinbase1.len() + extranonce1.len() + extranonce2.len() + job.coinbase2.len(),
    );
    coinbase.extend_from_slice(&job.coinbase1);
    coinbase.extend_from_slice(extranonce1);
    coinbase.extend_from_slice(extranonce2);
    coinbase.extend_from_slice(&job.coinbase2);
    coinbase
}

/// Fold the coinbase txid up the merkle path.
pub fn merkle_root(coinbase: &[u8], merkle_path: &[[u8; 32]]) -> TxMerkleNode {
    let mut current = sha256d::Hash::hash(coinbase).to_byte_array();
    for branch in merkle_path {
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(&current);
        combined[32..].copy_from_slice(branch);
        current = sha256d::Hash::hash(&combined).to_byte_array();
    }
    TxMerkleNode::from_byte_array(current)
}

/// Replace the masked bits of the job version with the rolled bits.
pub fn apply_version_mask(version: u32, mask: u32, bits: u32) -> u32 {
    (version & !mask) | (bits & mask)
}

/// Difficulty of a block hash relative to the difficulty 1 target.
pub fn hash_difficulty(block_hash: &BlockHash) -> f64 {
    Target::from_le_bytes(block_hash.to_byte_array()).difficulty_float()
}

/// Build the header for a share and hash it.
///
/// Rolled version bits are applied only when the session negotiated a mask.
pub fn reconstruct(
    job: &Job,
    extranonce1: &[u8],
    share: &MinerShare,
    version_mask: Option<u32>,
) -> ShareProof {
    let coinbase = build_coinbase(job, extranonce1, &share.extranonce2);
    let merkle_root = merkle_root(&coinbase, &job.merkle_path);

    let version = match (version_mask, share.general_purpose_bits) {
        (Some(mask), Some(bits)) => apply_version_mask(job.version, mask, bits),
        _ => job.version,
    };

    let header = Header {
        version: Version::from_consensus(version as i32),
        prev_blockhash: job.prev_blockhash,
        merkle_root,
        time: share.time,
        bits: job.nbits,
        nonce: share.nonce,
    };
    let block_hash = header.block_hash();
    let difficulty = hash_difficulty(&block_hash);
    debug!("Share for job {} hashes to {block_hash} at difficulty {difficulty}", job.id);

    ShareProof {
        header,
        block_hash,
        difficulty,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::work::job::JobId;
    use bitcoin::Network;
    use bitcoin::consensus::encode::serialize;
    use bitcoin::constants::genesis_block;

    /// A job whose only valid share is the genesis block: the genesis
    /// coinbase is split around a 4 byte extranonce1 and 8 byte extranonce2.
    pub(crate) fn genesis_job(id: JobId) -> (Job, [u8; 4], MinerShare) {
        let genesis = genesis_block(Network::Bitcoin);
        let coinbase = serialize(&genesis.txdata[0]);
        let split = 42;
        let extranonce1: [u8; 4] = coinbase[split..split + 4].try_into().unwrap();
        let extranonce2 = coinbase[split + 4..split + 12].to_vec();

        let job = Job {
            id,
            prev_blockhash: genesis.header.prev_blockhash,
            coinbase1: coinbase[..split].to_vec(),
            coinbase2: coinbase[split + 12..].to_vec(),
            merkle_path: vec![],
            version: genesis.header.version.to_consensus() as u32,
            nbits: genesis.header.bits,
            ntime: genesis.header.time,
            clean: true,
        };
        let share = MinerShare {
            time: genesis.header.time,
            nonce: genesis.header.nonce,
            extranonce2,
            general_purpose_bits: None,
        };
        (job, extranonce1, share)
    }

    #[test]
    fn test_reconstruct_genesis() {
        let (job, extranonce1, share) = genesis_job(JobId(1));
        let proof = reconstruct(&job, &extranonce1, &share, None);

        assert_eq!(
            proof.header.merkle_root.to_string(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
        assert_eq!(
            proof.block_hash.to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert!(proof.difficulty > 1.0);
    }

    #[test]
    fn test_wrong_nonce_changes_hash() {
        let (job, extranonce1, mut share) = genesis_job(JobId(1));
        share.nonce += 1;
        let proof = reconstruct(&job, &extranonce1, &share, None);
        assert_ne!(
            proof.block_hash.to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn test_merkle_root_with_branches() {
        let coinbase = b"coinbase";
        let branch = [0x22u8; 32];
        let txid = sha256d::Hash::hash(coinbase).to_byte_array();
        let mut combined = txid.to_vec();
        combined.extend_from_slice(&branch);
        let expected = sha256d::Hash::hash(&combined).to_byte_array();

        assert_eq!(
            merkle_root(coinbase, &[branch]),
            TxMerkleNode::from_byte_array(expected)
        );
        assert_eq!(merkle_root(coinbase, &[]), TxMerkleNode::from_byte_array(txid));
    }

    #[test]
    fn test_apply_version_mask() {
        assert_eq!(apply_version_mask(0x20000000, 0x1fffe000, 0x00002000), 0x20002000);
        // Bits outside the mask are ignored
        assert_eq!(apply_version_mask(0x20000000, 0x1fffe000, 0x00000001), 0x20000000);
    }

    #[test]
    fn test_version_bits_need_a_mask() {
        let (job, extranonce1, share) = genesis_job(JobId(1));
        let rolled = share.clone().with_general_purpose_bits(0x00002000);

        let unmasked = reconstruct(&job, &extranonce1, &rolled, None);
        assert_eq!(unmasked.header.version.to_consensus(), 1);

        let masked = reconstruct(&job, &extranonce1, &rolled, Some(0x1fffe000));
        assert_eq!(masked.header.version.to_consensus(), 0x00002001);
    }
}
