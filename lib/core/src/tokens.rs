// SPDX-License-Identifier: Apache-2.0

//! Tokenizer-fingerprint contract.
//!
//! The real tokenizer is an external collaborator (spec §1 scope): this
//! module only needs `tokenize` to be a deterministic pure function from
//! text to token ids, and block hashing to be a stable digest over fixed-size
//! chunks of those ids. The splitting rule below (whitespace-delimited words,
//! each mapped to a stable id by hashing its bytes) stands in for a real BPE
//! tokenizer; any implementation satisfying determinism is interchangeable
//! with it so long as router and worker agree on one build.

use sha2::{Digest, Sha256};

use crate::hash::BlockHash;

/// Tokens per cache block. vLLM-style paged KV caches page at this size.
pub const BLOCK_SIZE: usize = 16;

/// Deterministically tokenize `text` into token ids.
pub fn tokenize(text: &str) -> Vec<u32> {
    text.split_whitespace().map(token_id).collect()
}

fn token_id(word: &str) -> u32 {
    let digest = Sha256::digest(word.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Canonical, stable encoding of a token id tuple, fed to SHA-256.
/// Implementer's choice per spec §6; fixed here as `"(id0,id1,...)"`.
fn canonical_serialization(ids: &[u32]) -> String {
    let mut out = String::from("(");
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&id.to_string());
    }
    out.push(')');
    out
}

fn hash_tuple(ids: &[u32]) -> BlockHash {
    let encoded = canonical_serialization(ids);
    let digest = Sha256::digest(encoded.as_bytes());
    let bytes: [u8; 32] = digest.into();
    BlockHash::from_bytes(bytes)
}

/// Partition `tokenize(text)` into consecutive `BLOCK_SIZE` chunks, drop any
/// trailing partial chunk, and hash each chunk independently.
pub fn compute_block_hashes(text: &str) -> Vec<BlockHash> {
    let ids = tokenize(text);
    ids.chunks(BLOCK_SIZE)
        .filter(|chunk| chunk.len() == BLOCK_SIZE)
        .map(hash_tuple)
        .collect()
}

/// Number of full blocks `text` would produce.
pub fn num_blocks(text: &str) -> usize {
    tokenize(text).len() / BLOCK_SIZE
}

/// Legacy single-hash path over the first `n` tokens (or all tokens if `n`
/// is `None`), retained for compatibility with older router/clients per
/// spec §6. Unlike block hashes, this ignores block boundaries.
pub fn compute_prefix_hash(text: &str, n: Option<usize>) -> BlockHash {
    let mut ids = tokenize(text);
    if let Some(n) = n {
        ids.truncate(n);
    }
    hash_tuple(&ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_is_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog";
        assert_eq!(tokenize(text), tokenize(text));
    }

    #[test]
    fn block_hashes_drop_trailing_partial_chunk() {
        let words: Vec<&str> = vec!["w"; BLOCK_SIZE + 3];
        let text = words.join(" ");
        let hashes = compute_block_hashes(&text);
        assert_eq!(hashes.len(), 1);
    }

    #[test]
    fn identical_blocks_produce_identical_hashes() {
        let words: Vec<&str> = vec!["alpha"; BLOCK_SIZE * 2];
        let text = words.join(" ");
        let hashes = compute_block_hashes(&text);
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], hashes[1]);
    }

    #[test]
    fn block_hash_does_not_incorporate_preceding_blocks() {
        let mut words: Vec<&str> = vec!["alpha"; BLOCK_SIZE];
        words.extend(vec!["beta"; BLOCK_SIZE]);
        let text_ab = words.join(" ");
        let solo_beta = vec!["beta"; BLOCK_SIZE].join(" ");

        let hashes_ab = compute_block_hashes(&text_ab);
        let hashes_beta_alone = compute_block_hashes(&solo_beta);
        assert_eq!(hashes_ab[1], hashes_beta_alone[0]);
    }

    #[test]
    fn num_blocks_matches_block_hash_count() {
        let text = vec!["x"; BLOCK_SIZE * 3 + 5].join(" ");
        assert_eq!(num_blocks(&text), compute_block_hashes(&text).len());
    }

    #[test]
    fn prefix_hash_ignores_block_boundaries() {
        let text = vec!["tok"; BLOCK_SIZE + 1].join(" ");
        let full = compute_prefix_hash(&text, None);
        let truncated = compute_prefix_hash(&text, Some(BLOCK_SIZE + 1));
        assert_eq!(full, truncated);
    }
}
