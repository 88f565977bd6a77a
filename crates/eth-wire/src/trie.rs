//! Ordered trie root derivation.
//!
//! Computes the Merkle-Patricia root over a list of RLP-encoded items keyed
//! by their RLP-encoded index, the algorithm behind `transactions_root` and
//! `withdrawals_root`. Inbound packets are bounded, so the trie is built in
//! one recursive pass over the full key set rather than incrementally.

use alloy_primitives::B256;
use sha3::{Digest, Keccak256};

use crate::rlp;

/// Root hash for a list of RLP-encoded items in index order.
pub fn ordered_trie_root(items: &[Vec<u8>]) -> B256 {
    if items.is_empty() {
        return empty_trie_hash();
    }

    let keyed: Vec<(Vec<u8>, &[u8])> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (to_nibbles(&rlp::encode_uint(i as u64)), item.as_slice()))
        .collect();

    let root = build_node(&keyed);
    B256::from_slice(&Keccak256::digest(&root))
}

/// The hash of an empty trie: keccak256(RLP("")).
pub fn empty_trie_hash() -> B256 {
    B256::from_slice(&Keccak256::digest([0x80]))
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for &b in key {
        nibbles.push(b >> 4);
        nibbles.push(b & 0x0f);
    }
    nibbles
}

/// Hex-prefix encoding of a nibble path.
fn hex_prefix(nibbles: &[u8], leaf: bool) -> Vec<u8> {
    let flag: u8 = if leaf { 0x20 } else { 0x00 };
    let mut out;
    if nibbles.len() % 2 == 1 {
        out = Vec::with_capacity(1 + nibbles.len() / 2);
        out.push(flag | 0x10 | nibbles[0]);
        for pair in nibbles[1..].chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
    } else {
        out = Vec::with_capacity(1 + nibbles.len() / 2);
        out.push(flag);
        for pair in nibbles.chunks(2) {
            out.push((pair[0] << 4) | pair[1]);
        }
    }
    out
}

/// Build the RLP encoding of the node covering `entries`, whose keys share no
/// consumed prefix. Entries must be non-empty and keys distinct.
fn build_node(entries: &[(Vec<u8>, &[u8])]) -> Vec<u8> {
    if entries.len() == 1 {
        let (key, value) = &entries[0];
        return rlp::encode_list(&[
            rlp::encode_bytes(&hex_prefix(key, true)),
            rlp::encode_bytes(value),
        ]);
    }

    // Longest common nibble prefix across all keys.
    let first = &entries[0].0;
    let mut prefix_len = first.len();
    for (key, _) in &entries[1..] {
        let common = first
            .iter()
            .zip(key.iter())
            .take_while(|(a, b)| a == b)
            .count();
        prefix_len = prefix_len.min(common);
    }

    if prefix_len > 0 {
        let stripped: Vec<(Vec<u8>, &[u8])> = entries
            .iter()
            .map(|(key, value)| (key[prefix_len..].to_vec(), *value))
            .collect();
        let child = build_branch(&stripped);
        return rlp::encode_list(&[
            rlp::encode_bytes(&hex_prefix(&first[..prefix_len], false)),
            child_ref(child),
        ]);
    }

    build_branch(entries)
}

/// Build a 17-item branch node over entries with no shared first nibble.
fn build_branch(entries: &[(Vec<u8>, &[u8])]) -> Vec<u8> {
    let mut slots: Vec<Vec<u8>> = vec![rlp::encode_bytes(&[]); 17];
    let mut buckets: [Vec<(Vec<u8>, &[u8])>; 16] = Default::default();

    for (key, value) in entries {
        match key.first() {
            Some(&nibble) => buckets[nibble as usize].push((key[1..].to_vec(), *value)),
            // Key terminates at this branch.
            None => slots[16] = rlp::encode_bytes(value),
        }
    }

    for (i, bucket) in buckets.iter().enumerate() {
        if !bucket.is_empty() {
            slots[i] = child_ref(build_node(bucket));
        }
    }

    rlp::encode_list(&slots)
}

/// Reference to a child node: embedded verbatim when its encoding is shorter
/// than 32 bytes, otherwise its keccak hash as a byte string.
fn child_ref(node: Vec<u8>) -> Vec<u8> {
    if node.len() < 32 {
        node
    } else {
        rlp::encode_bytes(&Keccak256::digest(&node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_root_constant() {
        assert_eq!(
            hex::encode(empty_trie_hash()),
            "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
        );
    }

    #[test]
    fn single_item_matches_manual_leaf() {
        let value = vec![0xAB; 40];
        // Key RLP(0) = 0x80, nibbles [8, 0], even-length leaf prefix 0x20.
        let leaf = rlp::encode_list(&[
            rlp::encode_bytes(&[0x20, 0x80]),
            rlp::encode_bytes(&value),
        ]);
        let expected = B256::from_slice(&Keccak256::digest(&leaf));
        assert_eq!(ordered_trie_root(&[value]), expected);
    }

    #[test]
    fn two_items_match_manual_branch() {
        let v0 = vec![0x11; 40];
        let v1 = vec![0x22; 40];
        // Keys: RLP(0) = 0x80 -> nibbles [8, 0]; RLP(1) = 0x01 -> [0, 1].
        let leaf0 = rlp::encode_list(&[
            rlp::encode_bytes(&[0x30]), // odd leaf, remaining nibble 0
            rlp::encode_bytes(&v0),
        ]);
        let leaf1 = rlp::encode_list(&[
            rlp::encode_bytes(&[0x31]), // odd leaf, remaining nibble 1
            rlp::encode_bytes(&v1),
        ]);
        let mut slots: Vec<Vec<u8>> = vec![rlp::encode_bytes(&[]); 17];
        slots[8] = rlp::encode_bytes(&Keccak256::digest(&leaf0));
        slots[0] = rlp::encode_bytes(&Keccak256::digest(&leaf1));
        let branch = rlp::encode_list(&slots);
        let expected = B256::from_slice(&Keccak256::digest(&branch));
        assert_eq!(ordered_trie_root(&[v0, v1]), expected);
    }

    #[test]
    fn root_depends_on_order() {
        let a = vec![0x01; 40];
        let b = vec![0x02; 40];
        assert_ne!(
            ordered_trie_root(&[a.clone(), b.clone()]),
            ordered_trie_root(&[b, a])
        );
    }

    #[test]
    fn deterministic_over_many_items() {
        let items: Vec<Vec<u8>> = (0..200u64)
            .map(|i| rlp::encode_uint(i.wrapping_mul(0x9e37_79b9)))
            .collect();
        assert_eq!(ordered_trie_root(&items), ordered_trie_root(&items));
    }
}
