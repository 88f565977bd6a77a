//! eth/66 packet codecs.
//!
//! Every request/response payload is framed as `[request_id, inner]`. Decoders
//! hand back the exact wire bytes of each header so hashes stay stable across
//! the decode boundary; responses are encoded from raw RLP items the store
//! already holds, preserving their original encoding.

use alloy_primitives::{B256, U256};
use sha3::{Digest, Keccak256};

use crate::rlp::{self, RlpCursor};
use crate::trie;
use crate::types::{decode_block_header, BlockHeader};
use crate::WireError;

/// A block announcement: hash plus height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockAnnounce {
    pub hash: B256,
    pub number: u64,
}

/// Decode a NewBlockHashes payload: `[[hash, number], ...]`.
pub fn decode_new_block_hashes(data: &[u8]) -> Result<Vec<BlockAnnounce>, WireError> {
    let mut outer = RlpCursor::new(data);
    let mut entries = outer.list()?;
    let mut announces = Vec::new();
    while !entries.is_empty() {
        let mut entry = entries.list()?;
        let hash = entry.b256("block_hash")?;
        let number = entry.uint()?;
        announces.push(BlockAnnounce { hash, number });
    }
    Ok(announces)
}

/// Encode a NewBlockHashes payload.
pub fn encode_new_block_hashes(announces: &[BlockAnnounce]) -> Vec<u8> {
    let entries: Vec<Vec<u8>> = announces
        .iter()
        .map(|a| {
            rlp::encode_list(&[
                rlp::encode_bytes(a.hash.as_slice()),
                rlp::encode_uint(a.number),
            ])
        })
        .collect();
    rlp::encode_list(&entries)
}

/// A decoded header together with the exact bytes it arrived as.
#[derive(Debug, Clone)]
pub struct HeaderWithRaw<'a> {
    pub header: BlockHeader,
    pub raw: &'a [u8],
}

/// Decode a BlockHeaders packet: `(request_id, [header, ...])`. The raw slice
/// of every header is captured before the typed decode, never re-encoded.
pub fn decode_block_headers(data: &[u8]) -> Result<(u64, Vec<HeaderWithRaw<'_>>), WireError> {
    let mut outer = RlpCursor::new(data);
    let mut packet = outer.list()?;
    let request_id = packet.uint()?;
    let mut list = packet.list()?;

    let mut headers = Vec::new();
    while !list.is_empty() {
        let raw = list.raw()?;
        let header = decode_block_header(raw)?;
        headers.push(HeaderWithRaw { header, raw });
    }
    Ok((request_id, headers))
}

/// Origin of a GetBlockHeaders query: either an exact hash or a height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOrNumber {
    Hash(B256),
    Number(u64),
}

/// GetBlockHeaders query parameters. Skip/origin/reverse semantics are the
/// store's concern; the wire layer only carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetBlockHeadersQuery {
    pub origin: HashOrNumber,
    pub amount: u64,
    pub skip: u64,
    pub reverse: bool,
}

/// Decode a GetBlockHeaders packet: `(request_id, (origin, amount, skip, reverse))`.
pub fn decode_get_block_headers(data: &[u8]) -> Result<(u64, GetBlockHeadersQuery), WireError> {
    let mut outer = RlpCursor::new(data);
    let mut packet = outer.list()?;
    let request_id = packet.uint()?;
    let mut query = packet.list()?;

    let origin_bytes = query.bytes()?;
    let origin = if origin_bytes.len() == 32 {
        HashOrNumber::Hash(B256::from_slice(origin_bytes))
    } else if origin_bytes.len() <= 8 {
        if origin_bytes.first() == Some(&0) {
            return Err(WireError::Rlp("origin number has leading zero"));
        }
        HashOrNumber::Number(
            origin_bytes
                .iter()
                .fold(0u64, |acc, &b| (acc << 8) | b as u64),
        )
    } else {
        return Err(WireError::InvalidLength {
            field: "origin",
            expected: 32,
            got: origin_bytes.len(),
        });
    };

    let amount = query.uint()?;
    let skip = query.uint()?;
    let reverse = query.uint()? != 0;

    Ok((
        request_id,
        GetBlockHeadersQuery {
            origin,
            amount,
            skip,
            reverse,
        },
    ))
}

/// Encode a GetBlockHeaders packet.
pub fn encode_get_block_headers(request_id: u64, query: &GetBlockHeadersQuery) -> Vec<u8> {
    let origin = match query.origin {
        HashOrNumber::Hash(hash) => rlp::encode_bytes(hash.as_slice()),
        HashOrNumber::Number(number) => rlp::encode_uint(number),
    };
    let inner = rlp::encode_list(&[
        origin,
        rlp::encode_uint(query.amount),
        rlp::encode_uint(query.skip),
        rlp::encode_uint(u64::from(query.reverse)),
    ]);
    let mut payload = rlp::encode_uint(request_id);
    payload.extend_from_slice(&inner);
    rlp::wrap_list(&payload)
}

/// Encode a `(request_id, [item, ...])` response from raw RLP items. Used for
/// BlockHeaders, BlockBodies and Receipts replies; the items keep the exact
/// encoding the store handed out.
pub fn encode_raw_list_packet(request_id: u64, items: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = items.iter().map(|i| i.len()).sum();
    let mut list_payload = Vec::with_capacity(total);
    for item in items {
        list_payload.extend_from_slice(item);
    }
    let mut payload = rlp::encode_uint(request_id);
    payload.extend_from_slice(&rlp::wrap_list(&list_payload));
    rlp::wrap_list(&payload)
}

/// Decode a `(request_id, [hash, ...])` query (GetBlockBodies, GetReceipts).
pub fn decode_hash_list(data: &[u8]) -> Result<(u64, Vec<B256>), WireError> {
    let mut outer = RlpCursor::new(data);
    let mut packet = outer.list()?;
    let request_id = packet.uint()?;
    let mut list = packet.list()?;
    let mut hashes = Vec::new();
    while !list.is_empty() {
        hashes.push(list.b256("block_hash")?);
    }
    Ok((request_id, hashes))
}

/// Encode a `(request_id, [hash, ...])` query.
pub fn encode_hash_list(request_id: u64, hashes: &[B256]) -> Vec<u8> {
    let items: Vec<Vec<u8>> = hashes
        .iter()
        .map(|h| rlp::encode_bytes(h.as_slice()))
        .collect();
    encode_raw_list_packet(request_id, &items)
}

/// One block body off the wire: raw transactions, decoded uncles, and raw
/// withdrawals when the peer is past Shanghai.
#[derive(Debug, Clone, Default)]
pub struct RawBlockBody {
    pub transactions: Vec<Vec<u8>>,
    pub uncles: Vec<BlockHeader>,
    pub withdrawals: Option<Vec<Vec<u8>>>,
}

/// Decode a BlockBodies packet: `(request_id, [(txs, uncles, withdrawals?), ...])`.
pub fn decode_block_bodies(data: &[u8]) -> Result<(u64, Vec<RawBlockBody>), WireError> {
    let mut outer = RlpCursor::new(data);
    let mut packet = outer.list()?;
    let request_id = packet.uint()?;
    let mut list = packet.list()?;

    let mut bodies = Vec::new();
    while !list.is_empty() {
        let mut body = list.list()?;

        let mut txs = body.list()?;
        let mut transactions = Vec::new();
        while !txs.is_empty() {
            transactions.push(txs.raw()?.to_vec());
        }

        let mut uncle_list = body.list()?;
        let mut uncles = Vec::new();
        while !uncle_list.is_empty() {
            uncles.push(decode_block_header(uncle_list.raw()?)?);
        }

        let withdrawals = if !body.is_empty() {
            let mut wlist = body.list()?;
            let mut withdrawals = Vec::new();
            while !wlist.is_empty() {
                withdrawals.push(wlist.raw()?.to_vec());
            }
            Some(withdrawals)
        } else {
            None
        };

        bodies.push(RawBlockBody {
            transactions,
            uncles,
            withdrawals,
        });
    }
    Ok((request_id, bodies))
}

/// Split bodies into the parallel per-block slices the body downloader
/// consumes.
pub fn unpack_bodies(
    bodies: Vec<RawBlockBody>,
) -> (Vec<Vec<Vec<u8>>>, Vec<Vec<BlockHeader>>, Vec<Vec<Vec<u8>>>) {
    let mut txs = Vec::with_capacity(bodies.len());
    let mut uncles = Vec::with_capacity(bodies.len());
    let mut withdrawals = Vec::with_capacity(bodies.len());
    for body in bodies {
        txs.push(body.transactions);
        uncles.push(body.uncles);
        withdrawals.push(body.withdrawals.unwrap_or_default());
    }
    (txs, uncles, withdrawals)
}

/// A decoded NewBlock broadcast: `(block, total_difficulty)`.
#[derive(Debug, Clone)]
pub struct NewBlockPacket {
    pub header: BlockHeader,
    /// Exact wire bytes of the header, the hash-stable view.
    pub header_raw: Vec<u8>,
    pub transactions: Vec<Vec<u8>>,
    pub uncles: Vec<BlockHeader>,
    /// keccak of the uncle list as it arrived, for the hash check.
    pub uncles_hash: B256,
    pub withdrawals: Option<Vec<Vec<u8>>>,
    pub td: U256,
}

/// Decode a NewBlock packet, capturing the header's raw bytes on the way in.
pub fn decode_new_block(data: &[u8]) -> Result<NewBlockPacket, WireError> {
    let mut outer = RlpCursor::new(data);
    let mut packet = outer.list()?;
    let mut block = packet.list()?;

    let header_raw = block.raw()?;
    let header = decode_block_header(header_raw)?;

    let mut txs = block.list()?;
    let mut transactions = Vec::new();
    while !txs.is_empty() {
        transactions.push(txs.raw()?.to_vec());
    }

    let uncles_raw = block.raw()?;
    let uncles_hash = B256::from_slice(&Keccak256::digest(uncles_raw));
    let mut uncle_list = RlpCursor::new(uncles_raw).list()?;
    let mut uncles = Vec::new();
    while !uncle_list.is_empty() {
        uncles.push(decode_block_header(uncle_list.raw()?)?);
    }

    let withdrawals = if !block.is_empty() {
        let mut wlist = block.list()?;
        let mut withdrawals = Vec::new();
        while !wlist.is_empty() {
            withdrawals.push(wlist.raw()?.to_vec());
        }
        Some(withdrawals)
    } else {
        None
    };

    let td = packet.u256()?;

    Ok(NewBlockPacket {
        header,
        header_raw: header_raw.to_vec(),
        transactions,
        uncles,
        uncles_hash,
        withdrawals,
        td,
    })
}

impl NewBlockPacket {
    /// Cheap structural checks before the block touches the downloader.
    pub fn sanity_check(&self) -> Result<(), WireError> {
        // A real chain's TD fits comfortably below 2^100; anything wider is a
        // crafted value.
        if self.td.bit_len() > 100 {
            return Err(WireError::Sanity("total difficulty too large"));
        }
        if self.header.extra_data.len() > 1024 {
            return Err(WireError::Sanity("extra data too long"));
        }
        Ok(())
    }

    /// Verify the body against the commitments in the header.
    pub fn hash_check(&self) -> Result<(), WireError> {
        if self.uncles_hash != self.header.uncle_hash {
            return Err(WireError::HashMismatch("uncle hash"));
        }
        if trie::ordered_trie_root(&self.transactions) != self.header.transactions_root {
            return Err(WireError::HashMismatch("transactions root"));
        }
        match (self.header.withdrawals_root, &self.withdrawals) {
            (Some(root), Some(withdrawals)) => {
                if trie::ordered_trie_root(withdrawals) != root {
                    return Err(WireError::HashMismatch("withdrawals root"));
                }
            }
            (None, None) => {}
            _ => return Err(WireError::HashMismatch("withdrawals presence")),
        }
        Ok(())
    }
}
