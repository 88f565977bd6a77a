use alloy_primitives::{Address, B256, U256};
use sha3::{Digest, Keccak256};

use crate::rlp::{self, RlpCursor};
use crate::WireError;

/// 8-byte PoW nonce.
pub type BlockNonce = [u8; 8];

/// 256-byte log bloom.
pub type Bloom = [u8; 256];

/// Execution block header.
///
/// The optional tail fields follow the wire ordering introduced by the
/// respective forks: base fee (London), withdrawals root (Shanghai), blob gas
/// fields and parent beacon root (Cancun), requests hash (Prague). Peers on
/// older forks simply omit the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_hash: B256,
    pub uncle_hash: B256,
    pub coinbase: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: B256,
    pub nonce: BlockNonce,
    pub base_fee: Option<U256>,
    pub withdrawals_root: Option<B256>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_root: Option<B256>,
    pub requests_hash: Option<B256>,
}

impl BlockHeader {
    /// Compute the header hash (keccak-256 of the canonical RLP encoding).
    ///
    /// Only valid for headers we built ourselves; headers taken off the wire
    /// must be hashed via [`hash_raw_header`] over their original bytes.
    pub fn hash(&self) -> B256 {
        hash_raw_header(&self.rlp_encode())
    }

    /// Canonical RLP encoding of the header.
    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut fields: Vec<Vec<u8>> = Vec::with_capacity(21);

        fields.push(rlp::encode_bytes(self.parent_hash.as_slice()));
        fields.push(rlp::encode_bytes(self.uncle_hash.as_slice()));
        fields.push(rlp::encode_bytes(self.coinbase.as_slice()));
        fields.push(rlp::encode_bytes(self.state_root.as_slice()));
        fields.push(rlp::encode_bytes(self.transactions_root.as_slice()));
        fields.push(rlp::encode_bytes(self.receipts_root.as_slice()));
        fields.push(rlp::encode_bytes(&self.logs_bloom));
        fields.push(rlp::encode_u256(&self.difficulty));
        fields.push(rlp::encode_uint(self.number));
        fields.push(rlp::encode_uint(self.gas_limit));
        fields.push(rlp::encode_uint(self.gas_used));
        fields.push(rlp::encode_uint(self.timestamp));
        fields.push(rlp::encode_bytes(&self.extra_data));
        fields.push(rlp::encode_bytes(self.mix_hash.as_slice()));
        fields.push(rlp::encode_bytes(&self.nonce));

        if let Some(ref base_fee) = self.base_fee {
            fields.push(rlp::encode_u256(base_fee));
        }
        if let Some(ref root) = self.withdrawals_root {
            fields.push(rlp::encode_bytes(root.as_slice()));
        }
        if let Some(blob_gas) = self.blob_gas_used {
            fields.push(rlp::encode_uint(blob_gas));
        }
        if let Some(excess) = self.excess_blob_gas {
            fields.push(rlp::encode_uint(excess));
        }
        if let Some(ref root) = self.parent_beacon_root {
            fields.push(rlp::encode_bytes(root.as_slice()));
        }
        if let Some(ref hash) = self.requests_hash {
            fields.push(rlp::encode_bytes(hash.as_slice()));
        }

        rlp::encode_list(&fields)
    }
}

/// The uncle hash of a block with no uncles: keccak256 of the empty list.
pub fn empty_uncle_hash() -> B256 {
    B256::from_slice(&Keccak256::digest([0xc0]))
}

/// keccak-256 of raw RLP header bytes. This is the canonical block hash; it
/// must be computed over the bytes the peer sent, never over a re-encoding.
pub fn hash_raw_header(raw: &[u8]) -> B256 {
    B256::from_slice(&Keccak256::digest(raw))
}

/// Decode a block header from raw RLP bytes.
pub fn decode_block_header(raw: &[u8]) -> Result<BlockHeader, WireError> {
    let mut outer = RlpCursor::new(raw);
    let mut fields = outer.list()?;
    decode_header_fields(&mut fields)
}

/// Decode header fields from a cursor already positioned inside the header
/// list.
pub(crate) fn decode_header_fields(fields: &mut RlpCursor<'_>) -> Result<BlockHeader, WireError> {
    let parent_hash = fields.b256("parent_hash")?;
    let uncle_hash = fields.b256("uncle_hash")?;
    let coinbase = fields.address()?;
    let state_root = fields.b256("state_root")?;
    let transactions_root = fields.b256("transactions_root")?;
    let receipts_root = fields.b256("receipts_root")?;

    let bloom_bytes = fields.bytes()?;
    if bloom_bytes.len() != 256 {
        return Err(WireError::InvalidLength {
            field: "logs_bloom",
            expected: 256,
            got: bloom_bytes.len(),
        });
    }
    let mut logs_bloom = [0u8; 256];
    logs_bloom.copy_from_slice(bloom_bytes);

    let difficulty = fields.u256()?;
    let number = fields.uint()?;
    let gas_limit = fields.uint()?;
    let gas_used = fields.uint()?;
    let timestamp = fields.uint()?;
    let extra_data = fields.bytes()?.to_vec();
    let mix_hash = fields.b256("mix_hash")?;

    let nonce_bytes = fields.bytes()?;
    if nonce_bytes.len() != 8 {
        return Err(WireError::InvalidLength {
            field: "nonce",
            expected: 8,
            got: nonce_bytes.len(),
        });
    }
    let mut nonce = [0u8; 8];
    nonce.copy_from_slice(nonce_bytes);

    // Fork-dependent tail, strictly positional.
    let base_fee = if !fields.is_empty() { Some(fields.u256()?) } else { None };
    let withdrawals_root = if !fields.is_empty() {
        Some(fields.b256("withdrawals_root")?)
    } else {
        None
    };
    let blob_gas_used = if !fields.is_empty() { Some(fields.uint()?) } else { None };
    let excess_blob_gas = if !fields.is_empty() { Some(fields.uint()?) } else { None };
    let parent_beacon_root = if !fields.is_empty() {
        Some(fields.b256("parent_beacon_root")?)
    } else {
        None
    };
    let requests_hash = if !fields.is_empty() {
        Some(fields.b256("requests_hash")?)
    } else {
        None
    };

    if !fields.is_empty() {
        return Err(WireError::Rlp("trailing header fields"));
    }

    Ok(BlockHeader {
        parent_hash,
        uncle_hash,
        coinbase,
        state_root,
        transactions_root,
        receipts_root,
        logs_bloom,
        difficulty,
        number,
        gas_limit,
        gas_used,
        timestamp,
        extra_data,
        mix_hash,
        nonce,
        base_fee,
        withdrawals_root,
        blob_gas_used,
        excess_blob_gas,
        parent_beacon_root,
        requests_hash,
    })
}

#[cfg(test)]
pub(crate) fn test_header(number: u64) -> BlockHeader {
    BlockHeader {
        parent_hash: B256::ZERO,
        uncle_hash: empty_uncle_hash(),
        coinbase: Address::ZERO,
        state_root: B256::ZERO,
        transactions_root: crate::trie::empty_trie_hash(),
        receipts_root: B256::ZERO,
        logs_bloom: [0u8; 256],
        difficulty: U256::from(131_072u64),
        number,
        gas_limit: 8_000_000,
        gas_used: 21_000,
        timestamp: 1_600_000_000 + number,
        extra_data: Vec::new(),
        mix_hash: B256::ZERO,
        nonce: [0, 0, 0, 0, 0, 0, 0, 42],
        base_fee: None,
        withdrawals_root: None,
        blob_gas_used: None,
        excess_blob_gas: None,
        parent_beacon_root: None,
        requests_hash: None,
    }
}
