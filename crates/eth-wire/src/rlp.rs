//! Strict RLP primitives: a zero-copy cursor for decoding and minimal
//! encoders for building outbound payloads.
//!
//! The cursor hands out sub-slices of the input buffer, so callers can keep
//! the exact wire bytes of an item (needed for hash-stable header handling)
//! without re-encoding. Decoding is canonical-strict: non-minimal length
//! prefixes, integers with leading zeros and single bytes wrapped in a string
//! prefix are all rejected, because a peer sending them is sending us garbage.

use alloy_primitives::{Address, B256, U256};

use crate::WireError;

mod consts {
    pub const SINGLE_BYTE_MAX: u8 = 0x7f;
    pub const SHORT_STRING_PREFIX: u8 = 0x80;
    pub const SHORT_STRING_MAX: u8 = 0xb7;
    pub const LONG_STRING_MAX: u8 = 0xbf;
    pub const SHORT_LIST_PREFIX: u8 = 0xc0;
    pub const LONG_LIST_MAX: u8 = 0xf7;
}

/// Parsed head of the next item: where its payload sits and whether it is a
/// list. Offsets are relative to the cursor buffer.
struct Head {
    list: bool,
    payload_start: usize,
    payload_len: usize,
}

impl Head {
    fn total_len(&self) -> usize {
        self.payload_start + self.payload_len
    }
}

/// Forward-only reader over one RLP buffer.
///
/// `list()` returns a child cursor borrowing the list payload; the parent
/// cursor is already advanced past the whole list, so nesting never requires
/// bookkeeping in the caller.
pub struct RlpCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RlpCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// True when every item has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn head(&self) -> Result<Head, WireError> {
        let rest = &self.buf[self.pos..];
        let first = *rest.first().ok_or(WireError::Rlp("unexpected end of input"))?;

        let head = if first <= consts::SINGLE_BYTE_MAX {
            Head {
                list: false,
                payload_start: 0,
                payload_len: 1,
            }
        } else if first <= consts::SHORT_STRING_MAX {
            let len = (first - consts::SHORT_STRING_PREFIX) as usize;
            if len == 1 && rest.len() > 1 && rest[1] <= consts::SINGLE_BYTE_MAX {
                return Err(WireError::Rlp("single byte below 0x80 must not be prefixed"));
            }
            Head {
                list: false,
                payload_start: 1,
                payload_len: len,
            }
        } else if first <= consts::LONG_STRING_MAX {
            let len_of_len = (first - consts::SHORT_STRING_MAX) as usize;
            let len = decode_length(&rest[1..], len_of_len)?;
            if len < 56 {
                return Err(WireError::Rlp("long string length below 56"));
            }
            Head {
                list: false,
                payload_start: 1 + len_of_len,
                payload_len: len,
            }
        } else if first <= consts::LONG_LIST_MAX {
            let len = (first - consts::SHORT_LIST_PREFIX) as usize;
            Head {
                list: true,
                payload_start: 1,
                payload_len: len,
            }
        } else {
            let len_of_len = (first - consts::LONG_LIST_MAX) as usize;
            let len = decode_length(&rest[1..], len_of_len)?;
            if len < 56 {
                return Err(WireError::Rlp("long list length below 56"));
            }
            Head {
                list: true,
                payload_start: 1 + len_of_len,
                payload_len: len,
            }
        };

        let total = head
            .payload_start
            .checked_add(head.payload_len)
            .ok_or(WireError::Rlp("item length overflow"))?;
        if total > rest.len() {
            return Err(WireError::Rlp("item length exceeds input"));
        }
        Ok(head)
    }

    /// Consume the next item, which must be a string, and return its payload.
    pub fn bytes(&mut self) -> Result<&'a [u8], WireError> {
        let head = self.head()?;
        if head.list {
            return Err(WireError::Rlp("expected bytes, got list"));
        }
        let start = self.pos + head.payload_start;
        let payload = &self.buf[start..start + head.payload_len];
        self.pos += head.total_len();
        Ok(payload)
    }

    /// Consume the next item, which must be a list, and return a cursor over
    /// its payload.
    pub fn list(&mut self) -> Result<RlpCursor<'a>, WireError> {
        let head = self.head()?;
        if !head.list {
            return Err(WireError::Rlp("expected list, got bytes"));
        }
        let start = self.pos + head.payload_start;
        let payload = &self.buf[start..start + head.payload_len];
        self.pos += head.total_len();
        Ok(RlpCursor::new(payload))
    }

    /// Consume the next item of either kind and return its full encoding,
    /// prefix included. This is the hash-stable view of the item.
    pub fn raw(&mut self) -> Result<&'a [u8], WireError> {
        let head = self.head()?;
        let raw = &self.buf[self.pos..self.pos + head.total_len()];
        self.pos += head.total_len();
        Ok(raw)
    }

    /// Consume a canonically encoded unsigned integer (at most 8 bytes, no
    /// leading zeros, empty string means zero).
    pub fn uint(&mut self) -> Result<u64, WireError> {
        let bytes = self.bytes()?;
        if bytes.len() > 8 {
            return Err(WireError::Rlp("integer wider than 64 bits"));
        }
        if bytes.first() == Some(&0) {
            return Err(WireError::Rlp("integer has leading zero"));
        }
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }

    /// Consume a canonically encoded unsigned integer of at most 256 bits.
    pub fn u256(&mut self) -> Result<U256, WireError> {
        let bytes = self.bytes()?;
        if bytes.len() > 32 {
            return Err(WireError::InvalidLength {
                field: "u256",
                expected: 32,
                got: bytes.len(),
            });
        }
        if bytes.first() == Some(&0) {
            return Err(WireError::Rlp("integer has leading zero"));
        }
        let mut buf = [0u8; 32];
        buf[32 - bytes.len()..].copy_from_slice(bytes);
        Ok(U256::from_be_bytes(buf))
    }

    /// Consume a 32-byte hash.
    pub fn b256(&mut self, field: &'static str) -> Result<B256, WireError> {
        let bytes = self.bytes()?;
        if bytes.len() != 32 {
            return Err(WireError::InvalidLength {
                field,
                expected: 32,
                got: bytes.len(),
            });
        }
        Ok(B256::from_slice(bytes))
    }

    /// Consume a 20-byte address.
    pub fn address(&mut self) -> Result<Address, WireError> {
        let bytes = self.bytes()?;
        if bytes.len() != 20 {
            return Err(WireError::InvalidLength {
                field: "address",
                expected: 20,
                got: bytes.len(),
            });
        }
        Ok(Address::from_slice(bytes))
    }
}

fn decode_length(rest: &[u8], len_of_len: usize) -> Result<usize, WireError> {
    if len_of_len == 0 || len_of_len > 8 {
        return Err(WireError::Rlp("bad length-of-length"));
    }
    if rest.len() < len_of_len {
        return Err(WireError::Rlp("input too short for length"));
    }
    if rest[0] == 0 {
        return Err(WireError::Rlp("length has leading zero"));
    }
    let mut len: u64 = 0;
    for &b in &rest[..len_of_len] {
        len = (len << 8) | b as u64;
    }
    usize::try_from(len).map_err(|_| WireError::Rlp("length overflow"))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// RLP-encode a byte string.
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] <= consts::SINGLE_BYTE_MAX {
        return data.to_vec();
    }
    let mut out = length_prefix(data.len(), consts::SHORT_STRING_PREFIX);
    out.extend_from_slice(data);
    out
}

/// RLP-encode a u64 as big-endian bytes with no leading zeros.
pub fn encode_uint(v: u64) -> Vec<u8> {
    if v == 0 {
        return encode_bytes(&[]);
    }
    let bytes = v.to_be_bytes();
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(8);
    encode_bytes(&bytes[start..])
}

/// RLP-encode a U256 as big-endian bytes with no leading zeros.
pub fn encode_u256(v: &U256) -> Vec<u8> {
    if v.is_zero() {
        return encode_bytes(&[]);
    }
    let buf = v.to_be_bytes::<32>();
    let start = buf.iter().position(|&b| b != 0).unwrap_or(32);
    encode_bytes(&buf[start..])
}

/// Wrap an already-encoded payload in a list prefix.
pub fn wrap_list(payload: &[u8]) -> Vec<u8> {
    let mut out = length_prefix(payload.len(), consts::SHORT_LIST_PREFIX);
    out.extend_from_slice(payload);
    out
}

/// Build an RLP list from already-encoded items.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = items.iter().map(|i| i.len()).sum();
    let mut payload = Vec::with_capacity(total);
    for item in items {
        payload.extend_from_slice(item);
    }
    wrap_list(&payload)
}

fn length_prefix(len: usize, offset: u8) -> Vec<u8> {
    if len < 56 {
        vec![offset + len as u8]
    } else {
        let bytes = (len as u64).to_be_bytes();
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(7);
        let len_bytes = &bytes[start..];
        let mut out = vec![offset + 55 + len_bytes.len() as u8];
        out.extend_from_slice(len_bytes);
        out
    }
}
