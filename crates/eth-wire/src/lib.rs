pub mod eth66;
pub mod rlp;
pub mod trie;
pub mod types;

use thiserror::Error;

/// Errors produced while decoding or validating wire payloads.
///
/// Every variant counts as an invalid-encoding failure for penalty purposes:
/// a peer that sent bytes we cannot decode (or that fail the block sanity
/// checks) gets kicked by the dispatcher.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("rlp: {0}")]
    Rlp(&'static str),
    #[error("{field}: expected {expected} bytes, got {got}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("block sanity: {0}")]
    Sanity(&'static str),
    #[error("hash check: {0}")]
    HashMismatch(&'static str),
}
