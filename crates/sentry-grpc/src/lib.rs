pub mod client;
pub mod proto;

use alloy_primitives::B512;
use thiserror::Error;

pub use client::{
    grpc_channel, InboundMessage, InboundMessageStream, OutboundMessage, PeerEvent,
    PeerEventKind, PeerEventStream, PeerInfo, RemoteSentry, SentryClient, StatusData,
};
pub use proto::{MessageId, PenaltyKind};

/// Largest inbound message accepted from a sentry: 16 MiB. Applied to the
/// gRPC channel's decode limit and re-checked by the stream pump so an
/// oversized message never reaches a handler.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Opaque 512-bit peer identifier, as the sentry reports it.
pub type PeerId = B512;

/// First eight bytes of a peer id as hex, the form peers appear as in logs.
pub fn short_peer_id(peer_id: &PeerId) -> String {
    hex::encode(&peer_id[..8])
}

#[derive(Debug, Error)]
pub enum SentryError {
    #[error("transport: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("rpc: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("malformed peer id: {0} bytes")]
    MalformedPeerId(usize),
    #[error("unknown message id: {0}")]
    UnknownMessageId(i32),
}

impl SentryError {
    /// Whether this error means the target peer has disconnected. Callers
    /// treat that as routine and drop the send.
    pub fn is_peer_not_found(&self) -> bool {
        matches!(self, SentryError::Rpc(status) if status.message().contains("peer not found"))
    }
}

/// Parse a peer id off the wire.
pub fn peer_id_from_bytes(bytes: &[u8]) -> Result<PeerId, SentryError> {
    if bytes.len() != 64 {
        return Err(SentryError::MalformedPeerId(bytes.len()));
    }
    Ok(B512::from_slice(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_not_found_classification() {
        let err = SentryError::Rpc(tonic::Status::not_found("peer not found: deadbeef"));
        assert!(err.is_peer_not_found());

        let err = SentryError::Rpc(tonic::Status::internal("db closed"));
        assert!(!err.is_peer_not_found());
    }

    #[test]
    fn peer_id_length_is_checked() {
        assert!(peer_id_from_bytes(&[0u8; 64]).is_ok());
        assert!(matches!(
            peer_id_from_bytes(&[0u8; 32]),
            Err(SentryError::MalformedPeerId(32))
        ));
    }

    #[test]
    fn short_peer_id_is_first_eight_bytes() {
        let mut id = [0u8; 64];
        id[0] = 0xAB;
        assert_eq!(short_peer_id(&PeerId::from_slice(&id)), "ab00000000000000");
    }
}
