//! The sentry RPC surface as consumed by the router, plus the tonic-backed
//! remote implementation.

use std::time::Duration;

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::proto;
use crate::proto::{MessageId, PeerEventId, PenaltyKind};
use crate::{peer_id_from_bytes, PeerId, SentryError, MAX_MESSAGE_SIZE};

/// Minimum time a dial attempt is given before the channel gives up on it.
pub const GRPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// One framed eth/66 message received from a peer via the sentry.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub peer_id: PeerId,
    pub data: Vec<u8>,
}

/// An eth/66 message to be sent through the sentry.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEventKind {
    Connect,
    Disconnect,
}

/// A peer connect/disconnect notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEvent {
    pub peer_id: PeerId,
    pub kind: PeerEventKind,
}

/// Peer metadata, available on request after a connect event.
#[derive(Debug, Clone, Default)]
pub struct PeerInfo {
    pub enode: String,
    pub client_id: String,
    pub capabilities: Vec<String>,
}

/// Chain-status handshake payload. The sentry must hold a current status
/// before it will accept a message subscription.
#[derive(Debug, Clone, Default)]
pub struct StatusData {
    pub network_id: u64,
    pub total_difficulty: U256,
    pub best_hash: B256,
    pub genesis_hash: B256,
    pub height_forks: Vec<u64>,
    pub time_forks: Vec<u64>,
    pub max_block_height: u64,
}

pub type InboundMessageStream = BoxStream<'static, Result<InboundMessage, SentryError>>;
pub type PeerEventStream = BoxStream<'static, Result<PeerEvent, SentryError>>;

/// Client-side sentry surface.
///
/// Implementations hide where the sentry lives: out of process behind gRPC
/// (the normal case, [`RemoteSentry`]) or in-process in tests. All methods
/// take `&self`; implementations handle their own synchronization.
#[async_trait]
pub trait SentryClient: Send + Sync {
    /// Push a fresh chain-status handshake. Must precede `messages` and
    /// `peer_events` subscriptions.
    async fn set_status(&self, status: StatusData) -> Result<(), SentryError>;

    /// Subscribe to inbound messages carrying any of `ids`.
    async fn messages(&self, ids: Vec<MessageId>) -> Result<InboundMessageStream, SentryError>;

    /// Subscribe to peer connect/disconnect events.
    async fn peer_events(&self) -> Result<PeerEventStream, SentryError>;

    async fn send_message_by_id(
        &self,
        peer_id: PeerId,
        msg: OutboundMessage,
    ) -> Result<Vec<PeerId>, SentryError>;

    async fn send_message_to_random_peers(
        &self,
        max_peers: u64,
        msg: OutboundMessage,
    ) -> Result<Vec<PeerId>, SentryError>;

    async fn send_message_to_all(&self, msg: OutboundMessage) -> Result<Vec<PeerId>, SentryError>;

    async fn penalize_peer(&self, peer_id: PeerId, penalty: PenaltyKind)
        -> Result<(), SentryError>;

    /// Tell the sentry the lowest block the peer is known to have.
    async fn peer_min_block(&self, peer_id: PeerId, min_block: u64) -> Result<(), SentryError>;

    async fn peer_by_id(&self, peer_id: PeerId) -> Result<Option<PeerInfo>, SentryError>;

    /// In-process sentries report readiness; remote ones are always "ready"
    /// and surface connectivity through RPC errors instead.
    fn ready(&self) -> bool {
        true
    }
}

/// Build the gRPC channel for a sentry address. Insecure transport; the
/// channel connects lazily so reconnect pacing stays with the stream
/// supervisor.
pub fn grpc_channel(addr: &str) -> Result<Channel, SentryError> {
    let url = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    };
    let endpoint = Endpoint::from_shared(url)?
        .connect_timeout(GRPC_CONNECT_TIMEOUT)
        .tcp_nodelay(true);
    Ok(endpoint.connect_lazy())
}

/// gRPC-backed sentry client.
#[derive(Clone)]
pub struct RemoteSentry {
    channel: Channel,
}

impl RemoteSentry {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub fn connect(addr: &str) -> Result<Self, SentryError> {
        Ok(Self::new(grpc_channel(addr)?))
    }

    fn grpc(&self) -> tonic::client::Grpc<Channel> {
        tonic::client::Grpc::new(self.channel.clone()).max_decoding_message_size(MAX_MESSAGE_SIZE)
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, SentryError>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        let mut grpc = self.grpc();
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("sentry channel not ready: {e}")))?;
        let codec: tonic::codec::ProstCodec<Req, Resp> = tonic::codec::ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }

    async fn server_streaming<Req, Resp>(
        &self,
        path: &'static str,
        request: Req,
    ) -> Result<tonic::Streaming<Resp>, SentryError>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        let mut grpc = self.grpc();
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("sentry channel not ready: {e}")))?;
        let codec: tonic::codec::ProstCodec<Req, Resp> = tonic::codec::ProstCodec::default();
        let response = grpc
            .server_streaming(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl SentryClient for RemoteSentry {
    async fn set_status(&self, status: StatusData) -> Result<(), SentryError> {
        let _: proto::Empty = self
            .unary("/sentry.Sentry/SetStatus", status_to_proto(&status))
            .await?;
        Ok(())
    }

    async fn messages(&self, ids: Vec<MessageId>) -> Result<InboundMessageStream, SentryError> {
        let request = proto::MessagesRequest {
            ids: ids.into_iter().map(|id| id as i32).collect(),
        };
        let raw: tonic::Streaming<proto::InboundMessage> =
            self.server_streaming("/sentry.Sentry/Messages", request).await?;

        Ok(raw
            .filter_map(|item| async move {
                match item {
                    Ok(msg) => match inbound_from_proto(msg) {
                        Ok(converted) => Some(Ok(converted)),
                        Err(err) => {
                            debug!(err = %err, "dropping malformed inbound envelope");
                            None
                        }
                    },
                    Err(status) => Some(Err(SentryError::Rpc(status))),
                }
            })
            .boxed())
    }

    async fn peer_events(&self) -> Result<PeerEventStream, SentryError> {
        let raw: tonic::Streaming<proto::PeerEvent> = self
            .server_streaming("/sentry.Sentry/PeerEvents", proto::PeerEventsRequest {})
            .await?;

        Ok(raw
            .filter_map(|item| async move {
                match item {
                    Ok(event) => match peer_event_from_proto(event) {
                        Ok(converted) => Some(Ok(converted)),
                        Err(err) => {
                            debug!(err = %err, "dropping malformed peer event");
                            None
                        }
                    },
                    Err(status) => Some(Err(SentryError::Rpc(status))),
                }
            })
            .boxed())
    }

    async fn send_message_by_id(
        &self,
        peer_id: PeerId,
        msg: OutboundMessage,
    ) -> Result<Vec<PeerId>, SentryError> {
        let request = proto::SendMessageByIdRequest {
            peer_id: peer_id.as_slice().to_vec(),
            data: Some(outbound_to_proto(msg)),
        };
        let sent: proto::SentPeers = self
            .unary("/sentry.Sentry/SendMessageById", request)
            .await?;
        Ok(sent_peers_from_proto(sent))
    }

    async fn send_message_to_random_peers(
        &self,
        max_peers: u64,
        msg: OutboundMessage,
    ) -> Result<Vec<PeerId>, SentryError> {
        let request = proto::SendMessageToRandomPeersRequest {
            max_peers,
            data: Some(outbound_to_proto(msg)),
        };
        let sent: proto::SentPeers = self
            .unary("/sentry.Sentry/SendMessageToRandomPeers", request)
            .await?;
        Ok(sent_peers_from_proto(sent))
    }

    async fn send_message_to_all(&self, msg: OutboundMessage) -> Result<Vec<PeerId>, SentryError> {
        let sent: proto::SentPeers = self
            .unary("/sentry.Sentry/SendMessageToAll", outbound_to_proto(msg))
            .await?;
        Ok(sent_peers_from_proto(sent))
    }

    async fn penalize_peer(
        &self,
        peer_id: PeerId,
        penalty: PenaltyKind,
    ) -> Result<(), SentryError> {
        let request = proto::PenalizePeerRequest {
            peer_id: peer_id.as_slice().to_vec(),
            penalty: penalty as i32,
        };
        let _: proto::Empty = self.unary("/sentry.Sentry/PenalizePeer", request).await?;
        Ok(())
    }

    async fn peer_min_block(&self, peer_id: PeerId, min_block: u64) -> Result<(), SentryError> {
        let request = proto::PeerMinBlockRequest {
            peer_id: peer_id.as_slice().to_vec(),
            min_block,
        };
        let _: proto::Empty = self.unary("/sentry.Sentry/PeerMinBlock", request).await?;
        Ok(())
    }

    async fn peer_by_id(&self, peer_id: PeerId) -> Result<Option<PeerInfo>, SentryError> {
        let request = proto::PeerByIdRequest {
            peer_id: peer_id.as_slice().to_vec(),
        };
        let reply: proto::PeerInfoReply = self.unary("/sentry.Sentry/PeerById", request).await?;
        Ok(reply.peer.map(|peer| PeerInfo {
            enode: peer.enode,
            client_id: peer.name,
            capabilities: peer.caps,
        }))
    }
}

fn inbound_from_proto(msg: proto::InboundMessage) -> Result<InboundMessage, SentryError> {
    let id = MessageId::try_from(msg.id).map_err(|_| SentryError::UnknownMessageId(msg.id))?;
    Ok(InboundMessage {
        id,
        peer_id: peer_id_from_bytes(&msg.peer_id)?,
        data: msg.data,
    })
}

fn peer_event_from_proto(event: proto::PeerEvent) -> Result<PeerEvent, SentryError> {
    let kind = match PeerEventId::try_from(event.event_id) {
        Ok(PeerEventId::Connect) => PeerEventKind::Connect,
        Ok(PeerEventId::Disconnect) => PeerEventKind::Disconnect,
        Err(_) => return Err(SentryError::UnknownMessageId(event.event_id)),
    };
    Ok(PeerEvent {
        peer_id: peer_id_from_bytes(&event.peer_id)?,
        kind,
    })
}

fn outbound_to_proto(msg: OutboundMessage) -> proto::OutboundMessageData {
    proto::OutboundMessageData {
        id: msg.id as i32,
        data: msg.data,
    }
}

fn sent_peers_from_proto(sent: proto::SentPeers) -> Vec<PeerId> {
    sent.peers
        .iter()
        .filter_map(|bytes| peer_id_from_bytes(bytes).ok())
        .collect()
}

fn status_to_proto(status: &StatusData) -> proto::StatusData {
    let td = status.total_difficulty.to_be_bytes::<32>();
    let start = td.iter().position(|&b| b != 0).unwrap_or(32);
    proto::StatusData {
        network_id: status.network_id,
        total_difficulty: td[start..].to_vec(),
        best_hash: status.best_hash.as_slice().to_vec(),
        fork_data: Some(proto::Forks {
            genesis: status.genesis_hash.as_slice().to_vec(),
            height_forks: status.height_forks.clone(),
            time_forks: status.time_forks.clone(),
        }),
        max_block_height: status.max_block_height,
    }
}
