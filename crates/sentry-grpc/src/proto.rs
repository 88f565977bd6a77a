//! Wire-level types for the `sentry.Sentry` gRPC service.
//!
//! The service is implemented by the external sentry process; only the client
//! side lives here, so the message types are written out with prost derives
//! instead of being generated from the `.proto` at build time. Field tags and
//! enum values are part of the wire contract and must not be renumbered.

/// eth/66 message tags carried in stream subscriptions and envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageId {
    Status66 = 0,
    NewBlockHashes66 = 1,
    NewBlock66 = 2,
    Transactions66 = 3,
    GetBlockHeaders66 = 4,
    BlockHeaders66 = 5,
    GetBlockBodies66 = 6,
    BlockBodies66 = 7,
    GetReceipts66 = 8,
    Receipts66 = 9,
    NewPooledTransactionHashes66 = 10,
    GetPooledTransactions66 = 11,
    PooledTransactions66 = 12,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum PenaltyKind {
    Kick = 0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum PeerEventId {
    Connect = 0,
    Disconnect = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessagesRequest {
    #[prost(enumeration = "MessageId", repeated, tag = "1")]
    pub ids: Vec<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InboundMessage {
    #[prost(enumeration = "MessageId", tag = "1")]
    pub id: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub peer_id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OutboundMessageData {
    #[prost(enumeration = "MessageId", tag = "1")]
    pub id: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendMessageByIdRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub data: Option<OutboundMessageData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendMessageToRandomPeersRequest {
    #[prost(uint64, tag = "1")]
    pub max_peers: u64,
    #[prost(message, optional, tag = "2")]
    pub data: Option<OutboundMessageData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SentPeers {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub peers: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PenalizePeerRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
    #[prost(enumeration = "PenaltyKind", tag = "2")]
    pub penalty: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerMinBlockRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub min_block: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerEventsRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerEvent {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
    #[prost(enumeration = "PeerEventId", tag = "2")]
    pub event_id: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerByIdRequest {
    #[prost(bytes = "vec", tag = "1")]
    pub peer_id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerInfoReply {
    #[prost(message, optional, tag = "1")]
    pub peer: Option<PeerInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PeerInfo {
    #[prost(string, tag = "1")]
    pub enode: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, repeated, tag = "3")]
    pub caps: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Forks {
    #[prost(bytes = "vec", tag = "1")]
    pub genesis: Vec<u8>,
    #[prost(uint64, repeated, tag = "2")]
    pub height_forks: Vec<u64>,
    #[prost(uint64, repeated, tag = "3")]
    pub time_forks: Vec<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusData {
    #[prost(uint64, tag = "1")]
    pub network_id: u64,
    #[prost(bytes = "vec", tag = "2")]
    pub total_difficulty: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub best_hash: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub fork_data: Option<Forks>,
    #[prost(uint64, tag = "5")]
    pub max_block_height: u64,
}
