//! Wire types for every layer of the stack.
//!
//! Every frame on a connection is one line of UTF-8 JSON. The first line is a
//! [`Handshake`]; every following line is a [`BEnvelope`]. Upper layers nest
//! their own envelope inside the `body` of the layer below, so a
//! totally-ordered application message travels as
//! `BEnvelope { body: REnvelope { body: AskProposalSeq { body: TOEnvelope } } }`.
//!
//! Byte bodies are base64 strings on the wire.

use {
    crate::{
        config::NodeId,
        dispatcher::{Routable, RouteKey},
        error::Result,
    },
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    uuid::Uuid,
};

/// Globally-unique id used for reliable dedup and for sequencing.
pub type MessageId = Uuid;

/// Fresh random message id.
pub fn new_message_id() -> MessageId {
    Uuid::new_v4()
}

pub const RELIABLE_MULTICAST_PATH: &str = "/r-multicast";
pub const ASK_PROPOSAL_SEQ_PATH: &str = "/total-ording/ask-proposal-seq";
pub const WAIT_PROPOSAL_SEQ_PATH: &str = "/total-ording/wait-proposal-seq";
pub const ANNOUNCE_AGREEMENT_SEQ_PATH: &str = "/total-ording/announce-agreement-seq";

/// The fixed set of paths the stack itself routes on.
///
/// B-layer frames are routed on [`ControlPath::ReliableMulticast`] and
/// [`ControlPath::ReplyProposalSeq`]; R-layer frames on
/// [`ControlPath::AskProposalSeq`] and [`ControlPath::AnnounceAgreementSeq`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPath {
    ReliableMulticast,
    AskProposalSeq,
    ReplyProposalSeq,
    AnnounceAgreementSeq,
}

impl ControlPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReliableMulticast => RELIABLE_MULTICAST_PATH,
            Self::AskProposalSeq => ASK_PROPOSAL_SEQ_PATH,
            Self::ReplyProposalSeq => WAIT_PROPOSAL_SEQ_PATH,
            Self::AnnounceAgreementSeq => ANNOUNCE_AGREEMENT_SEQ_PATH,
        }
    }
}

impl RouteKey for ControlPath {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            RELIABLE_MULTICAST_PATH => Some(Self::ReliableMulticast),
            ASK_PROPOSAL_SEQ_PATH => Some(Self::AskProposalSeq),
            WAIT_PROPOSAL_SEQ_PATH => Some(Self::ReplyProposalSeq),
            ANNOUNCE_AGREEMENT_SEQ_PATH => Some(Self::AnnounceAgreementSeq),
            _ => None,
        }
    }
}

// ── Codec ───────────────────────────────────────────────────────────────────

/// JSON encoding shared by every envelope type.
pub trait JsonFrame: Serialize + DeserializeOwned + Sized {
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Encode as a single line (no trailing newline; the codec adds it).
    fn encode_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

mod base64_body {
    use {
        base64::{engine::general_purpose::STANDARD, Engine as _},
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

// ── Envelopes ───────────────────────────────────────────────────────────────

/// First line on every connection: who is dialing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub from: NodeId,
}

impl Handshake {
    pub fn new(from: impl Into<NodeId>) -> Self {
        Self { from: from.into() }
    }
}

impl JsonFrame for Handshake {}

/// Unit of B-layer transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BEnvelope {
    /// The node that wrote this frame (the immediate sender, not the origin).
    #[serde(rename = "src")]
    pub src_id: NodeId,
    pub path: String,
    #[serde(with = "base64_body", default)]
    pub body: Vec<u8>,
}

impl JsonFrame for BEnvelope {}

impl Routable for BEnvelope {
    fn path(&self) -> &str {
        &self.path
    }
}

/// R-layer envelope, carried as the body of a B-envelope on
/// [`RELIABLE_MULTICAST_PATH`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct REnvelope {
    pub id: MessageId,
    pub path: String,
    #[serde(with = "base64_body", default)]
    pub body: Vec<u8>,
}

impl REnvelope {
    pub fn new(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            id: new_message_id(),
            path: path.into(),
            body,
        }
    }
}

impl JsonFrame for REnvelope {}

impl Routable for REnvelope {
    fn path(&self) -> &str {
        &self.path
    }
}

/// An application message as seen by the totally-ordered layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TOEnvelope {
    pub path: String,
    #[serde(with = "base64_body", default)]
    pub body: Vec<u8>,
}

impl TOEnvelope {
    pub fn new(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            body,
        }
    }
}

impl JsonFrame for TOEnvelope {}

impl Routable for TOEnvelope {
    fn path(&self) -> &str {
        &self.path
    }
}

// ── Total-order control messages ────────────────────────────────────────────

/// Phase 1: the sender asks every member for a proposed sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskProposalSeq {
    #[serde(rename = "src")]
    pub src_id: NodeId,
    pub msg_id: MessageId,
    /// Encoded [`TOEnvelope`].
    #[serde(with = "base64_body", default)]
    pub body: Vec<u8>,
}

impl JsonFrame for AskProposalSeq {}

/// Phase 2: one member's proposal, unicast back to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyProposalSeq {
    pub process_id: NodeId,
    pub msg_id: MessageId,
    pub proposal_seq: u64,
}

impl JsonFrame for ReplyProposalSeq {}

/// Phase 3: the sender announces the agreed sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceAgreementSeq {
    /// Process whose proposal won; the tie-breaker in the final order.
    pub process_id: NodeId,
    pub msg_id: MessageId,
    pub agreement_seq: u64,
}

impl JsonFrame for AnnounceAgreementSeq {}

// ── Tests ───────────────────────────────────────────────────────────────────
