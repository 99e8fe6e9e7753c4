//! Error types for the multicast stack.

use {crate::config::NodeId, thiserror::Error};

/// Errors that can occur in the multicast stack.
#[derive(Error, Debug)]
pub enum MulticastError {
    /// Failed to encode or decode a JSON frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A line could not be framed or unframed.
    #[error("framing error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// The destination is not (or no longer) a live member of the group.
    #[error("unknown peer: {0}")]
    UnknownPeer(NodeId),

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A peer could not be dialed within the configured number of attempts.
    #[error("peer {peer} unreachable after {attempts} dial attempts")]
    Unreachable {
        /// The peer we gave up on.
        peer: NodeId,
        /// Dial attempts made.
        attempts: u32,
    },

    /// The group was started twice.
    #[error("group already started")]
    AlreadyStarted,

    /// The first line on a connection was not a valid handshake.
    #[error("malformed handshake: {0}")]
    Handshake(String),

    /// The outbound queue of a peer was closed while enqueuing.
    #[error("outbound queue closed for peer {0}")]
    QueueClosed(NodeId),

    /// An internal channel was closed because its consumer went away.
    #[error("channel closed")]
    ChannelClosed,

    /// A control message referred to a message id we have no record of.
    #[error("unknown message id: {0}")]
    UnknownMessage(uuid::Uuid),
}

/// Convenience result type for multicast operations.
pub type Result<T> = std::result::Result<T, MulticastError>;
