//! Group communication over a static TCP full mesh.
//!
//! Three layers, each built on the one below:
//!
//! - **B-multicast** ([`transport`]): best-effort fan-out over one
//!   persistent TCP link per member, with dial retry and ejection of
//!   members whose link fails.
//! - **R-multicast** ([`reliable`]): id-based dedup plus re-flooding, so a
//!   message seen by one correct member reaches all of them.
//! - **TO-multicast** ([`total_order`]): three-phase sequence agreement and
//!   a hold-back queue, giving every member the same delivery order.
//!
//! ## Architecture
//!
//! ```text
//!  application ── TOEnvelope ──► TotalOrderMulticast ──► TO dispatcher
//!                                   │ ask/announce   ▲ reply
//!                                   ▼                │
//!                          ReliableMulticast ──► R dispatcher
//!                                   │
//!                                   ▼
//!   peers ◄── lines ── BasicMulticast ──► B dispatcher
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]       | `GroupConfig` defaults and dev overrides |
//! | [`envelope`]     | Wire types and JSON line codec |
//! | [`dispatcher`]   | Path-keyed handler routing |
//! | [`peer_manager`] | Live-peer map and membership notifications |
//! | [`transport`]    | B-layer: listener, connectors, fan-out |
//! | [`reliable`]     | R-layer: dedup and re-flood |
//! | [`hold_queue`]   | Index-tracking hold-back heap |
//! | [`sequencer`]    | Proposal, agreement and release state |
//! | [`total_order`]  | TO-layer protocol driver |
//! | [`error`]        | Crate-wide error enum |

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod hold_queue;
pub mod peer_manager;
pub mod reliable;
pub mod sequencer;
pub mod total_order;
pub mod transport;

pub use {
    config::{GroupConfig, Node, NodeId},
    envelope::{MessageId, TOEnvelope},
    error::{MulticastError, Result},
    reliable::ReliableMulticast,
    total_order::TotalOrderMulticast,
    transport::BasicMulticast,
};
