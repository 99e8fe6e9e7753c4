//! A replicated bank ledger on top of totally-ordered multicast.
//!
//! Each node reads `DEPOSIT`/`TRANSFER` commands from its input, multicasts
//! them through [`groupcast_multicast::TotalOrderMulticast`], and applies
//! every delivered transaction to its own [`ledger::Ledger`]. Because
//! delivery order is the same everywhere, so are the balances.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`cli`]         | Command-line arguments |
//! | [`config`]      | Node table parsing, `GroupConfig` construction |
//! | [`logger`]      | `env_logger` setup |
//! | [`transaction`] | Commands and the polymorphic payload codec |
//! | [`ledger`]      | Account balances |
//! | [`processor`]   | Applies delivered transactions |
//! | [`input`]       | Line reader feeding the group |
//! | [`error`]       | Crate-wide error enums |

pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod ledger;
pub mod logger;
pub mod processor;
pub mod transaction;
