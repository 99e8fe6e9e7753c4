//! Error types for the bank node.

use {groupcast_multicast::MulticastError, thiserror::Error};

/// A transaction that the ledger refused. Balances are unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("amount should be an integer greater or equal to zero, got {0}")]
    NegativeAmount(i64),

    #[error("transfer failed, src account [{0}] does not exist")]
    UnknownAccount(String),

    #[error(
        "transfer failed, src account [{account}] doesn't have enough funds, \
         current amount [{balance}], need amount [{amount}]"
    )]
    InsufficientFunds {
        account: String,
        balance: i64,
        amount: i64,
    },

    #[error("balance of account [{0}] would overflow")]
    Overflow(String),
}

/// Errors that can occur while running a bank node.
#[derive(Error, Debug)]
pub enum BankError {
    /// I/O error (config file, stdin).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The node table could not be parsed.
    #[error("invalid node table: {0}")]
    Config(String),

    /// A command-line argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An input line was not a known command.
    #[error("invalid command [{line}]: {reason}")]
    InvalidCommand { line: String, reason: String },

    /// Failed to encode or decode a transaction payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A payload carried a type id we do not know.
    #[error("unrecognized transaction type: {0}")]
    UnknownTransactionType(String),

    /// A payload arrived on a path that does not match its type.
    #[error("transaction of type [{type_id}] delivered on path [{path}]")]
    PathMismatch { type_id: String, path: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Multicast(#[from] MulticastError),
}

/// Convenience result type for bank operations.
pub type Result<T> = std::result::Result<T, BankError>;
