use std::time::Duration;

use thiserror::Error;

use crate::ledger::{TokenType, TransactionStatus, UtxoKey};
use crate::lifecycle::SubmissionStage;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Proving(#[from] ProvingError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    PendingTransactions(#[from] PendingTransactionsError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by the pure ledger transitions.
///
/// A failed transition never produces a partially updated state: the caller
/// keeps the state it passed in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("UTXO {0} not found")]
    UtxoNotFound(UtxoKey),

    #[error(
        "cannot apply transaction {transaction_id} with status {status} on the {expected} path"
    )]
    ApplyTransaction {
        transaction_id: u64,
        status: TransactionStatus,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("insufficient funds for token type {token_type}: missing {missing}")]
    InsufficientFunds { token_type: TokenType, missing: u128 },

    #[error("amount overflow while {0}")]
    Overflow(String),
}

/// Failures of the remote update stream. Each one terminates the stream; the
/// reconnect policy belongs to the caller.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to subscribe to updates: {0}")]
    Subscribe(String),

    #[error("update stream transport failed: {0}")]
    Transport(String),

    #[error("failed to decode remote update: {0}")]
    Decode(String),

    #[error("failed to apply transaction update {transaction_id}: {source}")]
    Apply {
        transaction_id: u64,
        #[source]
        source: LedgerError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("transaction rejected by the network: {0}")]
    Rejected(String),

    #[error("transaction reached stage {reached} but {required} is required")]
    StageNotReached {
        required: SubmissionStage,
        reached: SubmissionStage,
    },

    #[error("transaction submission timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("proving failed: {0}")]
pub struct ProvingError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to record transaction history: {0}")]
pub struct HistoryError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("cannot merge transactions from networks '{left}' and '{right}'")]
    NetworkMismatch { left: String, right: String },

    #[error("segment {0} is used by two different intents")]
    SegmentConflict(u16),

    #[error("no free segment id left for the balancing intent")]
    SegmentsExhausted,
}

/// Errors that occur during binary or hex encoding/decoding of transactions.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Failed to encode to binary: {0}")]
    BinaryEncode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode from binary: {0}")]
    BinaryDecode(#[from] bincode::error::DecodeError),

    #[error("Failed to decode hex string: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Decoded {consumed} of {total} bytes; trailing bytes are not allowed")]
    TrailingBytes { consumed: usize, total: usize },
}

#[derive(Debug, Error)]
pub enum PendingTransactionsError {
    #[error("unsupported pending transactions version '{0}'")]
    UnsupportedVersion(String),

    #[error("malformed pending transactions JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("pending transaction {index} is not valid hex: {source}")]
    Hex {
        index: usize,
        #[source]
        source: hex::FromHexError,
    },

    #[error("pending transaction {index} could not be decoded: {source}")]
    Decode {
        index: usize,
        #[source]
        source: EncodingError,
    },

    #[error("failed to encode pending transaction: {0}")]
    Encode(#[source] EncodingError),
}

/// Problems with persisted wallet state, kept apart from domain errors.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unreadable persisted state: {0}")]
    Unreadable(#[source] serde_json::Error),

    #[error("failed to serialize wallet state: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("persisted state belongs to network '{found}', expected '{expected}'")]
    NetworkMismatch { expected: String, found: String },

    #[error("unsupported persisted protocol version {0}")]
    UnsupportedProtocolVersion(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}; got '{value}'")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0}")]
    Validation(String),
}
