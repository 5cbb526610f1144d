use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::UtxoWithMeta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Success,
    Failure,
    PartialSuccess,
}

impl TransactionStatus {
    /// Whether the ledger should take the created/spent sides as final.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Success | Self::PartialSuccess)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::Failure => f.write_str("FAILURE"),
            Self::PartialSuccess => f.write_str("PARTIAL_SUCCESS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentResult {
    pub segment_id: u16,
    pub success: bool,
}

/// On-chain outcome of a transaction, per segment when it only partially succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub status: TransactionStatus,
    #[serde(default)]
    pub segments: Vec<SegmentResult>,
}

impl TransactionResult {
    #[must_use]
    pub const fn success() -> Self {
        Self {
            status: TransactionStatus::Success,
            segments: Vec::new(),
        }
    }

    #[must_use]
    pub const fn failure() -> Self {
        Self {
            status: TransactionStatus::Failure,
            segments: Vec::new(),
        }
    }
}

/// One confirmed (or failed) transaction as reported by the indexer for this address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub transaction_id: u64,
    /// Intent hashes (hex) contained in the confirmed transaction.
    #[serde(default)]
    pub identifiers: BTreeSet<String>,
    #[serde(default)]
    pub created_utxos: Vec<UtxoWithMeta>,
    #[serde(default)]
    pub spent_utxos: Vec<UtxoWithMeta>,
    pub status: TransactionStatus,
    #[serde(default)]
    pub segments: Vec<SegmentResult>,
}

impl TransactionUpdate {
    #[must_use]
    pub fn result(&self) -> TransactionResult {
        TransactionResult {
            status: self.status,
            segments: self.segments.clone(),
        }
    }
}
