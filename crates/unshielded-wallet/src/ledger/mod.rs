mod state;
mod update;
mod utxo;

pub use state::{LedgerSnapshot, UnshieldedLedgerState};
pub use update::{SegmentResult, TransactionResult, TransactionStatus, TransactionUpdate};
pub(crate) use utxo::decimal_string;
pub use utxo::{IntentHash, TokenType, UserAddress, Utxo, UtxoKey, UtxoMeta, UtxoWithMeta};
