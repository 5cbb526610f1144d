//! Folding the indexer's ordered update stream into wallet state.
//!
//! # Algorithm
//!
//! Each [`RemoteUpdate`] is one atomic transition computed by
//! [`apply_remote_update`] and published by the wallet under its writer lock:
//!
//! - `TransactionUpdate` with `FAILURE` restores the spent side, anything else
//!   applies the created and spent sides; the applied id advances only after
//!   the ledger transition succeeded
//! - `Progress` marks the stream connected and raises the highest known id
//!
//! # Failure modes
//!
//! A `FAILURE` update marks the matching pending transactions as failed so
//! the coordinator can revert them on every sub-ledger; any other status
//! clears them. History writes are bounded by a timeout and never stop sync.
//!
//! A transport, decode or apply failure stops the stream and is returned as a
//! [`SyncError`]; the state published before the failing item stays as is.
//! Reconnecting is the caller's business.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{HistoryError, SyncError};
use crate::ledger::{TransactionStatus, TransactionUpdate, UnshieldedLedgerState, UserAddress};
use crate::pending::PendingStore;
use crate::wallet::UnshieldedWallet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RemoteUpdate {
    Progress {
        #[serde(rename = "highestTransactionId")]
        highest_transaction_id: u64,
    },
    TransactionUpdate(TransactionUpdate),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncProgress {
    /// Last transaction folded into the ledger; `None` before the first one.
    pub applied_transaction_id: Option<u64>,
    pub highest_known_transaction_id: u64,
    pub is_connected: bool,
}

impl SyncProgress {
    #[must_use]
    pub fn restored(applied_transaction_id: Option<u64>) -> Self {
        Self {
            applied_transaction_id,
            highest_known_transaction_id: applied_transaction_id.unwrap_or_default(),
            is_connected: false,
        }
    }

    #[must_use]
    pub fn is_synced(&self, gap: u64) -> bool {
        let applied = self.applied_transaction_id.unwrap_or_default();
        self.is_connected && self.highest_known_transaction_id.saturating_sub(applied) <= gap
    }

    /// First transaction id the next subscription should deliver.
    #[must_use]
    pub fn resume_from(&self) -> Option<u64> {
        self.applied_transaction_id
            .map(|applied| applied.saturating_add(1))
    }
}

pub type UpdateStream = Pin<Box<dyn Stream<Item = Result<RemoteUpdate, SyncError>> + Send>>;

/// Address-scoped subscription to the indexer.
#[async_trait]
pub trait SyncSource: Send + Sync {
    async fn subscribe(
        &self,
        address: &UserAddress,
        from_transaction_id: Option<u64>,
    ) -> Result<UpdateStream, SyncError>;
}

/// Receives every confirmed change after it reached the ledger.
#[async_trait]
pub trait TransactionHistory: Send + Sync {
    async fn record(&self, update: &TransactionUpdate) -> Result<(), HistoryError>;
}

/// One sync step over the ledger and progress pair.
///
/// On error nothing changes: the caller keeps the inputs it passed in.
pub fn apply_remote_update(
    ledger: &UnshieldedLedgerState,
    progress: &SyncProgress,
    update: &RemoteUpdate,
) -> Result<(UnshieldedLedgerState, SyncProgress), SyncError> {
    match update {
        RemoteUpdate::Progress {
            highest_transaction_id,
        } => {
            let progress = SyncProgress {
                highest_known_transaction_id: progress
                    .highest_known_transaction_id
                    .max(*highest_transaction_id),
                is_connected: true,
                ..*progress
            };
            Ok((ledger.clone(), progress))
        }
        RemoteUpdate::TransactionUpdate(update) => {
            let applied = if update.status == TransactionStatus::Failure {
                ledger.apply_failed_update(update)
            } else {
                ledger.apply_update(update)
            }
            .map_err(|source| SyncError::Apply {
                transaction_id: update.transaction_id,
                source,
            })?;

            let applied_id = progress
                .applied_transaction_id
                .map_or(update.transaction_id, |id| id.max(update.transaction_id));
            let progress = SyncProgress {
                applied_transaction_id: Some(applied_id),
                highest_known_transaction_id: progress.highest_known_transaction_id.max(applied_id),
                is_connected: progress.is_connected,
            };
            Ok((applied, progress))
        }
    }
}

/// Upper bound on one history write before sync moves on without it.
pub const DEFAULT_HISTORY_TIMEOUT: Duration = Duration::from_secs(5);

/// Drains an update stream into one wallet.
pub struct SyncApplier<T> {
    wallet: Arc<UnshieldedWallet>,
    pending: Arc<PendingStore<T>>,
    history: Option<Arc<dyn TransactionHistory>>,
    history_timeout: Duration,
}

impl<T: Clone + Send + Sync> SyncApplier<T> {
    #[must_use]
    pub fn new(wallet: Arc<UnshieldedWallet>, pending: Arc<PendingStore<T>>) -> Self {
        Self {
            wallet,
            pending,
            history: None,
            history_timeout: DEFAULT_HISTORY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn TransactionHistory>) -> Self {
        self.history = Some(history);
        self
    }

    #[must_use]
    pub fn with_history_timeout(mut self, timeout: Duration) -> Self {
        self.history_timeout = timeout;
        self
    }

    /// Subscribe right after the last applied transaction and run.
    pub async fn start(
        &self,
        source: &dyn SyncSource,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), SyncError> {
        let state = self.wallet.state();
        let from = state.progress.resume_from();
        info!(public_key = %state.public_key, from = ?from, "subscribing to unshielded updates");

        let stream = source.subscribe(&state.address(), from).await?;
        self.run(stream, shutdown).await
    }

    /// Apply updates until the stream ends, fails, or `shutdown` flips to `true`.
    ///
    /// Shutdown is only observed between items.
    pub async fn run(
        &self,
        mut stream: UpdateStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SyncError> {
        loop {
            let next = tokio::select! {
                biased;
                () = stopped(&mut shutdown) => {
                    info!("sync stopped on shutdown");
                    return Ok(());
                }
                next = stream.next() => next,
            };

            let Some(item) = next else {
                info!("update stream ended");
                self.wallet.mark_disconnected().await;
                return Ok(());
            };

            let update = match item {
                Ok(update) => update,
                Err(error) => {
                    warn!(%error, "update stream failed");
                    self.wallet.mark_disconnected().await;
                    return Err(error);
                }
            };

            self.apply(&update).await?;
        }
    }

    /// Apply one update, settle the pending transactions it reports on, and
    /// record it in the history.
    pub async fn apply(&self, update: &RemoteUpdate) -> Result<SyncProgress, SyncError> {
        let progress = self.wallet.apply_remote_update(update).await?;

        if let RemoteUpdate::TransactionUpdate(update) = update {
            debug!(
                transaction_id = update.transaction_id,
                status = %update.status,
                created = update.created_utxos.len(),
                spent = update.spent_utxos.len(),
                "applied transaction update"
            );
            if update.status == TransactionStatus::Failure {
                self.pending
                    .save_result_ids(&update.identifiers, &update.result());
            } else {
                self.pending.clear_ids(&update.identifiers);
            }

            if let Some(history) = &self.history {
                self.record_history(history.as_ref(), update).await;
            }
        }

        Ok(progress)
    }
}

impl<T> SyncApplier<T> {
    async fn record_history(&self, history: &dyn TransactionHistory, update: &TransactionUpdate) {
        match tokio::time::timeout(self.history_timeout, history.record(update)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                warn!(transaction_id = update.transaction_id, %error, "history record failed");
            }
            Err(_) => {
                warn!(
                    transaction_id = update.transaction_id,
                    timeout = ?self.history_timeout,
                    "history record timed out"
                );
            }
        }
    }
}

/// Resolves once shutdown is requested; never, if the sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let requested = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !requested {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use crate::ledger::{IntentHash, TokenType, Utxo, UtxoMeta, UtxoWithMeta};

    fn coin(tag: u8, value: u128) -> UtxoWithMeta {
        UtxoWithMeta::new(
            Utxo {
                value,
                owner: UserAddress("owner".to_string()),
                token_type: TokenType::from_bytes([0u8; 32]),
                intent_hash: IntentHash::from_bytes([tag; 32]),
                output_no: 0,
            },
            UtxoMeta::default(),
        )
    }

    fn confirmed(id: u64, status: TransactionStatus, created: Vec<UtxoWithMeta>) -> RemoteUpdate {
        RemoteUpdate::TransactionUpdate(TransactionUpdate {
            transaction_id: id,
            identifiers: BTreeSet::new(),
            created_utxos: created,
            spent_utxos: Vec::new(),
            status,
            segments: Vec::new(),
        })
    }

    #[test]
    fn progress_marker_connects_and_raises_highest() {
        let (_, progress) = apply_remote_update(
            &UnshieldedLedgerState::new(),
            &SyncProgress::default(),
            &RemoteUpdate::Progress {
                highest_transaction_id: 12,
            },
        )
        .expect("progress applies");

        assert!(progress.is_connected);
        assert_eq!(progress.highest_known_transaction_id, 12);
        assert!(!progress.is_synced(5));
        assert!(progress.is_synced(12));
    }

    #[test]
    fn applied_id_advances_after_successful_apply() {
        let (ledger, progress) = apply_remote_update(
            &UnshieldedLedgerState::new(),
            &SyncProgress::default(),
            &confirmed(4, TransactionStatus::Success, vec![coin(1, 10)]),
        )
        .expect("applies");

        assert_eq!(ledger.available().len(), 1);
        assert_eq!(progress.applied_transaction_id, Some(4));
        assert_eq!(progress.highest_known_transaction_id, 4);
    }

    #[test]
    fn applied_id_never_moves_backwards() {
        let progress = SyncProgress::restored(Some(9));
        let (_, progress) = apply_remote_update(
            &UnshieldedLedgerState::new(),
            &progress,
            &confirmed(3, TransactionStatus::Success, Vec::new()),
        )
        .expect("applies");
        assert_eq!(progress.applied_transaction_id, Some(9));
    }

    #[test]
    fn failed_update_takes_the_restore_path() {
        let a = coin(1, 10);
        let ledger = UnshieldedLedgerState::restore(Vec::new(), vec![a.clone()]);
        let update = RemoteUpdate::TransactionUpdate(TransactionUpdate {
            transaction_id: 2,
            identifiers: BTreeSet::new(),
            created_utxos: Vec::new(),
            spent_utxos: vec![a.clone()],
            status: TransactionStatus::Failure,
            segments: Vec::new(),
        });

        let (ledger, progress) =
            apply_remote_update(&ledger, &SyncProgress::default(), &update).expect("applies");
        assert!(ledger.find_available(&a.key()).is_some());
        assert!(ledger.pending().is_empty());
        assert_eq!(progress.applied_transaction_id, Some(2));
    }

    #[test]
    fn remote_update_json_is_tagged() {
        let raw = r#"{"type":"Progress","highestTransactionId":7}"#;
        let update: RemoteUpdate = serde_json::from_str(raw).expect("parses");
        assert_eq!(
            update,
            RemoteUpdate::Progress {
                highest_transaction_id: 7
            }
        );

        let raw = r#"{"type":"TransactionUpdate","transactionId":1,"status":"PARTIAL_SUCCESS"}"#;
        let update: RemoteUpdate = serde_json::from_str(raw).expect("parses");
        assert!(matches!(
            update,
            RemoteUpdate::TransactionUpdate(TransactionUpdate {
                transaction_id: 1,
                status: TransactionStatus::PartialSuccess,
                ..
            })
        ));
    }

    #[test]
    fn resume_starts_after_applied_id() {
        assert_eq!(SyncProgress::default().resume_from(), None);
        assert_eq!(SyncProgress::restored(Some(41)).resume_from(), Some(42));
    }
}
