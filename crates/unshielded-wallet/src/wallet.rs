//! The unshielded sub-ledger: published state plus its single writer.
//!
//! Readers take snapshots through [`UnshieldedWallet::state`] or a
//! [`watch::Receiver`] and never block. Every write computes a new state from
//! the current one and publishes it while holding the writer lock, so two
//! writers never interleave and a transition is never half visible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::balancer::{self, CostModel};
use crate::error::{LedgerError, SnapshotError, SyncError, TransactionError, WalletError};
use crate::ledger::{TokenType, UnshieldedLedgerState, UserAddress};
use crate::lifecycle::{RevertOutcome, RevertibleLedger};
use crate::snapshot::{self, PROTOCOL_VERSION};
use crate::sync::{self, RemoteUpdate, SyncProgress};
use crate::transaction::{Intent, UnshieldedOffer, UnshieldedTransaction, UtxoOutput, UtxoSpend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnshieldedWalletState {
    pub public_key: String,
    pub network_id: String,
    pub protocol_version: u32,
    pub ledger: UnshieldedLedgerState,
    pub progress: SyncProgress,
}

impl UnshieldedWalletState {
    #[must_use]
    pub fn empty(public_key: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            network_id: network_id.into(),
            protocol_version: PROTOCOL_VERSION,
            ledger: UnshieldedLedgerState::new(),
            progress: SyncProgress::default(),
        }
    }

    /// Owner of change outputs and the scope of the sync subscription.
    #[must_use]
    pub fn address(&self) -> UserAddress {
        UserAddress(self.public_key.clone())
    }
}

#[derive(Debug)]
pub struct UnshieldedWallet {
    native_token: TokenType,
    state: watch::Sender<UnshieldedWalletState>,
    writer: Mutex<()>,
}

impl UnshieldedWallet {
    #[must_use]
    pub fn new(state: UnshieldedWalletState, native_token: TokenType) -> Self {
        let (sender, _) = watch::channel(state);
        Self {
            native_token,
            state: sender,
            writer: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn start_empty(
        public_key: impl Into<String>,
        network_id: impl Into<String>,
        native_token: TokenType,
    ) -> Self {
        Self::new(
            UnshieldedWalletState::empty(public_key, network_id),
            native_token,
        )
    }

    pub fn restore(
        serialized: &str,
        network_id: &str,
        native_token: TokenType,
    ) -> Result<Self, SnapshotError> {
        let state = snapshot::deserialize_state(serialized, network_id)?;
        info!(
            public_key = %state.public_key,
            available = state.ledger.available().len(),
            pending = state.ledger.pending().len(),
            applied_id = ?state.progress.applied_transaction_id,
            "restored unshielded wallet"
        );
        Ok(Self::new(state, native_token))
    }

    #[must_use]
    pub fn native_token(&self) -> &TokenType {
        &self.native_token
    }

    #[must_use]
    pub fn state(&self) -> UnshieldedWalletState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<UnshieldedWalletState> {
        self.state.subscribe()
    }

    pub fn serialize_state(&self) -> Result<String, SnapshotError> {
        snapshot::serialize_state(&self.state.borrow())
    }

    /// Fold one remote update in and return the new progress.
    pub async fn apply_remote_update(
        &self,
        update: &RemoteUpdate,
    ) -> Result<SyncProgress, SyncError> {
        let _writer = self.writer.lock().await;
        let current = self.state();
        let (ledger, progress) =
            sync::apply_remote_update(&current.ledger, &current.progress, update)?;

        self.state.send_replace(UnshieldedWalletState {
            ledger,
            progress,
            ..current
        });
        Ok(progress)
    }

    pub async fn mark_disconnected(&self) {
        let _writer = self.writer.lock().await;
        self.state
            .send_if_modified(|state| std::mem::replace(&mut state.progress.is_connected, false));
    }

    /// Append a balancing intent to `tx` paid from this wallet's coins.
    ///
    /// The selected coins move to `pending` in the same transition that
    /// produces the balanced transaction. A transaction that already balances
    /// is returned unchanged.
    pub async fn balance_transaction(
        &self,
        tx: &UnshieldedTransaction,
        cost_model: &CostModel,
        ttl: DateTime<Utc>,
    ) -> Result<UnshieldedTransaction, WalletError> {
        let _writer = self.writer.lock().await;
        let current = self.state();
        if tx.network_id != current.network_id {
            return Err(TransactionError::NetworkMismatch {
                left: tx.network_id.clone(),
                right: current.network_id,
            }
            .into());
        }

        let imbalances = tx.fee_adjusted_imbalances(cost_model, &self.native_token)?;
        let recipe = balancer::balance_transaction(
            &current.ledger.available_coins(),
            &imbalances,
            cost_model,
            &self.native_token,
        )?;
        if recipe.inputs.is_empty() && recipe.outputs.is_empty() {
            debug!("transaction already balanced");
            return Ok(tx.clone());
        }

        let owner = current.address();
        let offer = UnshieldedOffer {
            inputs: recipe.inputs.iter().map(UtxoSpend::from).collect(),
            outputs: recipe
                .outputs
                .iter()
                .map(|change| UtxoOutput {
                    value: change.value,
                    owner: owner.clone(),
                    token_type: change.token_type.clone(),
                })
                .collect(),
        };
        let balanced = tx.with_intent(Intent::new(ttl, offer))?;

        let mut ledger = current.ledger.clone();
        for coin in &recipe.inputs {
            ledger = ledger.spend(coin)?;
        }

        info!(
            inputs = recipe.inputs.len(),
            change_outputs = recipe.outputs.len(),
            "balanced unshielded transaction"
        );
        self.state
            .send_replace(UnshieldedWalletState { ledger, ..current });
        Ok(balanced)
    }

    /// Roll back every input of `tx` this wallet holds as pending.
    ///
    /// Inputs this wallet does not know, or already saw confirmed, are skipped,
    /// so reverting a foreign or settled transaction changes nothing.
    pub async fn revert(&self, tx: &UnshieldedTransaction) -> Result<RevertOutcome, LedgerError> {
        let _writer = self.writer.lock().await;
        let current = self.state();

        let mut ledger = current.ledger.clone();
        let mut reverted = 0;
        for input in tx.inputs() {
            let Some(pending) = ledger.find_pending(&input.key()).cloned() else {
                continue;
            };
            ledger = ledger.rollback_spend(&pending)?;
            reverted += 1;
        }

        if reverted > 0 {
            info!(reverted, "reverted pending unshielded spends");
            self.state
                .send_replace(UnshieldedWalletState { ledger, ..current });
        }
        Ok(RevertOutcome { reverted })
    }
}

#[async_trait]
impl RevertibleLedger for UnshieldedWallet {
    fn name(&self) -> &str {
        "unshielded"
    }

    async fn revert(&self, tx: &UnshieldedTransaction) -> Result<RevertOutcome, WalletError> {
        Ok(Self::revert(self, tx).await?)
    }
}
