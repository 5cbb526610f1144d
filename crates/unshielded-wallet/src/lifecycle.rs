//! Build, prove, submit, and undo: the life of a locally created transaction.
//!
//! # Algorithm
//!
//! `submit` records the transaction as pending before the submission
//! collaborator sees it, so a crash in between is recovered by the next sync
//! pass. A rejection, a stage below the configured minimum, or a timeout
//! broadcasts `revert` to every cooperating sub-ledger, drops the pending
//! entry, and returns the error.
//!
//! TTL expiry is handled by `expire_stale`, which treats every unconfirmed
//! transaction past its TTL exactly like a failed submission. Transactions the
//! indexer reported as failed are swept the same way by `abandon_failed`.
//!
//! # Failure modes
//!
//! A sub-ledger whose revert fails is logged and skipped; the broadcast always
//! reaches every sub-ledger.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::balancer::CostModel;
use crate::encoding::WireEncodable;
use crate::error::{ProvingError, SubmissionError, WalletError};
use crate::pending::PendingStore;
use crate::transaction::{Intent, UnshieldedOffer, UnshieldedTransaction, UtxoOutput};
use crate::wallet::UnshieldedWallet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStage {
    Submitted,
    InBlock,
    Finalized,
}

impl fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => f.write_str("submitted"),
            Self::InBlock => f.write_str("in_block"),
            Self::Finalized => f.write_str("finalized"),
        }
    }
}

impl FromStr for SubmissionStage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "submitted" => Ok(Self::Submitted),
            "in_block" => Ok(Self::InBlock),
            "finalized" => Ok(Self::Finalized),
            other => Err(format!("unknown submission stage '{other}'")),
        }
    }
}

/// Network endpoint accepting serialized transactions.
#[async_trait]
pub trait SubmissionService: Send + Sync {
    async fn submit(&self, serialized_tx: Vec<u8>) -> Result<SubmissionStage, SubmissionError>;
}

#[async_trait]
pub trait ProvingService: Send + Sync {
    async fn prove(
        &self,
        unproven: UnshieldedTransaction,
        cost_model: &CostModel,
    ) -> Result<UnshieldedTransaction, ProvingError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevertOutcome {
    /// Number of speculative spends moved back to available.
    pub reverted: usize,
}

/// A sub-ledger that may hold speculative spends of a shared transaction.
///
/// `revert` must be a no-op for a transaction the ledger holds nothing for.
#[async_trait]
pub trait RevertibleLedger: Send + Sync {
    fn name(&self) -> &str;

    async fn revert(&self, tx: &UnshieldedTransaction) -> Result<RevertOutcome, WalletError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub cost_model: CostModel,
    pub required_stage: SubmissionStage,
    pub submission_timeout: Duration,
    /// Lifetime given to transactions built by `transfer` without an explicit TTL.
    pub transaction_ttl: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cost_model: CostModel::default(),
            required_stage: SubmissionStage::InBlock,
            submission_timeout: Duration::from_secs(60),
            transaction_ttl: Duration::from_secs(3_600),
        }
    }
}

pub struct TransactionCoordinator {
    wallet: Arc<UnshieldedWallet>,
    ledgers: Vec<Arc<dyn RevertibleLedger>>,
    pending: Arc<PendingStore<UnshieldedTransaction>>,
    submission: Arc<dyn SubmissionService>,
    proving: Arc<dyn ProvingService>,
    config: CoordinatorConfig,
    current_time_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("ledgers", &self.ledgers.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransactionCoordinator {
    /// The wallet pays fees and is the first revert target.
    #[must_use]
    pub fn new(
        wallet: Arc<UnshieldedWallet>,
        pending: Arc<PendingStore<UnshieldedTransaction>>,
        submission: Arc<dyn SubmissionService>,
        proving: Arc<dyn ProvingService>,
        config: CoordinatorConfig,
    ) -> Self {
        let ledgers = vec![wallet.clone() as Arc<dyn RevertibleLedger>];
        Self {
            wallet,
            ledgers,
            pending,
            submission,
            proving,
            config,
            current_time_fn: Box::new(Utc::now),
        }
    }

    /// Register another sub-ledger that takes part in reverts.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn RevertibleLedger>) -> Self {
        self.ledgers.push(ledger);
        self
    }

    #[must_use]
    pub fn with_time_fn(mut self, f: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.current_time_fn = Box::new(f);
        self
    }

    #[must_use]
    pub fn pending(&self) -> &Arc<PendingStore<UnshieldedTransaction>> {
        &self.pending
    }

    #[must_use]
    pub fn wallet(&self) -> &Arc<UnshieldedWallet> {
        &self.wallet
    }

    fn now(&self) -> DateTime<Utc> {
        (self.current_time_fn)()
    }

    pub async fn finalize(
        &self,
        tx: UnshieldedTransaction,
    ) -> Result<UnshieldedTransaction, ProvingError> {
        self.proving.prove(tx, &self.config.cost_model).await
    }

    /// Track, submit, and on failure revert `tx` everywhere.
    pub async fn submit(&self, tx: &UnshieldedTransaction) -> Result<SubmissionStage, WalletError> {
        self.pending.add(tx);

        let serialized = match tx.to_bytes() {
            Ok(bytes) => bytes,
            Err(error) => {
                self.abandon(tx).await;
                return Err(error.into());
            }
        };

        let timeout = self.config.submission_timeout;
        let submitted = tokio::time::timeout(timeout, self.submission.submit(serialized)).await;
        let outcome = match submitted {
            Err(_) => Err(SubmissionError::Timeout(timeout)),
            Ok(Err(error)) => Err(error),
            Ok(Ok(reached)) if reached < self.config.required_stage => {
                Err(SubmissionError::StageNotReached {
                    required: self.config.required_stage,
                    reached,
                })
            }
            Ok(Ok(reached)) => Ok(reached),
        };

        match outcome {
            Ok(stage) => {
                info!(ids = ?tx.identifiers(), %stage, "transaction submitted");
                Ok(stage)
            }
            Err(error) => {
                warn!(ids = ?tx.identifiers(), %error, "submission failed, reverting");
                self.abandon(tx).await;
                Err(error.into())
            }
        }
    }

    /// Finalize one leg, merge the other in, and balance the result once.
    pub async fn balance_and_merge(
        &self,
        leg_a: UnshieldedTransaction,
        leg_b: &UnshieldedTransaction,
    ) -> Result<UnshieldedTransaction, WalletError> {
        let finalized = self.finalize(leg_a).await?;
        let merged = finalized.merge(leg_b)?;
        let ttl = merged.ttl().unwrap_or_else(|| self.default_ttl());
        let balanced = self
            .wallet
            .balance_transaction(&merged, &self.config.cost_model, ttl)
            .await?;
        self.finalize_or_revert(balanced).await
    }

    /// Pay `outputs` from the wallet; the result is proven and ready to submit.
    pub async fn transfer(
        &self,
        outputs: Vec<UtxoOutput>,
        ttl: Option<DateTime<Utc>>,
    ) -> Result<UnshieldedTransaction, WalletError> {
        let ttl = ttl.unwrap_or_else(|| self.default_ttl());
        let network_id = self.wallet.state().network_id;
        let unbalanced = UnshieldedTransaction::from_intent(
            network_id,
            Intent::new(
                ttl,
                UnshieldedOffer {
                    inputs: Vec::new(),
                    outputs,
                },
            ),
        );

        let balanced = self
            .wallet
            .balance_transaction(&unbalanced, &self.config.cost_model, ttl)
            .await?;
        self.finalize_or_revert(balanced).await
    }

    /// Revert and forget every unconfirmed transaction whose TTL has passed.
    pub async fn expire_stale(&self) -> Vec<UnshieldedTransaction> {
        let now = self.now();
        let expired = self.pending.expired(now);
        for tx in &expired {
            info!(ids = ?tx.identifiers(), ttl = ?tx.ttl(), %now, "transaction expired");
            self.abandon(tx).await;
        }
        expired
    }

    /// Revert and forget every tracked transaction the indexer reported as failed.
    ///
    /// The wallet already restored its own inputs when it applied the failure;
    /// this reaches the other sub-ledgers.
    pub async fn abandon_failed(&self) -> Vec<UnshieldedTransaction> {
        let failed = self.pending.all_failed();
        for tx in &failed {
            info!(ids = ?tx.identifiers(), "transaction failed on chain");
            self.abandon(tx).await;
        }
        failed
    }

    async fn finalize_or_revert(
        &self,
        balanced: UnshieldedTransaction,
    ) -> Result<UnshieldedTransaction, WalletError> {
        match self.finalize(balanced.clone()).await {
            Ok(proven) => Ok(proven),
            Err(error) => {
                warn!(%error, "proving failed, reverting");
                self.revert_everywhere(&balanced).await;
                Err(error.into())
            }
        }
    }

    async fn abandon(&self, tx: &UnshieldedTransaction) {
        self.revert_everywhere(tx).await;
        self.pending.clear(tx);
    }

    async fn revert_everywhere(&self, tx: &UnshieldedTransaction) {
        for ledger in &self.ledgers {
            match ledger.revert(tx).await {
                Ok(outcome) => {
                    debug!(ledger = ledger.name(), reverted = outcome.reverted, "revert done");
                }
                Err(error) => {
                    warn!(ledger = ledger.name(), %error, "revert failed");
                }
            }
        }
    }

    fn default_ttl(&self) -> DateTime<Utc> {
        let lifetime = TimeDelta::from_std(self.config.transaction_ttl).unwrap_or(TimeDelta::MAX);
        self.now()
            .checked_add_signed(lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
