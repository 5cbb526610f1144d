use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use unshielded_wallet::ledger::TokenType;
use unshielded_wallet::{
    PendingStore, PendingTracker, SyncApplier, TransactionCoordinator, UnshieldedTransaction,
    UnshieldedTransactionTrait, UnshieldedWallet, WalletConfig,
};

use crate::protocol::{
    BalanceMap, BalancesResult, ExpireResult, HarnessCommand, InitResult, PendingResult,
    ProgressResult, TransferResult,
};
use crate::stubs::{HarnessClock, MarkProven, StubSubmission};

pub struct CommandOutcome {
    pub result: Value,
    pub shutdown: bool,
}

struct HarnessSession {
    config: WalletConfig,
    submission: Arc<StubSubmission>,
    coordinator: TransactionCoordinator,
    applier: SyncApplier<UnshieldedTransaction>,
}

impl HarnessSession {
    fn new(config: WalletConfig, wallet: UnshieldedWallet, clock: &Arc<HarnessClock>) -> Self {
        let wallet = Arc::new(wallet);
        let pending = Arc::new(PendingStore::new(PendingTracker::new(Arc::new(
            UnshieldedTransactionTrait,
        ))));
        let submission = Arc::new(StubSubmission::default());
        let clock = Arc::clone(clock);

        let coordinator = TransactionCoordinator::new(
            Arc::clone(&wallet),
            Arc::clone(&pending),
            submission.clone(),
            Arc::new(MarkProven),
            config.coordinator_config(),
        )
        .with_time_fn(move || clock.now());
        let applier = SyncApplier::new(wallet, pending);

        Self {
            config,
            submission,
            coordinator,
            applier,
        }
    }

    fn wallet(&self) -> &UnshieldedWallet {
        self.coordinator.wallet()
    }
}

pub struct HarnessState {
    base_config: WalletConfig,
    clock: Arc<HarnessClock>,
    session: Option<HarnessSession>,
}

impl HarnessState {
    #[must_use]
    pub fn new(base_config: WalletConfig) -> Self {
        Self {
            base_config,
            clock: Arc::new(HarnessClock::default()),
            session: None,
        }
    }
}

fn session_ref(state: &HarnessState) -> anyhow::Result<&HarnessSession> {
    state
        .session
        .as_ref()
        .ok_or_else(|| anyhow!("harness is not initialized; call init first"))
}

fn to_json_value<T: Serialize>(value: T) -> anyhow::Result<Value> {
    serde_json::to_value(value)
        .map_err(|error| anyhow!("failed to serialize response payload: {error}"))
}

fn balance_map(balances: &BTreeMap<TokenType, u128>) -> BalanceMap {
    balances
        .iter()
        .map(|(token_type, value)| (token_type.to_string(), value.to_string()))
        .collect()
}

pub async fn handle_command(
    state: &mut HarnessState,
    command: HarnessCommand,
) -> anyhow::Result<CommandOutcome> {
    let result = match command {
        HarnessCommand::Init {
            public_key,
            network_id,
            native_token,
            input_fee_overhead,
            output_fee_overhead,
        } => {
            let mut config = state.base_config.clone();
            if let Some(network_id) = network_id {
                config.network_id = network_id;
            }
            if let Some(native_token) = native_token {
                config.native_token = TokenType::from_hex(&native_token)
                    .with_context(|| format!("native_token '{native_token}' is not hex"))?;
            }
            if let Some(fee) = input_fee_overhead {
                config.cost_model.input_fee_overhead = u128::from(fee);
            }
            if let Some(fee) = output_fee_overhead {
                config.cost_model.output_fee_overhead = u128::from(fee);
            }
            config.validate()?;

            let wallet = UnshieldedWallet::start_empty(
                public_key.clone(),
                config.network_id.clone(),
                config.native_token.clone(),
            );
            let init_result = InitResult {
                public_key,
                network_id: config.network_id.clone(),
                native_token: config.native_token.to_string(),
            };
            info!(network_id = %config.network_id, "harness wallet initialized");
            state.session = Some(HarnessSession::new(config, wallet, &state.clock));

            to_json_value(init_result)?
        }
        HarnessCommand::ApplyUpdate { update } => {
            let session = session_ref(state)?;
            let progress = session.applier.apply(&update).await?;
            to_json_value(ProgressResult {
                applied_id: progress.applied_transaction_id,
                highest_known_id: progress.highest_known_transaction_id,
                connected: progress.is_connected,
                synced: progress.is_synced(session.config.sync_gap),
            })?
        }
        HarnessCommand::Balances => {
            let ledger = session_ref(state)?.wallet().state().ledger;
            to_json_value(BalancesResult {
                available: balance_map(&ledger.balances()),
                pending: balance_map(&ledger.pending_balances()),
                total: balance_map(&ledger.total_balances()),
            })?
        }
        HarnessCommand::Transfer {
            outputs,
            ttl,
            reject,
        } => {
            let session = session_ref(state)?;
            session.submission.set_reject(reject);

            let tx = session.coordinator.transfer(outputs, ttl).await?;
            let stage = session.coordinator.submit(&tx).await?;
            to_json_value(TransferResult {
                ids: tx.identifiers().into_iter().collect(),
                stage: stage.to_string(),
                ttl: tx.ttl(),
            })?
        }
        HarnessCommand::ExpireStale { now } => {
            let session = session_ref(state)?;
            state.clock.pin(now);
            let expired = session.coordinator.expire_stale().await;
            state.clock.pin(None);

            to_json_value(ExpireResult {
                expired: expired
                    .iter()
                    .map(|tx| tx.identifiers().into_iter().collect())
                    .collect(),
            })?
        }
        HarnessCommand::SerializeState => {
            let raw = session_ref(state)?.wallet().serialize_state()?;
            to_json_value(serde_json::json!({ "state": raw }))?
        }
        HarnessCommand::RestoreState { state: raw } => {
            let config = session_ref(state)?.config.clone();
            let wallet =
                UnshieldedWallet::restore(&raw, &config.network_id, config.native_token.clone())?;
            let restored = wallet.state();
            state.session = Some(HarnessSession::new(config, wallet, &state.clock));

            to_json_value(serde_json::json!({
                "public_key": restored.public_key,
                "applied_id": restored.progress.applied_transaction_id,
                "available": restored.ledger.available().len(),
                "pending": restored.ledger.pending().len(),
            }))?
        }
        HarnessCommand::Pending => {
            let pending = session_ref(state)?.coordinator.pending();
            let raw = pending.serialize()?;
            to_json_value(PendingResult {
                count: pending.snapshot().len(),
                transactions: serde_json::from_str(&raw)
                    .context("pending transactions are not valid JSON")?,
            })?
        }
        HarnessCommand::Shutdown => {
            state.session = None;
            return Ok(CommandOutcome {
                result: to_json_value(serde_json::json!({ "shutdown": true }))?,
                shutdown: true,
            });
        }
    };

    Ok(CommandOutcome {
        result,
        shutdown: false,
    })
}
