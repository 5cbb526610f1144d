//! In-process stand-ins for the network and the prover.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use unshielded_wallet::error::{ProvingError, SubmissionError};
use unshielded_wallet::transaction::UnshieldedTransaction;
use unshielded_wallet::{CostModel, ProvingService, SubmissionService, SubmissionStage};

/// Accepts every transaction as finalized unless told to reject the next ones.
#[derive(Debug, Default)]
pub struct StubSubmission {
    reject: AtomicBool,
}

impl StubSubmission {
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubmissionService for StubSubmission {
    async fn submit(&self, serialized_tx: Vec<u8>) -> Result<SubmissionStage, SubmissionError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(SubmissionError::Rejected(format!(
                "stub rejected {} bytes",
                serialized_tx.len()
            )));
        }
        Ok(SubmissionStage::Finalized)
    }
}

#[derive(Debug, Default)]
pub struct MarkProven;

#[async_trait]
impl ProvingService for MarkProven {
    async fn prove(
        &self,
        mut unproven: UnshieldedTransaction,
        _cost_model: &CostModel,
    ) -> Result<UnshieldedTransaction, ProvingError> {
        unproven.proven = true;
        Ok(unproven)
    }
}

/// Wall clock that a request can pin to a fixed instant.
#[derive(Debug, Default)]
pub struct HarnessClock {
    pinned: Mutex<Option<DateTime<Utc>>>,
}

impl HarnessClock {
    pub fn pin(&self, now: Option<DateTime<Utc>>) {
        if let Ok(mut pinned) = self.pinned.lock() {
            *pinned = now;
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.pinned
            .lock()
            .ok()
            .and_then(|pinned| *pinned)
            .unwrap_or_else(Utc::now)
    }
}
