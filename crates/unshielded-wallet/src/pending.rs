//! Tracking of locally submitted transactions until the indexer reports them.
//!
//! The tracker never looks inside a transaction; everything it needs comes
//! from an injected [`TransactionTrait`]. A transaction is identified by its
//! id-set (one id per intent), and a resubmission carrying more intents
//! supersedes the tracked one instead of being tracked twice.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{EncodingError, PendingTransactionsError};
use crate::ledger::{TransactionResult, TransactionStatus};

pub const PENDING_TRANSACTIONS_VERSION: &str = "v1";

/// Capability object describing a transaction type to the tracker.
pub trait TransactionTrait<T>: Send + Sync {
    fn ids(&self, tx: &T) -> BTreeSet<String>;

    fn first_id(&self, tx: &T) -> Option<String>;

    /// Every id of `tx` is contained in `ids`.
    fn all_ids_included(&self, tx: &T, ids: &BTreeSet<String>) -> bool {
        self.ids(tx).is_subset(ids)
    }

    fn one_included_in_other(&self, a: &T, b: &T) -> bool {
        let a_ids = self.ids(a);
        let b_ids = self.ids(b);
        a_ids.is_subset(&b_ids) || b_ids.is_subset(&a_ids)
    }

    fn ttl_expired(&self, tx: &T, now: DateTime<Utc>) -> bool;

    fn serialize(&self, tx: &T) -> Result<Vec<u8>, EncodingError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<T, EncodingError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem<T> {
    pub tx: T,
    pub result: Option<TransactionResult>,
}

/// Immutable list of tracked transactions in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransactions<T> {
    items: Vec<PendingItem<T>>,
}

impl<T> Default for PendingTransactions<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> PendingTransactions<T> {
    #[must_use]
    pub fn items(&self) -> &[PendingItem<T>] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct PendingTransactionsWire {
    version: String,
    transactions: Vec<String>,
}

/// Pure operations over [`PendingTransactions`].
pub struct PendingTracker<T> {
    tx_trait: Arc<dyn TransactionTrait<T>>,
}

impl<T> Clone for PendingTracker<T> {
    fn clone(&self) -> Self {
        Self {
            tx_trait: Arc::clone(&self.tx_trait),
        }
    }
}

impl<T> fmt::Debug for PendingTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTracker").finish_non_exhaustive()
    }
}

impl<T: Clone> PendingTracker<T> {
    #[must_use]
    pub fn new(tx_trait: Arc<dyn TransactionTrait<T>>) -> Self {
        Self { tx_trait }
    }

    #[must_use]
    pub fn tx_trait(&self) -> &dyn TransactionTrait<T> {
        self.tx_trait.as_ref()
    }

    #[must_use]
    pub fn has(&self, state: &PendingTransactions<T>, tx: &T) -> bool {
        state
            .items
            .iter()
            .any(|item| self.tx_trait.all_ids_included(tx, &self.tx_trait.ids(&item.tx)))
    }

    /// Track `tx` unless an item already covers it.
    ///
    /// Tracked items whose ids are contained in `tx`'s ids are replaced by
    /// `tx`. Equal id-sets keep the tracked item and its result.
    #[must_use]
    pub fn add(&self, state: &PendingTransactions<T>, tx: &T) -> PendingTransactions<T> {
        if self.has(state, tx) {
            return state.clone();
        }

        let mut items: Vec<PendingItem<T>> = state
            .items
            .iter()
            .filter(|item| !self.tx_trait.one_included_in_other(&item.tx, tx))
            .cloned()
            .collect();
        items.push(PendingItem {
            tx: tx.clone(),
            result: None,
        });

        PendingTransactions { items }
    }

    /// Drop every item whose ids are all contained in `tx`'s ids.
    #[must_use]
    pub fn clear(&self, state: &PendingTransactions<T>, tx: &T) -> PendingTransactions<T> {
        self.clear_ids(state, &self.tx_trait.ids(tx))
    }

    #[must_use]
    pub fn clear_ids(
        &self,
        state: &PendingTransactions<T>,
        ids: &BTreeSet<String>,
    ) -> PendingTransactions<T> {
        if ids.is_empty() {
            return state.clone();
        }

        PendingTransactions {
            items: state
                .items
                .iter()
                .filter(|item| !self.tx_trait.all_ids_included(&item.tx, ids))
                .cloned()
                .collect(),
        }
    }

    #[must_use]
    pub fn save_result(
        &self,
        state: &PendingTransactions<T>,
        tx: &T,
        result: TransactionResult,
    ) -> PendingTransactions<T> {
        let mut items = state.items.clone();
        if let Some(item) = items
            .iter_mut()
            .find(|item| self.tx_trait.all_ids_included(tx, &self.tx_trait.ids(&item.tx)))
        {
            item.result = Some(result);
        }
        PendingTransactions { items }
    }

    /// Attach `result` to every item whose ids are all contained in `ids`.
    #[must_use]
    pub fn save_result_ids(
        &self,
        state: &PendingTransactions<T>,
        ids: &BTreeSet<String>,
        result: &TransactionResult,
    ) -> PendingTransactions<T> {
        if ids.is_empty() {
            return state.clone();
        }

        let mut items = state.items.clone();
        for item in items
            .iter_mut()
            .filter(|item| self.tx_trait.all_ids_included(&item.tx, ids))
        {
            item.result = Some(result.clone());
        }
        PendingTransactions { items }
    }

    #[must_use]
    pub fn all_failed(&self, state: &PendingTransactions<T>) -> Vec<T> {
        state
            .items
            .iter()
            .filter(|item| {
                item.result
                    .as_ref()
                    .is_some_and(|result| result.status == TransactionStatus::Failure)
            })
            .map(|item| item.tx.clone())
            .collect()
    }

    #[must_use]
    pub fn all_pending(&self, state: &PendingTransactions<T>) -> Vec<T> {
        state
            .items
            .iter()
            .filter(|item| item.result.is_none())
            .map(|item| item.tx.clone())
            .collect()
    }

    /// Unconfirmed items whose TTL has passed at `now`.
    #[must_use]
    pub fn expired(&self, state: &PendingTransactions<T>, now: DateTime<Utc>) -> Vec<T> {
        state
            .items
            .iter()
            .filter(|item| item.result.is_none() && self.tx_trait.ttl_expired(&item.tx, now))
            .map(|item| item.tx.clone())
            .collect()
    }

    /// `{"version":"v1","transactions":[hex...]}`. Results are not persisted.
    pub fn serialize(
        &self,
        state: &PendingTransactions<T>,
    ) -> Result<String, PendingTransactionsError> {
        let transactions = state
            .items
            .iter()
            .map(|item| {
                self.tx_trait
                    .serialize(&item.tx)
                    .map(hex::encode)
                    .map_err(PendingTransactionsError::Encode)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(serde_json::to_string(&PendingTransactionsWire {
            version: PENDING_TRANSACTIONS_VERSION.to_string(),
            transactions,
        })?)
    }

    pub fn deserialize(&self, raw: &str) -> Result<PendingTransactions<T>, PendingTransactionsError> {
        let wire: PendingTransactionsWire = serde_json::from_str(raw)?;
        if wire.version != PENDING_TRANSACTIONS_VERSION {
            return Err(PendingTransactionsError::UnsupportedVersion(wire.version));
        }

        let mut items = Vec::with_capacity(wire.transactions.len());
        for (index, encoded) in wire.transactions.iter().enumerate() {
            let bytes = hex::decode(encoded)
                .map_err(|source| PendingTransactionsError::Hex { index, source })?;
            let tx = self
                .tx_trait
                .deserialize(&bytes)
                .map_err(|source| PendingTransactionsError::Decode { index, source })?;
            items.push(PendingItem { tx, result: None });
        }

        Ok(PendingTransactions { items })
    }
}

/// Published holder of the tracked transactions.
///
/// Writers go through the tracker's pure operations; readers take a
/// snapshot or subscribe.
pub struct PendingStore<T> {
    tracker: PendingTracker<T>,
    sender: watch::Sender<PendingTransactions<T>>,
}

impl<T: Clone> PendingStore<T> {
    #[must_use]
    pub fn new(tracker: PendingTracker<T>) -> Self {
        Self::with_state(tracker, PendingTransactions::default())
    }

    #[must_use]
    pub fn with_state(tracker: PendingTracker<T>, state: PendingTransactions<T>) -> Self {
        let (sender, _) = watch::channel(state);
        Self { tracker, sender }
    }

    #[must_use]
    pub fn tracker(&self) -> &PendingTracker<T> {
        &self.tracker
    }

    #[must_use]
    pub fn snapshot(&self) -> PendingTransactions<T> {
        self.sender.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PendingTransactions<T>> {
        self.sender.subscribe()
    }

    pub fn add(&self, tx: &T) {
        self.sender
            .send_modify(|state| *state = self.tracker.add(state, tx));
    }

    pub fn clear(&self, tx: &T) {
        self.sender
            .send_modify(|state| *state = self.tracker.clear(state, tx));
    }

    pub fn clear_ids(&self, ids: &BTreeSet<String>) {
        self.sender
            .send_modify(|state| *state = self.tracker.clear_ids(state, ids));
    }

    pub fn save_result(&self, tx: &T, result: TransactionResult) {
        self.sender
            .send_modify(|state| *state = self.tracker.save_result(state, tx, result));
    }

    pub fn save_result_ids(&self, ids: &BTreeSet<String>, result: &TransactionResult) {
        self.sender
            .send_modify(|state| *state = self.tracker.save_result_ids(state, ids, result));
    }

    #[must_use]
    pub fn has(&self, tx: &T) -> bool {
        self.tracker.has(&self.sender.borrow(), tx)
    }

    #[must_use]
    pub fn all_failed(&self) -> Vec<T> {
        self.tracker.all_failed(&self.sender.borrow())
    }

    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<T> {
        self.tracker.expired(&self.sender.borrow(), now)
    }

    pub fn serialize(&self) -> Result<String, PendingTransactionsError> {
        self.tracker.serialize(&self.sender.borrow())
    }
}
