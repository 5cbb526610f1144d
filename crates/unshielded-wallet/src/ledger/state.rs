//! Available vs. speculatively spent UTXOs.
//!
//! Every transition takes `&self` and returns a fresh state. The two maps sit
//! behind `Arc`s, so a transition copies only the map it touches and any
//! snapshot held elsewhere keeps seeing the data it was handed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::LedgerError;
use crate::ledger::{TokenType, TransactionUpdate, Utxo, UtxoKey, UtxoWithMeta};

type UtxoMap = BTreeMap<UtxoKey, UtxoWithMeta>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnshieldedLedgerState {
    available: Arc<UtxoMap>,
    pending: Arc<UtxoMap>,
}

/// Flat, key-ordered view of the ledger used for persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub available: Vec<UtxoWithMeta>,
    pub pending: Vec<UtxoWithMeta>,
}

impl UnshieldedLedgerState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a state from persisted lists.
    ///
    /// A key listed on both sides stays pending only.
    #[must_use]
    pub fn restore(
        available: impl IntoIterator<Item = UtxoWithMeta>,
        pending: impl IntoIterator<Item = UtxoWithMeta>,
    ) -> Self {
        let pending: UtxoMap = pending.into_iter().map(|u| (u.key(), u)).collect();
        let available: UtxoMap = available
            .into_iter()
            .map(|u| (u.key(), u))
            .filter(|(key, _)| !pending.contains_key(key))
            .collect();

        Self {
            available: Arc::new(available),
            pending: Arc::new(pending),
        }
    }

    #[must_use]
    pub fn to_snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            available: self.available.values().cloned().collect(),
            pending: self.pending.values().cloned().collect(),
        }
    }

    #[must_use]
    pub fn available(&self) -> &BTreeMap<UtxoKey, UtxoWithMeta> {
        &self.available
    }

    #[must_use]
    pub fn pending(&self) -> &BTreeMap<UtxoKey, UtxoWithMeta> {
        &self.pending
    }

    #[must_use]
    pub fn find_available(&self, key: &UtxoKey) -> Option<&UtxoWithMeta> {
        self.available.get(key)
    }

    #[must_use]
    pub fn find_pending(&self, key: &UtxoKey) -> Option<&UtxoWithMeta> {
        self.pending.get(key)
    }

    /// Available coins in key order.
    #[must_use]
    pub fn available_coins(&self) -> Vec<UtxoWithMeta> {
        self.available.values().cloned().collect()
    }

    /// Available coins that are registered for dust generation.
    #[must_use]
    pub fn dust_registered_coins(&self) -> Vec<UtxoWithMeta> {
        self.available
            .values()
            .filter(|u| u.meta.registered_for_dust_generation)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn balances(&self) -> BTreeMap<TokenType, u128> {
        sum_by_token(self.available.values())
    }

    #[must_use]
    pub fn pending_balances(&self) -> BTreeMap<TokenType, u128> {
        sum_by_token(self.pending.values())
    }

    /// Available plus speculatively spent value, i.e. what the wallet holds if
    /// every pending spend were to fail.
    #[must_use]
    pub fn total_balances(&self) -> BTreeMap<TokenType, u128> {
        sum_by_token(self.available.values().chain(self.pending.values()))
    }

    pub fn spend(&self, utxo: &UtxoWithMeta) -> Result<Self, LedgerError> {
        let key = utxo.key();
        if !self.available.contains_key(&key) {
            return Err(LedgerError::UtxoNotFound(key));
        }

        let mut next = self.clone();
        let moved = Arc::make_mut(&mut next.available)
            .remove(&key)
            .ok_or_else(|| LedgerError::UtxoNotFound(key.clone()))?;
        Arc::make_mut(&mut next.pending).insert(key, moved);
        Ok(next)
    }

    pub fn rollback_spend(&self, utxo: &UtxoWithMeta) -> Result<Self, LedgerError> {
        let key = utxo.key();
        if !self.pending.contains_key(&key) {
            return Err(LedgerError::UtxoNotFound(key));
        }

        let mut next = self.clone();
        let moved = Arc::make_mut(&mut next.pending)
            .remove(&key)
            .ok_or_else(|| LedgerError::UtxoNotFound(key.clone()))?;
        Arc::make_mut(&mut next.available).insert(key, moved);
        Ok(next)
    }

    pub fn spend_by_key(&self, utxo: &Utxo) -> Result<Self, LedgerError> {
        let key = utxo.key();
        let found = self
            .available
            .get(&key)
            .ok_or(LedgerError::UtxoNotFound(key))?;
        self.spend(found)
    }

    pub fn rollback_spend_by_key(&self, utxo: &Utxo) -> Result<Self, LedgerError> {
        let key = utxo.key();
        let found = self
            .pending
            .get(&key)
            .ok_or(LedgerError::UtxoNotFound(key))?;
        self.rollback_spend(found)
    }

    /// Fold a confirmed (fully or partially successful) transaction in.
    ///
    /// Spent keys that are already gone are ignored, which makes re-delivery
    /// of the same update a no-op.
    pub fn apply_update(&self, update: &TransactionUpdate) -> Result<Self, LedgerError> {
        if !update.status.is_applied() {
            return Err(LedgerError::ApplyTransaction {
                transaction_id: update.transaction_id,
                status: update.status,
                expected: "success",
            });
        }

        let spent: BTreeSet<UtxoKey> = update.spent_utxos.iter().map(UtxoWithMeta::key).collect();

        let mut next = self.clone();
        if spent.iter().any(|key| self.pending.contains_key(key)) {
            let pending = Arc::make_mut(&mut next.pending);
            pending.retain(|key, _| !spent.contains(key));
        }

        let available = Arc::make_mut(&mut next.available);
        available.retain(|key, _| !spent.contains(key));
        for created in &update.created_utxos {
            available.insert(created.key(), created.clone());
        }

        Ok(next)
    }

    /// Fold a failed transaction in: its spent side goes back to `available`.
    pub fn apply_failed_update(&self, update: &TransactionUpdate) -> Result<Self, LedgerError> {
        if update.status.is_applied() {
            return Err(LedgerError::ApplyTransaction {
                transaction_id: update.transaction_id,
                status: update.status,
                expected: "failure",
            });
        }

        let mut next = self.clone();
        let pending = Arc::make_mut(&mut next.pending);
        for spent in &update.spent_utxos {
            pending.remove(&spent.key());
        }

        let available = Arc::make_mut(&mut next.available);
        for spent in &update.spent_utxos {
            available.insert(spent.key(), spent.clone());
        }

        Ok(next)
    }
}

fn sum_by_token<'a>(utxos: impl Iterator<Item = &'a UtxoWithMeta>) -> BTreeMap<TokenType, u128> {
    let mut totals = BTreeMap::new();
    for utxo in utxos {
        let entry = totals.entry(utxo.utxo.token_type.clone()).or_insert(0u128);
        *entry = entry.saturating_add(utxo.utxo.value);
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{IntentHash, TransactionStatus, UserAddress, UtxoMeta};

    fn token(tag: u8) -> TokenType {
        TokenType::from_bytes([tag; 32])
    }

    fn coin(tag: u8, output_no: u32, value: u128) -> UtxoWithMeta {
        UtxoWithMeta::new(
            Utxo {
                value,
                owner: UserAddress("owner".to_string()),
                token_type: token(0),
                intent_hash: IntentHash::from_bytes([tag; 32]),
                output_no,
            },
            UtxoMeta::default(),
        )
    }

    fn update(id: u64, status: TransactionStatus) -> TransactionUpdate {
        TransactionUpdate {
            transaction_id: id,
            identifiers: BTreeSet::new(),
            created_utxos: Vec::new(),
            spent_utxos: Vec::new(),
            status,
            segments: Vec::new(),
        }
    }

    fn funded(coins: &[UtxoWithMeta]) -> UnshieldedLedgerState {
        let mut created = update(1, TransactionStatus::Success);
        created.created_utxos = coins.to_vec();
        UnshieldedLedgerState::new()
            .apply_update(&created)
            .expect("funding update applies")
    }

    #[test]
    fn spend_then_rollback_is_identity() {
        let a = coin(1, 0, 10);
        let b = coin(1, 1, 20);
        let state = funded(&[a.clone(), b]);

        let spent = state.spend(&a).expect("spend");
        assert_eq!(spent.available().len(), 1);
        assert_eq!(spent.pending().len(), 1);

        let restored = spent.rollback_spend(&a).expect("rollback");
        assert_eq!(restored, state);
    }

    #[test]
    fn spend_leaves_previous_snapshot_untouched() {
        let a = coin(1, 0, 10);
        let state = funded(std::slice::from_ref(&a));
        let _spent = state.spend(&a).expect("spend");

        assert_eq!(state.available().len(), 1);
        assert!(state.pending().is_empty());
    }

    #[test]
    fn spend_of_unknown_utxo_fails() {
        let state = funded(&[coin(1, 0, 10)]);
        let err = state.spend(&coin(2, 0, 10)).expect_err("unknown utxo");
        assert!(matches!(err, LedgerError::UtxoNotFound(_)));
    }

    #[test]
    fn double_spend_is_rejected() {
        let a = coin(1, 0, 10);
        let state = funded(std::slice::from_ref(&a)).spend(&a).expect("spend");
        let err = state.spend(&a).expect_err("already pending");
        assert_eq!(err, LedgerError::UtxoNotFound(a.key()));
    }

    #[test]
    fn rollback_of_available_utxo_fails() {
        let a = coin(1, 0, 10);
        let state = funded(std::slice::from_ref(&a));
        let err = state.rollback_spend(&a).expect_err("not pending");
        assert!(matches!(err, LedgerError::UtxoNotFound(_)));
    }

    #[test]
    fn by_key_variants_use_stored_meta() {
        let mut a = coin(1, 0, 10);
        a.meta.registered_for_dust_generation = true;
        let state = funded(std::slice::from_ref(&a));

        let spent = state.spend_by_key(&a.utxo).expect("spend by key");
        assert!(
            spent
                .find_pending(&a.key())
                .expect("pending")
                .meta
                .registered_for_dust_generation
        );

        let back = spent.rollback_spend_by_key(&a.utxo).expect("rollback by key");
        assert_eq!(back, state);
    }

    #[test]
    fn apply_update_rejects_failure_status() {
        let state = funded(&[coin(1, 0, 10)]);
        let err = state
            .apply_update(&update(2, TransactionStatus::Failure))
            .expect_err("failure must use the failed path");
        assert!(matches!(
            err,
            LedgerError::ApplyTransaction {
                transaction_id: 2,
                ..
            }
        ));
    }

    #[test]
    fn apply_failed_update_rejects_success_status() {
        let state = funded(&[coin(1, 0, 10)]);
        for status in [TransactionStatus::Success, TransactionStatus::PartialSuccess] {
            state
                .apply_failed_update(&update(2, status))
                .expect_err("success must use the applied path");
        }
    }

    #[test]
    fn apply_update_moves_spent_and_adds_created() {
        let a = coin(1, 0, 10);
        let b = coin(1, 1, 20);
        let state = funded(&[a.clone(), b.clone()]).spend(&a).expect("spend");

        let mut confirmed = update(2, TransactionStatus::Success);
        confirmed.spent_utxos = vec![a.clone()];
        confirmed.created_utxos = vec![coin(2, 0, 7)];

        let next = state.apply_update(&confirmed).expect("applies");
        assert!(next.pending().is_empty());
        assert_eq!(next.available().len(), 2);
        assert!(next.find_available(&b.key()).is_some());
        assert!(next.find_available(&a.key()).is_none());
        assert_eq!(next.balances().get(&token(0)), Some(&27));
    }

    #[test]
    fn apply_update_is_idempotent() {
        let a = coin(1, 0, 10);
        let state = funded(std::slice::from_ref(&a));

        let mut confirmed = update(2, TransactionStatus::PartialSuccess);
        confirmed.spent_utxos = vec![a];
        confirmed.created_utxos = vec![coin(2, 0, 7)];

        let once = state.apply_update(&confirmed).expect("first");
        let twice = once.apply_update(&confirmed).expect("second");
        assert_eq!(once, twice);
    }

    #[test]
    fn apply_failed_update_restores_exactly_the_spent_utxos() {
        let a = coin(1, 0, 10);
        let b = coin(1, 1, 20);
        let c = coin(1, 2, 30);
        let state = funded(&[a.clone(), b.clone(), c.clone()])
            .spend(&a)
            .and_then(|s| s.spend(&b))
            .and_then(|s| s.spend(&c))
            .expect("spends");

        let mut failed = update(3, TransactionStatus::Failure);
        failed.spent_utxos = vec![a.clone(), b.clone()];

        let next = state.apply_failed_update(&failed).expect("applies");
        assert_eq!(next.available().len(), state.available().len() + 2);
        assert_eq!(next.pending().len(), state.pending().len() - 2);
        assert!(next.find_pending(&c.key()).is_some());
    }

    #[test]
    fn restore_keeps_conflicting_key_pending_only() {
        let a = coin(1, 0, 10);
        let state = UnshieldedLedgerState::restore(vec![a.clone()], vec![a.clone()]);
        assert!(state.available().is_empty());
        assert!(state.find_pending(&a.key()).is_some());
    }

    #[test]
    fn snapshot_round_trips() {
        let a = coin(1, 0, 10);
        let b = coin(3, 0, 5);
        let state = funded(&[a.clone(), b]).spend(&a).expect("spend");

        let snapshot = state.to_snapshot();
        let restored = UnshieldedLedgerState::restore(snapshot.available, snapshot.pending);
        assert_eq!(restored, state);
    }

    #[test]
    fn total_balance_counts_pending_value() {
        let a = coin(1, 0, 10);
        let b = coin(1, 1, 5);
        let state = funded(&[a.clone(), b]).spend(&a).expect("spend");

        assert_eq!(state.balances().get(&token(0)), Some(&5));
        assert_eq!(state.pending_balances().get(&token(0)), Some(&10));
        assert_eq!(state.total_balances().get(&token(0)), Some(&15));
    }

    #[test]
    fn dust_query_only_returns_registered_available_coins() {
        let mut registered = coin(1, 0, 10);
        registered.meta.registered_for_dust_generation = true;
        let mut registered_spent = coin(1, 1, 20);
        registered_spent.meta.registered_for_dust_generation = true;
        let plain = coin(1, 2, 30);

        let state = funded(&[registered.clone(), registered_spent.clone(), plain])
            .spend(&registered_spent)
            .expect("spend");

        assert_eq!(state.dust_registered_coins(), vec![registered]);
    }
}
