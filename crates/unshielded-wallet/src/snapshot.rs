//! Persisted JSON form of the wallet state.

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::ledger::{UnshieldedLedgerState, UtxoWithMeta};
use crate::sync::SyncProgress;
use crate::wallet::UnshieldedWalletState;

/// Protocol version written by this crate and the only one it restores.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedLedger {
    pub available_utxos: Vec<UtxoWithMeta>,
    pub pending_utxos: Vec<UtxoWithMeta>,
}

/// Field order here is the order on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedWalletState {
    pub public_key: String,
    pub state: SerializedLedger,
    pub protocol_version: u32,
    pub applied_id: Option<u64>,
    pub network_id: String,
}

impl From<&UnshieldedWalletState> for SerializedWalletState {
    fn from(state: &UnshieldedWalletState) -> Self {
        let snapshot = state.ledger.to_snapshot();
        Self {
            public_key: state.public_key.clone(),
            state: SerializedLedger {
                available_utxos: snapshot.available,
                pending_utxos: snapshot.pending,
            },
            protocol_version: state.protocol_version,
            applied_id: state.progress.applied_transaction_id,
            network_id: state.network_id.clone(),
        }
    }
}

pub fn serialize_state(state: &UnshieldedWalletState) -> Result<String, SnapshotError> {
    serde_json::to_string(&SerializedWalletState::from(state)).map_err(SnapshotError::Serialize)
}

/// Parse persisted state and check it belongs to `expected_network_id`.
///
/// The restored progress is disconnected; the next sync pass reconnects it.
pub fn deserialize_state(
    raw: &str,
    expected_network_id: &str,
) -> Result<UnshieldedWalletState, SnapshotError> {
    let serialized: SerializedWalletState =
        serde_json::from_str(raw).map_err(SnapshotError::Unreadable)?;

    if serialized.network_id != expected_network_id {
        return Err(SnapshotError::NetworkMismatch {
            expected: expected_network_id.to_string(),
            found: serialized.network_id,
        });
    }
    if serialized.protocol_version != PROTOCOL_VERSION {
        return Err(SnapshotError::UnsupportedProtocolVersion(
            serialized.protocol_version,
        ));
    }

    Ok(UnshieldedWalletState {
        public_key: serialized.public_key,
        network_id: serialized.network_id,
        protocol_version: serialized.protocol_version,
        ledger: UnshieldedLedgerState::restore(
            serialized.state.available_utxos,
            serialized.state.pending_utxos,
        ),
        progress: SyncProgress::restored(serialized.applied_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    use chrono::TimeZone;

    use crate::ledger::{
        IntentHash, TokenType, TransactionStatus, TransactionUpdate, UserAddress, Utxo, UtxoMeta,
    };

    fn coin(tag: u8, output_no: u32, value: u128) -> UtxoWithMeta {
        UtxoWithMeta::new(
            Utxo {
                value,
                owner: UserAddress("owner".to_string()),
                token_type: TokenType::from_bytes([0u8; 32]),
                intent_hash: IntentHash::from_bytes([tag; 32]),
                output_no,
            },
            UtxoMeta {
                ctime: chrono::Utc.timestamp_opt(1_700_000_000, 0).single(),
                registered_for_dust_generation: output_no % 2 == 0,
            },
        )
    }

    fn wallet_state(ledger: UnshieldedLedgerState, applied: Option<u64>) -> UnshieldedWalletState {
        UnshieldedWalletState {
            public_key: "pk".to_string(),
            network_id: "testnet".to_string(),
            protocol_version: PROTOCOL_VERSION,
            ledger,
            progress: SyncProgress::restored(applied),
        }
    }

    fn reachable_ledger() -> UnshieldedLedgerState {
        let (a, b, c) = (coin(3, 0, 10), coin(1, 1, 20), coin(2, 0, 30));
        let funding = TransactionUpdate {
            transaction_id: 1,
            identifiers: BTreeSet::new(),
            created_utxos: vec![a.clone(), b.clone(), c.clone()],
            spent_utxos: Vec::new(),
            status: TransactionStatus::Success,
            segments: Vec::new(),
        };
        UnshieldedLedgerState::new()
            .apply_update(&funding)
            .and_then(|s| s.spend(&a))
            .and_then(|s| s.spend(&b))
            .and_then(|s| s.rollback_spend(&b))
            .expect("reachable state")
    }

    #[test]
    fn serialize_deserialize_serialize_is_a_fixed_point() {
        let state = wallet_state(reachable_ledger(), Some(1));

        let first = serialize_state(&state).expect("first pass");
        let restored = deserialize_state(&first, "testnet").expect("restores");
        let second = serialize_state(&restored).expect("second pass");

        assert_eq!(first, second);
        assert_eq!(restored.ledger, state.ledger);
    }

    #[test]
    fn persisted_shape_uses_exact_field_names() {
        let raw = serialize_state(&wallet_state(UnshieldedLedgerState::new(), None)).expect("json");
        assert_eq!(
            raw,
            r#"{"publicKey":"pk","state":{"availableUtxos":[],"pendingUtxos":[]},"protocolVersion":1,"appliedId":null,"networkId":"testnet"}"#
        );
    }

    #[test]
    fn corrupt_input_is_unreadable_state() {
        let err = deserialize_state("{\"publicKey\":", "testnet").expect_err("corrupt");
        assert!(matches!(err, SnapshotError::Unreadable(_)));
    }

    #[test]
    fn other_network_is_rejected() {
        let raw = serialize_state(&wallet_state(UnshieldedLedgerState::new(), None)).expect("json");
        let err = deserialize_state(&raw, "mainnet").expect_err("wrong network");
        assert!(matches!(err, SnapshotError::NetworkMismatch { .. }));
    }

    #[test]
    fn unknown_protocol_version_is_rejected() {
        let mut state = wallet_state(UnshieldedLedgerState::new(), None);
        state.protocol_version = 7;
        let raw = serialize_state(&state).expect("json");
        let err = deserialize_state(&raw, "testnet").expect_err("unknown version");
        assert!(matches!(err, SnapshotError::UnsupportedProtocolVersion(7)));
    }

    #[test]
    fn restored_progress_keeps_applied_id_and_starts_disconnected() {
        let raw = serialize_state(&wallet_state(UnshieldedLedgerState::new(), Some(17))).expect("json");
        let restored = deserialize_state(&raw, "testnet").expect("restores");
        assert_eq!(restored.progress.applied_transaction_id, Some(17));
        assert!(!restored.progress.is_connected);
    }
}
