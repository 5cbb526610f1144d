use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unshielded_wallet::RemoteUpdate;
use unshielded_wallet::transaction::UtxoOutput;

#[derive(Debug, Deserialize)]
pub struct HarnessRequest {
    pub id: u64,
    #[serde(flatten)]
    pub command: HarnessCommand,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HarnessCommand {
    Init {
        public_key: String,
        network_id: Option<String>,
        native_token: Option<String>,
        input_fee_overhead: Option<u64>,
        output_fee_overhead: Option<u64>,
    },
    ApplyUpdate {
        update: RemoteUpdate,
    },
    Balances,
    Transfer {
        outputs: Vec<UtxoOutput>,
        ttl: Option<DateTime<Utc>>,
        #[serde(default)]
        reject: bool,
    },
    ExpireStale {
        now: Option<DateTime<Utc>>,
    },
    SerializeState,
    RestoreState {
        state: String,
    },
    Pending,
    Shutdown,
}

#[derive(Debug, Serialize)]
pub struct HarnessResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InitResult {
    pub public_key: String,
    pub network_id: String,
    pub native_token: String,
}

#[derive(Debug, Serialize)]
pub struct ProgressResult {
    pub applied_id: Option<u64>,
    pub highest_known_id: u64,
    pub connected: bool,
    pub synced: bool,
}

/// Token type (hex) to decimal amount.
pub type BalanceMap = BTreeMap<String, String>;

#[derive(Debug, Serialize)]
pub struct BalancesResult {
    pub available: BalanceMap,
    pub pending: BalanceMap,
    pub total: BalanceMap,
}

#[derive(Debug, Serialize)]
pub struct TransferResult {
    pub ids: Vec<String>,
    pub stage: String,
    pub ttl: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ExpireResult {
    pub expired: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct PendingResult {
    pub count: usize,
    pub transactions: Value,
}
