use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::balancer::CostModel;
use crate::error::ConfigError;
use crate::ledger::TokenType;
use crate::lifecycle::{CoordinatorConfig, SubmissionStage};

const DEFAULT_NETWORK_ID: &str = "undeployed";
const DEFAULT_NATIVE_TOKEN: &str = "0000000000000000000000000000000000000000000000000000000000000000";
const DEFAULT_SYNC_GAP: u64 = 50;
const DEFAULT_TX_TTL_SECS: u64 = 3_600;
const DEFAULT_SUBMISSION_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_REQUIRED_STAGE: &str = "in_block";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    pub network_id: String,
    pub native_token: TokenType,
    pub cost_model: CostModel,
    /// How far `applied` may trail `highest` and still count as synced.
    pub sync_gap: u64,
    pub tx_ttl_secs: u64,
    pub submission_timeout_ms: u64,
    pub required_stage: SubmissionStage,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network_id: DEFAULT_NETWORK_ID.to_string(),
            native_token: TokenType::from_bytes([0u8; 32]),
            cost_model: CostModel::default(),
            sync_gap: DEFAULT_SYNC_GAP,
            tx_ttl_secs: DEFAULT_TX_TTL_SECS,
            submission_timeout_ms: DEFAULT_SUBMISSION_TIMEOUT_MS,
            required_stage: SubmissionStage::InBlock,
        }
    }
}

impl WalletConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let network_id = env_var_or_default("UNSHIELDED_WALLET_NETWORK_ID", DEFAULT_NETWORK_ID);

        let raw_token = env_var_or_default("UNSHIELDED_WALLET_NATIVE_TOKEN", DEFAULT_NATIVE_TOKEN);
        let native_token =
            TokenType::from_hex(&raw_token).map_err(|_| ConfigError::InvalidValue {
                key: "UNSHIELDED_WALLET_NATIVE_TOKEN",
                expected: "a hex-encoded token type",
                value: raw_token.clone(),
            })?;

        let cost_model = CostModel {
            input_fee_overhead: parse_env("UNSHIELDED_WALLET_INPUT_FEE_OVERHEAD", 0u128)?,
            output_fee_overhead: parse_env("UNSHIELDED_WALLET_OUTPUT_FEE_OVERHEAD", 0u128)?,
        };

        let sync_gap = parse_env("UNSHIELDED_WALLET_SYNC_GAP", DEFAULT_SYNC_GAP)?;
        let tx_ttl_secs = parse_env("UNSHIELDED_WALLET_TX_TTL_SECS", DEFAULT_TX_TTL_SECS)?;
        let submission_timeout_ms = parse_env(
            "UNSHIELDED_WALLET_SUBMISSION_TIMEOUT_MS",
            DEFAULT_SUBMISSION_TIMEOUT_MS,
        )?;

        let raw_stage = env_var_or_default("UNSHIELDED_WALLET_REQUIRED_STAGE", DEFAULT_REQUIRED_STAGE);
        let required_stage =
            SubmissionStage::from_str(&raw_stage).map_err(|_| ConfigError::InvalidValue {
                key: "UNSHIELDED_WALLET_REQUIRED_STAGE",
                expected: "one of submitted, in_block, finalized",
                value: raw_stage.clone(),
            })?;

        Ok(Self {
            network_id,
            native_token,
            cost_model,
            sync_gap,
            tx_ttl_secs,
            submission_timeout_ms,
            required_stage,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "UNSHIELDED_WALLET_NETWORK_ID must not be empty".to_string(),
            ));
        }

        if self.native_token.0.is_empty() {
            return Err(ConfigError::Validation(
                "UNSHIELDED_WALLET_NATIVE_TOKEN must not be empty".to_string(),
            ));
        }

        if self.tx_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "UNSHIELDED_WALLET_TX_TTL_SECS must be > 0".to_string(),
            ));
        }

        if self.submission_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "UNSHIELDED_WALLET_SUBMISSION_TIMEOUT_MS must be > 0".to_string(),
            ));
        }

        if i64::try_from(self.tx_ttl_secs).is_err() {
            return Err(ConfigError::Validation(
                "UNSHIELDED_WALLET_TX_TTL_SECS is out of range".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub const fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            cost_model: self.cost_model,
            required_stage: self.required_stage,
            submission_timeout: Duration::from_millis(self.submission_timeout_ms),
            transaction_ttl: Duration::from_secs(self.tx_ttl_secs),
        }
    }
}

fn env_var_or_default(key: &str, default_value: &str) -> String {
    env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_value.to_string())
}

fn parse_env<N: FromStr + ToString>(key: &'static str, default_value: N) -> Result<N, ConfigError> {
    let raw = env_var_or_default(key, &default_value.to_string());
    raw.trim().parse::<N>().map_err(|_| ConfigError::InvalidValue {
        key,
        expected: "a non-negative integer",
        value: raw.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        WalletConfig::default()
            .validate()
            .expect("defaults should validate");
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let cfg = WalletConfig {
            tx_ttl_secs: 0,
            ..WalletConfig::default()
        };

        let err = cfg.validate().expect_err("must reject zero ttl");
        assert!(err.to_string().contains("UNSHIELDED_WALLET_TX_TTL_SECS"));
    }

    #[test]
    fn blank_network_is_rejected() {
        let cfg = WalletConfig {
            network_id: "  ".to_string(),
            ..WalletConfig::default()
        };
        cfg.validate().expect_err("must reject blank network");
    }

    #[test]
    fn coordinator_config_carries_durations() {
        let cfg = WalletConfig {
            tx_ttl_secs: 90,
            submission_timeout_ms: 1_500,
            required_stage: SubmissionStage::Finalized,
            ..WalletConfig::default()
        };

        let coordinator = cfg.coordinator_config();
        assert_eq!(coordinator.transaction_ttl, Duration::from_secs(90));
        assert_eq!(coordinator.submission_timeout, Duration::from_millis(1_500));
        assert_eq!(coordinator.required_stage, SubmissionStage::Finalized);
    }

    #[test]
    fn unset_variable_falls_back_to_default() {
        let value = parse_env("UNSHIELDED_WALLET_TEST_NEVER_SET", 7u64).expect("default");
        assert_eq!(value, 7);
    }
}
