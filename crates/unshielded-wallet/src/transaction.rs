//! Concrete unshielded transaction model.
//!
//! A transaction is a set of intents keyed by segment id. Each intent carries
//! its own TTL and an unshielded offer (inputs spent, outputs created), and is
//! identified by its hash; outputs of an intent become UTXOs keyed by
//! `(intent hash, output index)` once confirmed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::balancer::{CostModel, Imbalances};
use crate::encoding::WireEncodable;
use crate::error::{BalanceError, EncodingError, TransactionError};
use crate::ledger::{IntentHash, TokenType, UserAddress, Utxo, UtxoKey, UtxoWithMeta};
use crate::pending::TransactionTrait;

/// Segment 0 is reserved for the guaranteed section of a transaction.
pub const FIRST_INTENT_SEGMENT: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UtxoSpend {
    pub value: u128,
    pub owner: UserAddress,
    pub token_type: TokenType,
    pub intent_hash: IntentHash,
    pub output_no: u32,
}

impl UtxoSpend {
    #[must_use]
    pub fn key(&self) -> UtxoKey {
        UtxoKey {
            intent_hash: self.intent_hash.clone(),
            output_no: self.output_no,
        }
    }
}

impl From<&Utxo> for UtxoSpend {
    fn from(utxo: &Utxo) -> Self {
        Self {
            value: utxo.value,
            owner: utxo.owner.clone(),
            token_type: utxo.token_type.clone(),
            intent_hash: utxo.intent_hash.clone(),
            output_no: utxo.output_no,
        }
    }
}

impl From<&UtxoWithMeta> for UtxoSpend {
    fn from(utxo: &UtxoWithMeta) -> Self {
        Self::from(&utxo.utxo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct UtxoOutput {
    #[serde(with = "crate::ledger::decimal_string")]
    pub value: u128,
    pub owner: UserAddress,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UnshieldedOffer {
    pub inputs: Vec<UtxoSpend>,
    pub outputs: Vec<UtxoOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Intent {
    /// Unix seconds after which the intent may no longer be included.
    pub ttl: i64,
    pub guaranteed_offer: Option<UnshieldedOffer>,
    /// Random per-intent value; two intents with equal offers still hash apart.
    pub binding: [u8; 16],
}

impl Intent {
    /// New intent with a fresh random binding.
    #[must_use]
    pub fn new(ttl: DateTime<Utc>, offer: UnshieldedOffer) -> Self {
        Self::with_binding(ttl, offer, Uuid::new_v4().into_bytes())
    }

    #[must_use]
    pub fn with_binding(ttl: DateTime<Utc>, offer: UnshieldedOffer, binding: [u8; 16]) -> Self {
        Self {
            ttl: ttl.timestamp(),
            guaranteed_offer: Some(offer),
            binding,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.ttl, 0)
    }

    #[must_use]
    pub fn inputs(&self) -> &[UtxoSpend] {
        self.guaranteed_offer
            .as_ref()
            .map_or(&[][..], |offer| offer.inputs.as_slice())
    }

    #[must_use]
    pub fn outputs(&self) -> &[UtxoOutput] {
        self.guaranteed_offer
            .as_ref()
            .map_or(&[][..], |offer| offer.outputs.as_slice())
    }

    /// SHA-256 over the binding and a length-prefixed, field-by-field encoding
    /// of the intent.
    #[must_use]
    pub fn intent_hash(&self) -> IntentHash {
        let mut hasher = Sha256::new();
        hasher.update(b"unshielded-intent:");
        hasher.update(self.binding);
        hasher.update(self.ttl.to_le_bytes());
        hash_len(&mut hasher, self.inputs().len());
        for input in self.inputs() {
            hasher.update(input.value.to_le_bytes());
            hash_bytes(&mut hasher, input.owner.0.as_bytes());
            hash_bytes(&mut hasher, &input.token_type.0);
            hash_bytes(&mut hasher, &input.intent_hash.0);
            hasher.update(input.output_no.to_le_bytes());
        }
        hash_len(&mut hasher, self.outputs().len());
        for output in self.outputs() {
            hasher.update(output.value.to_le_bytes());
            hash_bytes(&mut hasher, output.owner.0.as_bytes());
            hash_bytes(&mut hasher, &output.token_type.0);
        }
        IntentHash::from_bytes(hasher.finalize().to_vec())
    }
}

fn hash_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_le_bytes());
}

fn hash_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hash_len(hasher, bytes.len());
    hasher.update(bytes);
}

#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct UnshieldedTransaction {
    pub network_id: String,
    pub intents: BTreeMap<u16, Intent>,
    pub proven: bool,
}

impl WireEncodable for UnshieldedTransaction {}

impl UnshieldedTransaction {
    #[must_use]
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            intents: BTreeMap::new(),
            proven: false,
        }
    }

    #[must_use]
    pub fn from_intent(network_id: impl Into<String>, intent: Intent) -> Self {
        let mut tx = Self::new(network_id);
        tx.intents.insert(FIRST_INTENT_SEGMENT, intent);
        tx
    }

    /// Hex intent hashes, the identifiers the indexer reports back.
    #[must_use]
    pub fn identifiers(&self) -> BTreeSet<String> {
        self.intents
            .values()
            .map(|intent| intent.intent_hash().to_hex())
            .collect()
    }

    /// Earliest TTL across all intents.
    #[must_use]
    pub fn ttl(&self) -> Option<DateTime<Utc>> {
        self.intents.values().filter_map(Intent::ttl).min()
    }

    pub fn inputs(&self) -> impl Iterator<Item = &UtxoSpend> {
        self.intents.values().flat_map(Intent::inputs)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &UtxoOutput> {
        self.intents.values().flat_map(Intent::outputs)
    }

    /// Keys of the outputs this transaction creates, paired with the outputs.
    #[must_use]
    pub fn created_outputs(&self) -> Vec<(UtxoKey, UtxoOutput)> {
        let mut created = Vec::new();
        for intent in self.intents.values() {
            let intent_hash = intent.intent_hash();
            for (index, output) in intent.outputs().iter().enumerate() {
                let Ok(output_no) = u32::try_from(index) else {
                    break;
                };
                created.push((
                    UtxoKey {
                        intent_hash: intent_hash.clone(),
                        output_no,
                    },
                    output.clone(),
                ));
            }
        }
        created
    }

    /// Inputs minus outputs per token type.
    pub fn imbalances(&self) -> Result<Imbalances, BalanceError> {
        let mut imbalances = Imbalances::new();
        for input in self.inputs() {
            adjust(&mut imbalances, &input.token_type, input.value, true)?;
        }
        for output in self.outputs() {
            adjust(&mut imbalances, &output.token_type, output.value, false)?;
        }
        Ok(imbalances)
    }

    /// Imbalances with the fees for the items already present charged
    /// against the native token.
    pub fn fee_adjusted_imbalances(
        &self,
        cost_model: &CostModel,
        native_token: &TokenType,
    ) -> Result<Imbalances, BalanceError> {
        let mut imbalances = self.imbalances()?;
        let fee = cost_model.fee_for(self.inputs().count(), self.outputs().count())?;
        adjust(&mut imbalances, native_token, fee, false)?;
        Ok(imbalances)
    }

    /// Union of both transactions' intents.
    ///
    /// The same intent present on both sides is kept once; two different
    /// intents on one segment id are a conflict.
    pub fn merge(&self, other: &Self) -> Result<Self, TransactionError> {
        if self.network_id != other.network_id {
            return Err(TransactionError::NetworkMismatch {
                left: self.network_id.clone(),
                right: other.network_id.clone(),
            });
        }

        let mut merged = self.clone();
        for (segment, intent) in &other.intents {
            match merged.intents.get(segment) {
                Some(existing) if existing != intent => {
                    return Err(TransactionError::SegmentConflict(*segment));
                }
                Some(_) => {}
                None => {
                    merged.intents.insert(*segment, intent.clone());
                }
            }
        }
        merged.proven = self.proven && other.proven;
        Ok(merged)
    }

    /// Append an intent on the next free segment id.
    pub fn with_intent(&self, intent: Intent) -> Result<Self, TransactionError> {
        let segment = match self.intents.keys().next_back() {
            None => FIRST_INTENT_SEGMENT,
            Some(last) => last
                .checked_add(1)
                .ok_or(TransactionError::SegmentsExhausted)?,
        };

        let mut next = self.clone();
        next.intents.insert(segment, intent);
        next.proven = false;
        Ok(next)
    }
}

fn adjust(
    imbalances: &mut Imbalances,
    token_type: &TokenType,
    value: u128,
    incoming: bool,
) -> Result<(), BalanceError> {
    let delta = i128::try_from(value)
        .map_err(|_| BalanceError::Overflow(format!("converting {value} to a signed delta")))?;
    let entry = imbalances.entry(token_type.clone()).or_insert(0);
    let updated = if incoming {
        entry.checked_add(delta)
    } else {
        entry.checked_sub(delta)
    };
    *entry = updated.ok_or_else(|| {
        BalanceError::Overflow(format!("aggregating imbalance for {token_type}"))
    })?;
    Ok(())
}

/// [`TransactionTrait`] capability for [`UnshieldedTransaction`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnshieldedTransactionTrait;

impl TransactionTrait<UnshieldedTransaction> for UnshieldedTransactionTrait {
    fn ids(&self, tx: &UnshieldedTransaction) -> BTreeSet<String> {
        tx.identifiers()
    }

    fn first_id(&self, tx: &UnshieldedTransaction) -> Option<String> {
        tx.intents
            .values()
            .next()
            .map(|intent| intent.intent_hash().to_hex())
    }

    fn ttl_expired(&self, tx: &UnshieldedTransaction, now: DateTime<Utc>) -> bool {
        tx.ttl().is_some_and(|ttl| now > ttl)
    }

    fn serialize(&self, tx: &UnshieldedTransaction) -> Result<Vec<u8>, EncodingError> {
        tx.to_bytes()
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<UnshieldedTransaction, EncodingError> {
        UnshieldedTransaction::from_bytes(bytes)
    }
}
