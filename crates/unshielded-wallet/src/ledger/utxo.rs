use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one kind of value (native fee token, custom asset, ...).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, bincode::Encode,
    bincode::Decode,
)]
#[serde(transparent)]
pub struct TokenType(#[serde(with = "hex_bytes")] pub Vec<u8>);

impl TokenType {
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(value: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self(hex::decode(value)?))
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Hash of the intent (transaction segment) that created an output.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, bincode::Encode,
    bincode::Decode,
)]
#[serde(transparent)]
pub struct IntentHash(#[serde(with = "hex_bytes")] pub Vec<u8>);

impl IntentHash {
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for IntentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Opaque owner identity; address encoding happens outside this crate.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, bincode::Encode,
    bincode::Decode,
)]
#[serde(transparent)]
pub struct UserAddress(pub String);

impl fmt::Display for UserAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a UTXO: the creating intent plus the output index inside it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtxoKey {
    pub intent_hash: IntentHash,
    pub output_no: u32,
}

impl fmt::Display for UtxoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.intent_hash, self.output_no)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    #[serde(with = "decimal_string")]
    pub value: u128,
    pub owner: UserAddress,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub intent_hash: IntentHash,
    pub output_no: u32,
}

impl Utxo {
    #[must_use]
    pub fn key(&self) -> UtxoKey {
        UtxoKey {
            intent_hash: self.intent_hash.clone(),
            output_no: self.output_no,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoMeta {
    pub ctime: Option<DateTime<Utc>>,
    pub registered_for_dust_generation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtxoWithMeta {
    pub utxo: Utxo,
    pub meta: UtxoMeta,
}

impl UtxoWithMeta {
    #[must_use]
    pub fn new(utxo: Utxo, meta: UtxoMeta) -> Self {
        Self { utxo, meta }
    }

    #[must_use]
    pub fn key(&self) -> UtxoKey {
        self.utxo.key()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(&raw).map_err(serde::de::Error::custom)
    }
}

/// `u128` values do not fit JSON numbers, so they travel as decimal strings.
pub(crate) mod decimal_string {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>().map_err(serde::de::Error::custom)
    }
}
