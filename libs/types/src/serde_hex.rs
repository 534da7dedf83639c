//! Hex string form for 32-byte identifiers in serde.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
    let s = String::deserialize(deserializer)?;
    let raw = hex::decode(s.trim_start_matches("0x")).map_err(DeError::custom)?;
    raw.try_into()
        .map_err(|_| DeError::custom("expected 32 bytes"))
}
