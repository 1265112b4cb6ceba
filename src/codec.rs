//! Binary decoders shared across the engine
//! UTF-16LE text, FILETIME conversion, base64 payload encoding, and the
//! decimal-string serde adapters used for 64-bit integers at the boundary.

use base64::{engine::general_purpose, Engine as _};

use crate::errors::EngineError;

/// Milliseconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
pub const WINDOWS_EPOCH_OFFSET_MS: i64 = 11_644_473_600_000;

/// 100-ns ticks per millisecond.
const TICKS_PER_MS: i64 = 10_000;

/// Convert a Windows FILETIME (100-ns ticks since 1601) to Unix milliseconds.
pub fn filetime_to_unix_ms(filetime: i64) -> i64 {
    filetime / TICKS_PER_MS - WINDOWS_EPOCH_OFFSET_MS
}

/// Convert Unix milliseconds to a Windows FILETIME.
pub fn unix_ms_to_filetime(unix_ms: i64) -> i64 {
    (unix_ms + WINDOWS_EPOCH_OFFSET_MS) * TICKS_PER_MS
}

/// Decode UTF-16LE bytes to a String. An odd trailing byte is truncated
/// rather than rejected; unpaired surrogates become replacement characters.
pub fn utf16le_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Base64 with the standard alphabet and `=` padding.
pub fn base64_encode(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

pub fn base64_decode(text: &str) -> Result<Vec<u8>, EngineError> {
    general_purpose::STANDARD
        .decode(text)
        .map_err(|e| EngineError::InvalidArgument(format!("invalid base64 payload: {}", e)))
}

/// Parse a decimal string into u64, as received across the boundary.
pub fn parse_u64_str(input: &str) -> Result<u64, EngineError> {
    input
        .trim()
        .parse::<u64>()
        .map_err(|_| EngineError::InvalidArgument(format!("not a 64-bit unsigned value: {:?}", input)))
}

pub fn parse_i64_str(input: &str) -> Result<i64, EngineError> {
    input
        .trim()
        .parse::<i64>()
        .map_err(|_| EngineError::InvalidArgument(format!("not a 64-bit signed value: {:?}", input)))
}

/// Serde adapter: u64 carried as a decimal string so the scripting layer on
/// the other side of the boundary never sees a value above 2^53.
pub mod u64_str {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.trim().parse::<u64>().map_err(de::Error::custom)
    }
}

/// Serde adapter: i64 as a decimal string (run-list LCN values are signed).
pub mod i64_str {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.trim().parse::<i64>().map_err(de::Error::custom)
    }
}

/// Serde adapter: binary payload carried as standard base64.
pub mod base64_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::base64_encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::base64_decode(&text).map_err(de::Error::custom)
    }
}
