//! Payload formats
//!
//! The codec never looks inside a payload. Each schema picks the format its
//! body is written in; errors from the underlying library are carried as-is.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Payload serialization errors
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FormatResult<T> = Result<T, FormatError>;

/// A serialization library plugged in per schema
pub trait PayloadFormat: Send + Sync + 'static {
    /// Name of this format (for logging/debugging)
    const NAME: &'static str;

    fn serialize<T: Serialize>(value: &T) -> FormatResult<Vec<u8>>;

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> FormatResult<T>;
}

/// Compact binary payloads via `bincode`
#[derive(Debug, Clone, Copy, Default)]
pub struct Bincode;

impl PayloadFormat for Bincode {
    const NAME: &'static str = "bincode";

    fn serialize<T: Serialize>(value: &T) -> FormatResult<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> FormatResult<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// UTF-8 JSON payloads via `serde_json`
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl PayloadFormat for Json {
    const NAME: &'static str = "json";

    fn serialize<T: Serialize>(value: &T) -> FormatResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> FormatResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Move {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_json_is_readable() {
        let bytes = Json::serialize(&Move { x: 1, y: -2 }).unwrap();
        assert_eq!(bytes, br#"{"x":1,"y":-2}"#);
    }

    #[test]
    fn test_bincode_rejects_truncated_payload() {
        let bytes = Bincode::serialize(&Move { x: 1, y: 2 }).unwrap();
        let err = Bincode::deserialize::<Move>(&bytes[..3]).unwrap_err();
        assert!(matches!(err, FormatError::Bincode(_)));
    }

    #[test]
    fn test_json_rejects_garbage() {
        let err = Json::deserialize::<Move>(b"not json").unwrap_err();
        assert!(matches!(err, FormatError::Json(_)));
    }
}
