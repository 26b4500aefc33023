//! Bounded JSON parsing for documents fetched from remote parties.
//!
//! Client metadata documents come from arbitrary URLs, so they are size and
//! shape checked before being deserialized.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// JSON parser with limits on size and structure.
#[derive(Debug, Clone)]
pub struct SecureJsonParser {
    max_size: usize,
    max_depth: usize,
    max_string_length: usize,
    max_array_length: usize,
    max_object_keys: usize,
}

impl Default for SecureJsonParser {
    fn default() -> Self {
        Self {
            max_size: 64 * 1024,
            max_depth: 8,
            max_string_length: 8 * 1024,
            max_array_length: 64,
            max_object_keys: 128,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JsonSecurityError {
    #[error("JSON too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
    #[error("JSON too deep: {depth} levels (max: {max})")]
    TooDeep { depth: usize, max: usize },
    #[error("String too long: {length} chars (max: {max})")]
    StringTooLong { length: usize, max: usize },
    #[error("Array too large: {length} elements (max: {max})")]
    ArrayTooLarge { length: usize, max: usize },
    #[error("Object has too many keys: {count} (max: {max})")]
    TooManyKeys { count: usize, max: usize },
    #[error("JSON parsing error: {0}")]
    ParseError(#[from] serde_json::Error),
}

impl SecureJsonParser {
    pub fn parse_from_slice(&self, data: &[u8]) -> Result<Value, JsonSecurityError> {
        if data.len() > self.max_size {
            return Err(JsonSecurityError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let value: Value = serde_json::from_slice(data)?;
        self.validate_structure(&value, 0)?;
        Ok(value)
    }

    /// Checks the document shape, then deserializes it into `T`.
    pub fn parse_document<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, JsonSecurityError> {
        let value = self.parse_from_slice(data)?;
        Ok(serde_json::from_value(value)?)
    }

    fn validate_structure(&self, value: &Value, depth: usize) -> Result<(), JsonSecurityError> {
        if depth > self.max_depth {
            return Err(JsonSecurityError::TooDeep {
                depth,
                max: self.max_depth,
            });
        }

        match value {
            Value::String(s) => self.check_string(s)?,
            Value::Array(arr) => {
                if arr.len() > self.max_array_length {
                    return Err(JsonSecurityError::ArrayTooLarge {
                        length: arr.len(),
                        max: self.max_array_length,
                    });
                }
                for item in arr {
                    self.validate_structure(item, depth + 1)?;
                }
            }
            Value::Object(obj) => {
                if obj.len() > self.max_object_keys {
                    return Err(JsonSecurityError::TooManyKeys {
                        count: obj.len(),
                        max: self.max_object_keys,
                    });
                }
                for (key, val) in obj {
                    self.check_string(key)?;
                    self.validate_structure(val, depth + 1)?;
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn check_string(&self, s: &str) -> Result<(), JsonSecurityError> {
        if s.len() > self.max_string_length {
            return Err(JsonSecurityError::StringTooLong {
                length: s.len(),
                max: self.max_string_length,
            });
        }
        Ok(())
    }
}
