pub mod aws;
pub mod file;

use crate::error::SecretError;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Resolves a secret name into its credential fields.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<SecretRecord, SecretError>;
}

/// Credential fields of one secret. Never logged: `Debug` prints field names
/// only.
#[derive(Clone)]
pub struct SecretRecord {
    name: String,
    fields: Map<String, JsonValue>,
}

impl SecretRecord {
    pub fn from_json_str(name: &str, raw: &str) -> Result<Self, SecretError> {
        let value: JsonValue =
            serde_json::from_str(raw).map_err(|err| SecretError::Malformed {
                name: name.to_string(),
                reason: format!("not valid JSON: {err}"),
            })?;
        match value {
            JsonValue::Object(fields) => Ok(Self {
                name: name.to_string(),
                fields,
            }),
            _ => Err(SecretError::Malformed {
                name: name.to_string(),
                reason: "expected a JSON object".to_string(),
            }),
        }
    }

    /// Binary payloads are either raw JSON bytes or base64-encoded JSON.
    pub fn from_binary(name: &str, bytes: &[u8]) -> Result<Self, SecretError> {
        if let Ok(text) = std::str::from_utf8(bytes)
            && let Ok(record) = Self::from_json_str(name, text)
        {
            return Ok(record);
        }

        let trimmed: Vec<u8> = bytes
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let decoded = STANDARD
            .decode(trimmed)
            .map_err(|err| SecretError::Malformed {
                name: name.to_string(),
                reason: format!("binary payload is neither JSON nor base64: {err}"),
            })?;
        let text = String::from_utf8(decoded).map_err(|err| SecretError::Malformed {
            name: name.to_string(),
            reason: format!("decoded payload is not UTF-8: {err}"),
        })?;
        Self::from_json_str(name, &text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First present alias, as text. Numbers are rendered, other JSON types
    /// are ignored.
    pub fn field(&self, aliases: &[&str]) -> Option<String> {
        aliases.iter().find_map(|alias| {
            let value = self
                .fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(alias))
                .map(|(_, v)| v)?;
            match value {
                JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
                JsonValue::Number(n) => Some(n.to_string()),
                _ => None,
            }
        })
    }

    pub fn require(&self, aliases: &[&str]) -> Result<String, SecretError> {
        self.field(aliases).ok_or_else(|| SecretError::Malformed {
            name: self.name.clone(),
            reason: format!("missing field `{}`", aliases.join("` / `")),
        })
    }
}

impl fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretRecord")
            .field("name", &self.name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}
