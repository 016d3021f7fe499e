//! The closed set of mapping functions.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use enrichflow_document::Value;
use enrichflow_shared::{EnrichflowError, Result};

/// A mapping function as written in a definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingFunctionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, serde_json::Value>,
}

impl MappingFunctionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: IndexMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// A validated mapping function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingFunction {
    /// Base64; in URL-token form the padding is replaced by its count.
    Base64Encode { url_token: bool },
    Base64Decode { url_token: bool },
    UrlEncode,
    UrlDecode,
    /// Split on `delimiter` and keep the token at `position` (0-based).
    ExtractTokenAtPosition { delimiter: String, position: usize },
    /// Parse a JSON array string into a string collection.
    JsonArrayToStringCollection,
}

impl MappingFunction {
    /// Validate a spec. Unknown names and bad parameters are config errors.
    pub fn from_spec(spec: &MappingFunctionSpec) -> Result<Self> {
        let params = Params {
            function: &spec.name,
            values: &spec.parameters,
        };
        let function = match spec.name.as_str() {
            "base64Encode" => Self::Base64Encode {
                url_token: params.bool_or("useHttpServerUtilityUrlTokenEncode", true)?,
            },
            "base64Decode" => Self::Base64Decode {
                url_token: params.bool_or("useHttpServerUtilityUrlTokenDecode", true)?,
            },
            "urlEncode" => Self::UrlEncode,
            "urlDecode" => Self::UrlDecode,
            "extractTokenAtPosition" => Self::ExtractTokenAtPosition {
                delimiter: params.string("delimiter")?,
                position: params.count("position")?,
            },
            "jsonArrayToStringCollection" => Self::JsonArrayToStringCollection,
            other => {
                return Err(EnrichflowError::config(format!(
                    "unknown mapping function '{other}'"
                )));
            }
        };
        params.reject_unknown(function.parameter_names())?;
        Ok(function)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Base64Encode { .. } => "base64Encode",
            Self::Base64Decode { .. } => "base64Decode",
            Self::UrlEncode => "urlEncode",
            Self::UrlDecode => "urlDecode",
            Self::ExtractTokenAtPosition { .. } => "extractTokenAtPosition",
            Self::JsonArrayToStringCollection => "jsonArrayToStringCollection",
        }
    }

    fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            Self::Base64Encode { .. } => &["useHttpServerUtilityUrlTokenEncode"],
            Self::Base64Decode { .. } => &["useHttpServerUtilityUrlTokenDecode"],
            Self::ExtractTokenAtPosition { .. } => &["delimiter", "position"],
            _ => &[],
        }
    }

    /// Apply to a value; sequences are transformed element by element.
    pub fn apply(&self, value: &Value) -> std::result::Result<Value, String> {
        match value {
            Value::Sequence(items) => items
                .iter()
                .map(|item| self.apply_scalar(item))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Sequence),
            scalar => self.apply_scalar(scalar),
        }
    }

    fn apply_scalar(&self, value: &Value) -> std::result::Result<Value, String> {
        let text = value
            .as_str()
            .ok_or_else(|| format!("{} expects text, got {}", self.name(), value.kind_name()))?;

        match self {
            Self::Base64Encode { url_token: true } => Ok(Value::String(url_token_encode(text.as_bytes()))),
            Self::Base64Encode { url_token: false } => Ok(Value::String(STANDARD.encode(text))),
            Self::Base64Decode { url_token } => {
                let bytes = if *url_token {
                    url_token_decode(text)?
                } else {
                    STANDARD.decode(text).map_err(|e| format!("invalid base64: {e}"))?
                };
                String::from_utf8(bytes)
                    .map(Value::String)
                    .map_err(|_| "decoded bytes are not UTF-8".to_string())
            }
            Self::UrlEncode => Ok(Value::String(
                url::form_urlencoded::byte_serialize(text.as_bytes()).collect(),
            )),
            Self::UrlDecode => url_decode(text).map(Value::String),
            Self::ExtractTokenAtPosition {
                delimiter,
                position,
            } => text
                .split(delimiter.as_str())
                .nth(*position)
                .map(Value::from)
                .ok_or_else(|| format!("no token at position {position} splitting on '{delimiter}'")),
            Self::JsonArrayToStringCollection => {
                let items: Vec<serde_json::Value> =
                    serde_json::from_str(text).map_err(|e| format!("not a JSON array: {e}"))?;
                Ok(Value::Sequence(
                    items
                        .into_iter()
                        .map(|item| match item {
                            serde_json::Value::String(s) => Value::String(s),
                            other => Value::String(other.to_string()),
                        })
                        .collect(),
                ))
            }
        }
    }
}

/// URL-safe alphabet, padding stripped and its count appended as a digit.
fn url_token_encode(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    let padded = URL_SAFE.encode(bytes);
    let body = padded.trim_end_matches('=');
    format!("{body}{}", padded.len() - body.len())
}

fn url_token_decode(token: &str) -> std::result::Result<Vec<u8>, String> {
    let Some(count) = token.chars().last() else {
        return Ok(Vec::new());
    };
    let body = &token[..token.len() - count.len_utf8()];
    let padding = count
        .to_digit(10)
        .filter(|n| *n <= 2)
        .ok_or_else(|| format!("invalid URL token padding '{count}'"))?;
    let padded = format!("{body}{}", "=".repeat(padding as usize));
    URL_SAFE
        .decode(padded)
        .map_err(|e| format!("invalid URL token: {e}"))
}

fn url_decode(text: &str) -> std::result::Result<String, String> {
    if text.contains('&') {
        return Err("unencoded '&' in URL-encoded text".to_string());
    }
    let query = format!("v={text}");
    Ok(url::form_urlencoded::parse(query.as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default())
}

struct Params<'a> {
    function: &'a str,
    values: &'a IndexMap<String, serde_json::Value>,
}

impl Params<'_> {
    fn invalid(&self, name: &str, expected: &str) -> EnrichflowError {
        EnrichflowError::config(format!(
            "mapping function '{}': parameter '{name}' must be {expected}",
            self.function
        ))
    }

    fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.values.get(name) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.invalid(name, "a boolean")),
        }
    }

    fn string(&self, name: &str) -> Result<String> {
        self.values
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| self.invalid(name, "a string"))
    }

    fn count(&self, name: &str) -> Result<usize> {
        self.values
            .get(name)
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .ok_or_else(|| self.invalid(name, "a non-negative integer"))
    }

    fn reject_unknown(&self, known: &[&str]) -> Result<()> {
        match self.values.keys().find(|k| !known.contains(&k.as_str())) {
            Some(unknown) => Err(EnrichflowError::config(format!(
                "mapping function '{}' has no parameter '{unknown}'",
                self.function
            ))),
            None => Ok(()),
        }
    }
}
