//! `key=value` line codec shared by the Core Link, the Remote Link and the
//! eye controller.
//!
//! A line is split on the **first** `=`.  A line without `=` is a bare key
//! with an empty value, not an error.  Trailing `\r` / `\n` are stripped
//! before splitting.  Only invalid UTF-8 is rejected outright.

use std::str::FromStr;

use kevinbot_types::DecodeError;

/// A decoded `key=value` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub key: String,
    pub value: String,
}

impl Frame {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Serialize back into a terminated line.
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.key, &self.value)
    }

    /// Parse the value as exactly `expected` comma-separated numbers.
    ///
    /// All-or-nothing: a single bad field fails the whole frame, so callers
    /// never apply a partial update.
    pub fn numbers<T: FromStr>(&self, expected: usize) -> Result<Vec<T>, DecodeError> {
        parse_list(&self.key, &self.value, Some(expected))
    }

    /// Parse the value as a boolean flag.
    pub fn flag(&self) -> Result<bool, DecodeError> {
        parse_bool(&self.value).ok_or_else(|| DecodeError::InvalidValue {
            key: self.key.clone(),
            value: self.value.clone(),
        })
    }
}

/// Decode one line into a [`Frame`].
pub fn decode(line: &[u8]) -> Result<Frame, DecodeError> {
    let text = std::str::from_utf8(line).map_err(|e| DecodeError::Encoding {
        valid_up_to: e.valid_up_to(),
    })?;
    let text = text.trim_end_matches(['\r', '\n']);
    let (key, value) = text.split_once('=').unwrap_or((text, ""));
    Ok(Frame::new(key, value))
}

/// Encode `key` / `value` into a `\n`-terminated line.
///
/// An empty value produces a bare `key\n`.
pub fn encode(key: &str, value: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(key.len() + value.len() + 2);
    line.extend_from_slice(key.as_bytes());
    if !value.is_empty() {
        line.push(b'=');
        line.extend_from_slice(value.as_bytes());
    }
    line.push(b'\n');
    line
}

/// Parse a comma-separated list of numbers.
///
/// With `expected = Some(n)` the list must have exactly `n` fields.
pub fn parse_list<T: FromStr>(
    key: &str,
    value: &str,
    expected: Option<usize>,
) -> Result<Vec<T>, DecodeError> {
    let fields: Vec<&str> = value.split(',').map(str::trim).collect();
    if let Some(expected) = expected {
        if fields.len() != expected {
            return Err(DecodeError::FieldCount {
                key: key.to_string(),
                expected,
                found: fields.len(),
            });
        }
    }
    fields
        .into_iter()
        .map(|field| {
            field.parse::<T>().map_err(|_| DecodeError::InvalidNumber {
                field: key.to_string(),
                value: field.to_string(),
            })
        })
        .collect()
}

/// Lenient boolean parser matching what remotes and the controller send.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "on" | "yes" => Some(true),
        "false" | "f" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}
