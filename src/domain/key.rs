//! Ordering keys.
//!
//! A key is the digit string of a fraction in `(0, 1)` written in base 62
//! (`0-9A-Za-z`, ASCII order). Keys never end in the zero digit, so two keys
//! compare the same way as strings as they do as numbers, and there is always
//! room for another key between any two distinct ones.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Digit alphabet in ascending ASCII order.
pub const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Numeric base of a key digit.
pub const BASE: u8 = 62;

/// Value of a single key digit, if the byte is one.
pub fn digit_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'Z' => Some(byte - b'A' + 10),
        b'a'..=b'z' => Some(byte - b'a' + 36),
        _ => None,
    }
}

/// Digit byte for a value below [`BASE`].
pub fn digit_char(value: u8) -> u8 {
    DIGITS[value as usize]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidKey(pub String);

impl fmt::Display for InvalidKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid order key {:?}", self.0)
    }
}

impl std::error::Error for InvalidKey {}

/// Dense ordering key of a card within its cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderKey(String);

impl OrderKey {
    /// Parse and validate a stored key.
    pub fn parse(raw: &str) -> Result<Self, InvalidKey> {
        let bytes = raw.as_bytes();
        if bytes.is_empty()
            || bytes.last() == Some(&b'0')
            || bytes.iter().any(|b| digit_value(*b).is_none())
        {
            return Err(InvalidKey(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Build from digits already known to be valid.
    pub(crate) fn from_digits(digits: Vec<u8>) -> Self {
        debug_assert!(!digits.is_empty() && digits.last() != Some(&b'0'));
        // Every byte comes from DIGITS, which is ASCII.
        Self(digits.into_iter().map(char::from).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OrderKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderKey> for String {
    fn from(key: OrderKey) -> Self {
        key.0
    }
}
