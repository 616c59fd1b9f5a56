//! Luhn-checked order identifiers.
//!
//! Both uploaded orders and withdrawals are keyed by a numeric identifier
//! that must pass the Luhn checksum. The check happens once at the edge;
//! everything past it carries an [`OrderNumber`] and never re-validates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Returned when a raw identifier is empty, contains a non-digit, or fails
/// the Luhn checksum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid order number format")]
pub struct InvalidOrderNumber;

/// A validated order number.
///
/// There is no `From<String>`; construction goes through [`OrderNumber::parse`]
/// so an unchecked string cannot reach the ledger by accident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Validate `raw` (surrounding whitespace is ignored).
    pub fn parse(raw: &str) -> Result<Self, InvalidOrderNumber> {
        let digits = raw.trim();
        if luhn_valid(digits) {
            Ok(Self(digits.to_string()))
        } else {
            Err(InvalidOrderNumber)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OrderNumber {
    type Error = InvalidOrderNumber;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderNumber> for String {
    fn from(value: OrderNumber) -> Self {
        value.0
    }
}

impl AsRef<str> for OrderNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Luhn (mod 10) checksum over an all-digit string.
pub fn luhn_valid(digits: &str) -> bool {
    if digits.is_empty() {
        return false;
    }

    let mut sum: u32 = 0;
    for (i, ch) in digits.bytes().rev().enumerate() {
        if !ch.is_ascii_digit() {
            return false;
        }
        let mut d = u32::from(ch - b'0');
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }

    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_valid_numbers() {
        for n in ["79927398713", "12345678903", "4561261212345467", "0"] {
            assert!(OrderNumber::parse(n).is_ok(), "{n} should pass luhn");
        }
    }

    #[test]
    fn rejects_bad_checksum_and_garbage() {
        for n in ["79927398710", "12345678900", "", "   ", "12a45", "-1", "1 2"] {
            assert_eq!(OrderNumber::parse(n), Err(InvalidOrderNumber), "{n:?}");
        }
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let n = OrderNumber::parse(" 79927398713\n").unwrap();
        assert_eq!(n.as_str(), "79927398713");
    }

    #[test]
    fn serde_rejects_invalid_numbers() {
        let ok: Result<OrderNumber, _> = serde_json::from_str("\"12345678903\"");
        assert!(ok.is_ok());
        let bad: Result<OrderNumber, _> = serde_json::from_str("\"12345678900\"");
        assert!(bad.is_err());
    }
}
