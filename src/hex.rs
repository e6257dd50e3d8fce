//! Hex parsing for addresses and byte values supplied as text.
//!
//! Both accept an optional `0x`/`0X` prefix and are case-insensitive.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("invalid hex address '{input}' (expected e.g. 0x123ABC or 123ABC)")]
    InvalidAddress { input: String },

    #[error("invalid hex byte '{input}' (expected e.g. 0x85 or 85)")]
    InvalidByte { input: String },
}

fn strip_prefix(input: &str) -> &str {
    let trimmed = input.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
}

/// Parse a file address such as `0x1A2B3C`.
pub fn parse_address(input: &str) -> Result<u64, HexError> {
    let digits = strip_prefix(input);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HexError::InvalidAddress {
            input: input.to_string(),
        });
    }
    u64::from_str_radix(digits, 16).map_err(|_| HexError::InvalidAddress {
        input: input.to_string(),
    })
}

/// Parse a single byte such as `85` or `0x31`.
pub fn parse_byte(input: &str) -> Result<u8, HexError> {
    let digits = strip_prefix(input);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HexError::InvalidByte {
            input: input.to_string(),
        });
    }
    u8::from_str_radix(digits, 16).map_err(|_| HexError::InvalidByte {
        input: input.to_string(),
    })
}
