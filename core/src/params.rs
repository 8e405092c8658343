//! Parsing of externally supplied identifiers and counts.
//!
//! Every failure is reported as `Error::InvalidParameter`, whose message
//! always starts with `invalid_params: ` so callers can match on it.

use crate::{Error, Mac, Result};

/// Parses a 64-character hex identifier.
pub fn parse_identifier(value: &str) -> Result<Mac> {
    value.parse()
}

/// Parses an optional unsigned 32-bit count.
///
/// Returns `(value, present)`. An absent or empty parameter yields `(0, false)`
/// without error.
pub fn parse_u32_param(value: Option<&str>) -> Result<(u32, bool)> {
    match value {
        None | Some("") => Ok((0, false)),
        Some(raw) => raw
            .parse::<u32>()
            .map(|n| (n, true))
            .map_err(|_| Error::InvalidParameter(format!("Invalid parameter: {}", raw))),
    }
}

/// Returns true when `id` starts with the hex `prefix` (case-insensitive).
/// An empty prefix matches everything.
pub fn matches_prefix(id: &Mac, prefix: &str) -> bool {
    id.to_hex().starts_with(&prefix.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identifier() {
        let mac = parse_identifier(
            "7e0e6e24a6e29faf11d022dca77826fe8b8a000aff5ea27e16650d03acefc93c",
        )
        .unwrap();
        assert_eq!(mac.as_bytes()[0], 0x7e);
        assert_eq!(mac.as_bytes()[31], 0x3c);

        let err = parse_identifier("abcdef").unwrap_err();
        assert_eq!(err.to_string(), "invalid_params: Invalid parameter");
        assert!(parse_identifier("").is_err());
    }

    #[test]
    fn test_parse_u32_param() {
        assert_eq!(parse_u32_param(None).unwrap(), (0, false));
        assert_eq!(parse_u32_param(Some("")).unwrap(), (0, false));
        assert_eq!(parse_u32_param(Some("123")).unwrap(), (123, true));
        assert_eq!(parse_u32_param(Some("4294967295")).unwrap(), (u32::MAX, true));

        for bad in ["abc", "-1", "4294967296"] {
            let err = parse_u32_param(Some(bad)).unwrap_err();
            assert!(matches!(err, Error::InvalidParameter(_)), "input {}", bad);
        }
    }

    #[test]
    fn test_matches_prefix() {
        let mac = Mac::new([0xab; 32]);
        assert!(matches_prefix(&mac, ""));
        assert!(matches_prefix(&mac, "abab"));
        assert!(matches_prefix(&mac, "ABAB"));
        assert!(!matches_prefix(&mac, "ac"));
    }
}
