//! SQL identifier handling.
//!
//! Table and column names come from user input (the stage spec and the
//! command line), so they are never spliced into statements raw. Every
//! identifier is validated and double-quoted before use.

use regex::Regex;
use std::sync::LazyLock;

use crate::errors::StorageError;

/// Postgres truncates identifiers beyond this many bytes.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"[\x00-\x1f\x7f]").unwrap()
});

/// Checks that `name` is usable as a quoted identifier.
///
/// # Errors
///
/// Returns a schema error for empty names, names longer than
/// [`MAX_IDENTIFIER_BYTES`] and names containing control characters.
pub fn validate_identifier(name: &str) -> Result<(), StorageError> {
    if name.is_empty() {
        return Err(StorageError::schema("validate_identifier", "empty identifier"));
    }
    if name.len() > MAX_IDENTIFIER_BYTES {
        return Err(StorageError::schema(
            "validate_identifier",
            format!("identifier '{name}' exceeds {MAX_IDENTIFIER_BYTES} bytes"),
        ));
    }
    if CONTROL_CHARS.is_match(name) {
        return Err(StorageError::schema(
            "validate_identifier",
            format!("identifier {name:?} contains control characters"),
        ));
    }
    Ok(())
}

/// Quotes `name` as an SQL identifier, doubling embedded quotes.
///
/// # Errors
///
/// See [`validate_identifier`].
pub fn quote_ident(name: &str) -> Result<String, StorageError> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quotes every name in `names`.
///
/// # Errors
///
/// Fails on the first invalid name.
pub fn quote_all<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>, StorageError> {
    names.iter().map(|n| quote_ident(n.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote_ident("summary").unwrap(), "\"summary\"");
        assert_eq!(quote_ident("index").unwrap(), "\"index\"");
    }

    #[test]
    fn test_quote_preserves_case_and_spaces() {
        assert_eq!(quote_ident("My Column").unwrap(), "\"My Column\"");
        assert_eq!(
            quote_ident("cliDataForgeSystem").unwrap(),
            "\"cliDataForgeSystem\""
        );
    }

    #[test]
    fn test_quote_escapes_embedded_quotes() {
        assert_eq!(
            quote_ident("a\"; DROP TABLE x; --").unwrap(),
            "\"a\"\"; DROP TABLE x; --\""
        );
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(quote_ident("").is_err());
        assert!(quote_ident("bad\nname").is_err());
        assert!(quote_ident(&"x".repeat(64)).is_err());
        assert!(quote_ident(&"x".repeat(63)).is_ok());
    }

    #[test]
    fn test_quote_all() {
        let quoted = quote_all(&["title", "content"]).unwrap();
        assert_eq!(quoted, vec!["\"title\"", "\"content\""]);
        assert!(quote_all(&["ok", ""]).is_err());
    }
}
