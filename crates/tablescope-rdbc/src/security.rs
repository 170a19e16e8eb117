//! Guards for configured names that end up in SQL text.
//!
//! Values are always bound as parameters. The configured schema name is
//! validated here; collection and field names are resolved against the
//! catalog instead.

use crate::error::Error;

/// Validate a schema name.
///
/// Accepts `^[A-Za-z_][A-Za-z0-9_]{0,254}$`. Anything else (quotes,
/// whitespace, dots, semicolons, non-ASCII) is rejected with a
/// configuration error.
///
/// # Examples
///
/// ```
/// use tablescope_rdbc::security::validate_identifier;
///
/// assert!(validate_identifier("users").is_ok());
/// assert!(validate_identifier("_private_2").is_ok());
///
/// assert!(validate_identifier("x; DROP TABLE users--").is_err());
/// assert!(validate_identifier("").is_err());
/// assert!(validate_identifier("1st").is_err());
/// ```
pub fn validate_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("identifier cannot be empty"));
    }

    if name.len() > 255 {
        return Err(Error::config(format!(
            "identifier too long: {} chars (max 255)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "invalid identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::config(format!(
            "invalid identifier '{}': contains invalid character '{}'",
            name, bad
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("user_accounts").is_ok());
        assert!(validate_identifier("_hidden").is_ok());
        assert!(validate_identifier("a").is_ok());
        assert!(validate_identifier("Orders2024").is_ok());
    }

    #[test]
    fn test_identifier_length_limit() {
        assert!(validate_identifier(&"a".repeat(255)).is_ok());
        assert!(validate_identifier(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_injection_attempts() {
        assert!(validate_identifier("x; DROP TABLE users--").is_err());
        assert!(validate_identifier("x' OR '1'='1").is_err());
        assert!(validate_identifier("users\"").is_err());
        assert!(validate_identifier("public.users").is_err());
        assert!(validate_identifier("user name").is_err());
        assert!(validate_identifier("x\0").is_err());
        assert!(validate_identifier("tabl\u{0435}").is_err());
    }

    #[test]
    fn test_error_is_configuration() {
        let err = validate_identifier("9lives").unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Configuration);
        assert!(err.to_string().contains("9lives"));
    }
}
