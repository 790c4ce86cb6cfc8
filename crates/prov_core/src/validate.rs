//! Input validators.
//!
//! Each validator takes raw operator input and returns either the accepted
//! value or a [`ValidationError`] carrying a human-readable reason.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn domain_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-zA-Z0-9][a-zA-Z0-9-]{0,61}[a-zA-Z0-9]\.)+[a-zA-Z]{2,}$").ok()
    })
    .as_ref()
}

/// Require at least `min_length` characters after trimming.
pub fn validate_non_empty(
    input: &str,
    field_name: &str,
    min_length: usize,
) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.chars().count() < min_length {
        let reason = if min_length <= 1 {
            "must not be empty".to_string()
        } else {
            format!("must be at least {} characters", min_length)
        };
        return Err(ValidationError::new(field_name, reason));
    }
    Ok(trimmed.to_string())
}

/// Accept only `[a-zA-Z0-9_]+`.
pub fn validate_identifier(value: &str) -> Result<String, ValidationError> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(value.to_string())
    } else {
        Err(ValidationError::new(
            "identifier",
            format!(
                "'{}' may only contain letters, digits and underscores",
                value
            ),
        ))
    }
}

/// Accept hostnames such as `shop.example.com`.
///
/// Every label is 2-63 alphanumeric/hyphen characters and may not start or
/// end with a hyphen; the top-level label is at least two letters.
pub fn validate_domain(value: &str) -> Result<String, ValidationError> {
    if domain_re().is_some_and(|re| re.is_match(value)) {
        Ok(value.to_string())
    } else {
        Err(ValidationError::new(
            "domain",
            format!("'{}' is not a valid domain name (expected e.g. shop.example.com)", value),
        ))
    }
}

/// Empty input selects `default`; anything else must be one of `allowed`.
pub fn validate_enum(
    value: &str,
    allowed: &[String],
    default: &str,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(default.to_string());
    }
    if allowed.iter().any(|a| a == trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(ValidationError::new(
            "value",
            format!("'{}' is not one of: {}", trimmed, allowed.join(", ")),
        ))
    }
}

/// Values collected from the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    DatabaseName,
    Charset,
    DatabaseUser,
    DatabasePassword,
    Domain,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseName => "database name",
            Self::Charset => "character set",
            Self::DatabaseUser => "database username",
            Self::DatabasePassword => "database password",
            Self::Domain => "domain name",
        }
    }

    /// Whether the value should be hidden when echoed or logged.
    pub fn is_secret(&self) -> bool {
        matches!(self, Self::DatabasePassword)
    }

    /// Validate raw input for this field.
    pub fn validate(&self, input: &str, rules: &FieldRules) -> Result<String, ValidationError> {
        let name = self.as_str();
        let relabel = |mut e: ValidationError| {
            e.field = name.to_string();
            e
        };
        match self {
            Self::DatabaseName => {
                let value = validate_non_empty(input, name, 1)?;
                validate_identifier(&value).map_err(relabel)
            }
            Self::Charset => {
                validate_enum(input, &rules.charsets, &rules.default_charset).map_err(relabel)
            }
            Self::DatabaseUser => validate_non_empty(input, name, rules.min_user_length),
            Self::DatabasePassword => validate_non_empty(input, name, rules.min_password_length),
            Self::Domain => {
                let value = validate_non_empty(input, name, 1)?;
                validate_domain(&value).map_err(relabel)
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Constraints applied by [`Field::validate`].
#[derive(Debug, Clone)]
pub struct FieldRules {
    pub charsets: Vec<String>,
    pub default_charset: String,
    pub min_user_length: usize,
    pub min_password_length: usize,
}

impl Default for FieldRules {
    fn default() -> Self {
        Self {
            charsets: ["utf8mb4", "utf8mb3", "utf8", "latin1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_charset: "utf8mb4".to_string(),
            min_user_length: 3,
            min_password_length: 8,
        }
    }
}
