//! Configuration value union and string-coercion rules.

use serde::{Deserialize, Serialize};

/// Declared type of a configuration entry.
///
/// `Secret` entries store a secret-store reference as their value, not
/// the secret material itself; the plaintext is resolved out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    /// Plain string value.
    String,
    /// Floating-point numeric value.
    Number,
    /// Boolean value.
    Boolean,
    /// Reference to an externally managed secret.
    Secret,
}

impl ConfigKind {
    /// Returns all kinds.
    pub fn all() -> &'static [ConfigKind] {
        &[Self::String, Self::Number, Self::Boolean, Self::Secret]
    }

    /// Parse a kind from its lowercase tag.
    pub fn parse(s: &str) -> Result<Self, KindParseError> {
        match s {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            "secret" => Ok(Self::Secret),
            other => Err(KindParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::Secret => write!(f, "secret"),
        }
    }
}

/// Error returned when a kind tag does not name a known kind.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown configuration kind: {0}")]
pub struct KindParseError(pub String);

/// A dynamically typed configuration value.
///
/// Serializes untagged, so a stored document reads as natural JSON
/// (`"8080"`, `8080`, `true`). The kind discriminant travels separately
/// on the owning document; a `Secret` document's value is a `String`
/// holding the secret-store reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// String value (also the representation of secret references).
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
}

impl ConfigValue {
    /// The kind this value's own shape implies.
    ///
    /// Never returns [`ConfigKind::Secret`]: secrecy is a property of
    /// the document's declared kind, not of the value representation.
    pub fn implied_kind(&self) -> ConfigKind {
        match self {
            Self::String(_) => ConfigKind::String,
            Self::Number(_) => ConfigKind::Number,
            Self::Boolean(_) => ConfigKind::Boolean,
        }
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The numeric payload, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean payload, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Coerce a raw string (an environment variable, typically) into a
    /// value of the requested kind.
    ///
    /// - `Number`: standard float parse; a non-numeric string or a NaN
    ///   result coerces to *no value*, never to NaN-as-valid.
    /// - `Boolean`: exactly `"true"` and `"1"` are true; every other
    ///   string (including `"false"`, `"0"`, arbitrary text) is false.
    /// - `String` and `Secret`: the raw string as-is.
    pub fn coerce_from_str(kind: ConfigKind, raw: &str) -> Option<ConfigValue> {
        match kind {
            ConfigKind::String | ConfigKind::Secret => Some(Self::String(raw.to_string())),
            ConfigKind::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| !n.is_nan())
                .map(Self::Number),
            ConfigKind::Boolean => Some(Self::Boolean(raw == "true" || raw == "1")),
        }
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for ConfigValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for ConfigValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for ConfigValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in ConfigKind::all() {
            assert_eq!(ConfigKind::parse(&kind.to_string()).unwrap(), *kind);
        }
        assert!(ConfigKind::parse("integer").is_err());
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(
            ConfigValue::coerce_from_str(ConfigKind::Number, "8080"),
            Some(ConfigValue::Number(8080.0))
        );
        assert_eq!(
            ConfigValue::coerce_from_str(ConfigKind::Number, " 3.5 "),
            Some(ConfigValue::Number(3.5))
        );
        assert_eq!(ConfigValue::coerce_from_str(ConfigKind::Number, "abc"), None);
        assert_eq!(ConfigValue::coerce_from_str(ConfigKind::Number, ""), None);
        // "NaN" parses as a float but is not a usable value.
        assert_eq!(ConfigValue::coerce_from_str(ConfigKind::Number, "NaN"), None);
    }

    #[test]
    fn test_boolean_coercion() {
        for truthy in ["true", "1"] {
            assert_eq!(
                ConfigValue::coerce_from_str(ConfigKind::Boolean, truthy),
                Some(ConfigValue::Boolean(true))
            );
        }
        for falsy in ["false", "0", "TRUE", "yes", "on", ""] {
            assert_eq!(
                ConfigValue::coerce_from_str(ConfigKind::Boolean, falsy),
                Some(ConfigValue::Boolean(false))
            );
        }
    }

    #[test]
    fn test_string_coercion_passthrough() {
        assert_eq!(
            ConfigValue::coerce_from_str(ConfigKind::String, "hello"),
            Some(ConfigValue::String("hello".to_string()))
        );
        assert_eq!(
            ConfigValue::coerce_from_str(ConfigKind::Secret, "projects/p/secrets/s"),
            Some(ConfigValue::String("projects/p/secrets/s".to_string()))
        );
    }

    #[test]
    fn test_untagged_serde() {
        let v: ConfigValue = serde_json::from_str("8080").unwrap();
        assert_eq!(v, ConfigValue::Number(8080.0));

        let v: ConfigValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, ConfigValue::Boolean(true));

        let v: ConfigValue = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(v, ConfigValue::String("text".to_string()));

        assert_eq!(
            serde_json::to_string(&ConfigValue::Number(1.5)).unwrap(),
            "1.5"
        );
    }

    #[test]
    fn test_implied_kind_never_secret() {
        let reference = ConfigValue::String("projects/p/secrets/db-password".into());
        assert_eq!(reference.implied_kind(), ConfigKind::String);
    }
}
