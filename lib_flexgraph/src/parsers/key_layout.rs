use crate::error::ConfigError;

const DELIMITER: char = ':';
const SEGMENTS: usize = 3;

/// The three segments of a store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyParts<'a> {
    pub prefix: &'a str,
    pub instrument: &'a str,
    pub token: &'a str,
}

/// # Key Layout
///
/// Keys have the bit-exact form `prefix:instrument:token`. The layout is
/// derived from the configured glob pattern; when the pattern's first
/// segment is a literal (no glob metacharacters) keys must carry exactly
/// that prefix. Only the first two delimiters split, so the token may hold
/// colons of its own (`price_data:EUR_USD:2025-08-25T11:52:32`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: Option<String>,
}

impl KeyLayout {
    /// Builds the layout for a pattern such as `price_data:*:*`.
    pub fn from_pattern(pattern: &str) -> Result<Self, ConfigError> {
        let segments: Vec<&str> = pattern.split(DELIMITER).collect();
        if segments.len() != SEGMENTS || segments.iter().any(|s| s.is_empty()) {
            return Err(ConfigError::KeyPattern {
                pattern: pattern.to_string(),
            });
        }

        let first = segments[0];
        let literal = !first.contains(['*', '?', '[', ']', '\\']);
        Ok(Self {
            prefix: literal.then(|| first.to_string()),
        })
    }

    /// A layout that accepts any prefix.
    pub fn any_prefix() -> Self {
        Self { prefix: None }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Splits a key into its segments, or explains why it does not fit.
    pub fn split<'a>(&self, key: &'a str) -> Result<KeyParts<'a>, String> {
        let segments: Vec<&'a str> = key.splitn(SEGMENTS, DELIMITER).collect();
        if segments.len() != SEGMENTS {
            return Err(format!(
                "expected {} '{}'-separated segments, found {}",
                SEGMENTS,
                DELIMITER,
                segments.len()
            ));
        }

        let (prefix, instrument, token) = (segments[0], segments[1], segments[2]);
        if let Some(expected) = &self.prefix {
            if prefix != expected {
                return Err(format!("prefix '{}' does not match '{}'", prefix, expected));
            }
        }
        if instrument.is_empty() {
            return Err("empty instrument segment".to_string());
        }

        Ok(KeyParts {
            prefix,
            instrument,
            token,
        })
    }

    /// The instrument a key belongs to, if the key fits the layout.
    pub fn instrument_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        self.split(key).ok().map(|parts| parts.instrument)
    }

    /// The trailing timestamp token of a key.
    pub fn token<'a>(&self, key: &'a str) -> Option<&'a str> {
        self.split(key).ok().map(|parts| parts.token)
    }
}
