use serde::{Deserialize, Serialize};
use std::fmt;

/// A symbolic key sequence in the `<...>` mini-language understood by
/// [`crate::keys::encode`].
///
/// Sequences are immutable once built; every test run consumes exactly one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeySequence(String);

impl KeySequence {
    pub fn new(symbolic: impl Into<String>) -> Self {
        Self(symbolic.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the symbolic form in characters (not encoded bytes).
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shortened form for log lines and progress output.
    pub fn preview(&self, max_chars: usize) -> String {
        if self.len() <= max_chars {
            return format!("{:?}", self.0);
        }
        let head: String = self.0.chars().take(max_chars).collect();
        format!("{head:?}...")
    }
}

impl fmt::Display for KeySequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeySequence {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for KeySequence {
    fn from(value: String) -> Self {
        Self(value)
    }
}
