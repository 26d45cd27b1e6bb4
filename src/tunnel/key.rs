//! Session key generation and parsing.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Random bytes behind every generated key.
pub const KEY_BYTES: usize = 32;

/// Longest key accepted from the wire.
pub const MAX_KEY_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("session key is empty")]
    Empty,

    #[error("session key is {0} characters long, limit is {MAX_KEY_LEN}")]
    TooLong(usize),

    #[error("session key contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Opaque identifier binding a forward-proxy connection to its destination
/// connection on the reverse proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Draw a fresh key from the OS random source.
    pub fn generate() -> Self {
        let mut raw = [0u8; KEY_BYTES];
        OsRng.fill_bytes(&mut raw);
        Self(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Accept a key received from the wire.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        if s.is_empty() {
            return Err(KeyError::Empty);
        }
        if s.len() > MAX_KEY_LEN {
            return Err(KeyError::TooLong(s.len()));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(KeyError::InvalidChar(c));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix suitable for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl FromStr for SessionKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_keys_are_header_safe() {
        let key = SessionKey::generate();
        assert_eq!(key.as_str().len(), 43);
        assert!(!key.as_str().contains('='));
        assert_eq!(SessionKey::parse(key.as_str()), Ok(key));
    }

    #[test]
    fn generated_keys_do_not_repeat() {
        let keys: HashSet<_> = (0..10_000).map(|_| SessionKey::generate()).collect();
        assert_eq!(keys.len(), 10_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(SessionKey::parse(""), Err(KeyError::Empty));
        assert_eq!(SessionKey::parse("abc=="), Err(KeyError::InvalidChar('=')));
        assert_eq!(SessionKey::parse("a b"), Err(KeyError::InvalidChar(' ')));
        assert_eq!(
            SessionKey::parse(&"a".repeat(200)),
            Err(KeyError::TooLong(200))
        );
    }

    #[test]
    fn short_is_prefix() {
        let key = SessionKey::parse("abcdefghijkl").unwrap();
        assert_eq!(key.short(), "abcdefgh");
        assert_eq!(SessionKey::parse("ab").unwrap().short(), "ab");
    }
}
