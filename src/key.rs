use std::fmt;

use crate::error::KeyError;

/// Longest key accepted for either the matching key or the bucketing key.
pub const MAX_KEY_LENGTH: usize = 250;

/// The identity a flag is evaluated for.
///
/// The matching key is what matchers compare against when they do not target an attribute. The
/// bucketing key feeds the hash that decides rollout percentages; it falls back to the matching
/// key when not set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    matching_key: String,
    bucketing_key: Option<String>,
}

impl Key {
    /// Create a key whose matching and bucketing identities are the same.
    pub fn new(matching_key: impl Into<String>) -> Result<Key, KeyError> {
        let matching_key = matching_key.into();
        validate("matching key", &matching_key)?;
        Ok(Key {
            matching_key,
            bucketing_key: None,
        })
    }

    /// Create a key that hashes on a different identity than it matches on.
    pub fn with_bucketing_key(
        matching_key: impl Into<String>,
        bucketing_key: impl Into<String>,
    ) -> Result<Key, KeyError> {
        let bucketing_key = bucketing_key.into();
        validate("bucketing key", &bucketing_key)?;
        let mut key = Key::new(matching_key)?;
        key.bucketing_key = Some(bucketing_key);
        Ok(key)
    }

    pub fn matching_key(&self) -> &str {
        &self.matching_key
    }

    pub fn bucketing_key(&self) -> &str {
        self.bucketing_key.as_deref().unwrap_or(&self.matching_key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bucketing_key {
            Some(bucketing_key) => write!(f, "{}/{}", self.matching_key, bucketing_key),
            None => f.write_str(&self.matching_key),
        }
    }
}

fn validate(name: &'static str, value: &str) -> Result<(), KeyError> {
    if value.is_empty() {
        return Err(KeyError::Empty(name));
    }
    let length = value.chars().count();
    if length > MAX_KEY_LENGTH {
        return Err(KeyError::TooLong {
            name,
            length,
            max: MAX_KEY_LENGTH,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    #[test]
    fn bucketing_key_defaults_to_matching_key() {
        let key = Key::new("alice").unwrap();
        assert_eq!(key.matching_key(), "alice");
        assert_eq!(key.bucketing_key(), "alice");

        let key = Key::with_bucketing_key("alice", "account-7").unwrap();
        assert_eq!(key.matching_key(), "alice");
        assert_eq!(key.bucketing_key(), "account-7");
        assert_eq!(key.to_string(), "alice/account-7");
    }

    #[test]
    fn rejects_empty_keys() {
        assert_that!(Key::new("")).is_err_containing(KeyError::Empty("matching key"));
        assert_that!(Key::with_bucketing_key("alice", ""))
            .is_err_containing(KeyError::Empty("bucketing key"));
    }

    #[test]
    fn rejects_long_keys() {
        let longest = "m".repeat(MAX_KEY_LENGTH);
        assert_that!(Key::new(longest.as_str())).is_ok();

        let too_long = "m".repeat(MAX_KEY_LENGTH + 7);
        assert_that!(Key::new(too_long.as_str())).is_err_containing(KeyError::TooLong {
            name: "matching key",
            length: 257,
            max: MAX_KEY_LENGTH,
        });
        assert_that!(Key::with_bucketing_key("alice", too_long))
            .is_err_containing(KeyError::TooLong {
                name: "bucketing key",
                length: 257,
                max: MAX_KEY_LENGTH,
            });
    }
}
