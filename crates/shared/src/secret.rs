//! API key wrapper that never prints its value and wipes memory on drop.

use std::fmt;
use zeroize::Zeroizing;

#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(Zeroizing<String>);

impl ApiKey {
    /// Returns `None` for blank input; a blank key counts as "not set".
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(Zeroizing::new(trimmed.to_string())))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_key_is_absent() {
        assert!(ApiKey::new("   ").is_none());
        assert!(ApiKey::new("").is_none());
    }

    #[test]
    fn test_key_is_trimmed_and_redacted() {
        let key = ApiKey::new("  AIza-test \n").unwrap();
        assert_eq!(key.expose(), "AIza-test");
        assert_eq!(format!("{:?}", key), "ApiKey(****)");
    }
}
