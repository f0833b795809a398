//! Identity of this process among lock competitors.

use std::fmt;
use std::sync::OnceLock;

/// Number of random bytes in a generated identity.
const RANDOM_IDENTITY_BYTES: usize = 20;

static PROCESS_IDENTITY: OnceLock<Identity> = OnceLock::new();

/// Opaque string naming one competing process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random identity (40 hex characters).
    pub fn random() -> Self {
        let bytes: [u8; RANDOM_IDENTITY_BYTES] = rand::random();
        Self(const_hex::encode(bytes))
    }

    /// Returns the identity of this process, generating it on first use.
    ///
    /// Every call within one process returns the same value.
    pub fn process() -> &'static Identity {
        PROCESS_IDENTITY.get_or_init(Identity::random)
    }

    /// Uses `explicit` when given, otherwise the process identity.
    pub fn resolve(explicit: Option<String>) -> Self {
        match explicit {
            Some(value) => Self(value),
            None => Self::process().clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_identity_is_stable() {
        let first = Identity::process().clone();
        let second = Identity::process().clone();
        assert_eq!(first.as_str().as_bytes(), second.as_str().as_bytes());
        assert_eq!(Identity::resolve(None), first);
    }

    #[test]
    fn test_random_identity_is_hex() {
        let identity = Identity::random();
        assert_eq!(identity.as_str().len(), RANDOM_IDENTITY_BYTES * 2);
        assert!(identity.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(identity, Identity::random());
    }

    #[test]
    fn test_explicit_identity_wins() {
        assert_eq!(
            Identity::resolve(Some("node-a".to_string())).as_str(),
            "node-a"
        );
    }
}
