//! How lock passwords are stored and compared.
//!
//! KNOWN WEAKNESS: the only keeper, `PlaintextSecrets`, stores passwords as
//! given and compares them with plain string equality. Password recovery
//! depends on `reveal` returning the original password, so a hashing keeper
//! would have to return `None` there and recovery would stop disclosing it.

pub trait SecretKeeper: Send + Sync {
    /// Turn a password into the value persisted in the lock record.
    fn seal(&self, password: &str) -> String;

    /// Whether `supplied` matches the sealed value.
    fn verify(&self, sealed: &str, supplied: &str) -> bool;

    /// Recover the original password, if this keeper can.
    fn reveal(&self, sealed: &str) -> Option<String>;
}

/// Stores passwords verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextSecrets;

impl SecretKeeper for PlaintextSecrets {
    fn seal(&self, password: &str) -> String {
        password.to_string()
    }

    fn verify(&self, sealed: &str, supplied: &str) -> bool {
        sealed == supplied
    }

    fn reveal(&self, sealed: &str) -> Option<String> {
        Some(sealed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_exact_match_only() {
        let keeper = PlaintextSecrets;
        let sealed = keeper.seal("abcd");
        assert!(keeper.verify(&sealed, "abcd"));
        assert!(!keeper.verify(&sealed, "ABCD"));
        assert!(!keeper.verify(&sealed, "abcd "));
        assert_eq!(keeper.reveal(&sealed).as_deref(), Some("abcd"));
    }
}
