//! Credential resolution seam. The engine never reads secrets itself; it
//! asks a [`CredentialStore`] to turn a provider's opaque `credential_ref`
//! into the secret the adapter should send. The in-memory implementation is
//! backed by configuration; deployments with a vault implement the same
//! trait.

use crate::error::{AdapterError, ErrorKind};
use std::collections::HashMap;

/// Resolves a provider's credential reference to a secret.
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, credential_ref: &str) -> Result<String, AdapterError>;
}

/// Config-backed credential table.
#[derive(Debug, Default)]
pub struct StaticCredentialStore {
    secrets: HashMap<String, String>,
}

impl StaticCredentialStore {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }
}

impl CredentialStore for StaticCredentialStore {
    fn resolve(&self, credential_ref: &str) -> Result<String, AdapterError> {
        self.secrets.get(credential_ref).cloned().ok_or_else(|| {
            AdapterError::new(
                ErrorKind::AuthFailed,
                format!("no credential for ref {credential_ref}"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ref_is_an_auth_failure() {
        let store = StaticCredentialStore::new(HashMap::from([(
            "deepseek-cred".to_string(),
            "sk-secret".to_string(),
        )]));
        assert_eq!(store.resolve("deepseek-cred").unwrap(), "sk-secret");
        assert_eq!(
            store.resolve("missing").unwrap_err().kind,
            ErrorKind::AuthFailed
        );
    }
}
