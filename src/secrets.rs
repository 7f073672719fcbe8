// =============================================================================
// Credential Provider — where per-user API key/secret pairs come from
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::ExchangeError;
use crate::types::Credentials;

/// Resolves a user id to the credentials their live client should sign with.
/// Kept as a trait so a future secrets-manager-backed implementation can
/// replace the env/in-memory ones used here without touching the factory.
pub trait CredentialProvider: Send + Sync {
    fn credentials_for(&self, user_id: &str) -> Result<Credentials, ExchangeError>;
}

/// Single-tenant provider: every user id resolves to the same pair of
/// environment variables. Suitable for a deployment running one account.
pub struct EnvCredentialProvider {
    api_key_var: String,
    api_secret_var: String,
    testnet: bool,
}

impl EnvCredentialProvider {
    pub fn new(api_key_var: impl Into<String>, api_secret_var: impl Into<String>, testnet: bool) -> Self {
        Self {
            api_key_var: api_key_var.into(),
            api_secret_var: api_secret_var.into(),
            testnet,
        }
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn credentials_for(&self, user_id: &str) -> Result<Credentials, ExchangeError> {
        let api_key = std::env::var(&self.api_key_var).map_err(|_| ExchangeError::CredentialUnavailable {
            user_id: user_id.to_string(),
        })?;
        let api_secret = std::env::var(&self.api_secret_var).map_err(|_| ExchangeError::CredentialUnavailable {
            user_id: user_id.to_string(),
        })?;
        Ok(Credentials {
            api_key,
            api_secret,
            testnet: self.testnet,
        })
    }
}

/// In-memory multi-tenant provider, keyed by user id. Used in tests and by
/// deployments that inject credentials some other way (e.g. read once from a
/// secrets manager at startup).
#[derive(Default)]
pub struct MapCredentialProvider {
    entries: RwLock<HashMap<String, Credentials>>,
}

impl MapCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: impl Into<String>, credentials: Credentials) {
        self.entries.write().insert(user_id.into(), credentials);
    }

    pub fn remove(&self, user_id: &str) {
        self.entries.write().remove(user_id);
    }
}

impl CredentialProvider for MapCredentialProvider {
    fn credentials_for(&self, user_id: &str) -> Result<Credentials, ExchangeError> {
        self.entries
            .read()
            .get(user_id)
            .cloned()
            .ok_or_else(|| ExchangeError::CredentialUnavailable {
                user_id: user_id.to_string(),
            })
    }
}
