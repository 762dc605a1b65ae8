//! Read-only access to the active provider credential for the rest of the
//! application.

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::{CryptoEngine, SECRET_PREVIEW};
use crate::error::AppError;
use crate::providers::ProviderKind;
use crate::store::CredentialRepository;

/// The active credential, decrypted.
///
/// Hold it for the single operation that needs the key and drop it; the key
/// buffer is wiped on drop.
pub struct ActiveProviderConfig {
    pub provider: ProviderKind,
    pub model_id: String,
    pub api_key: Zeroizing<String>,
}

impl fmt::Debug for ActiveProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveProviderConfig")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("api_key", &SECRET_PREVIEW)
            .finish()
    }
}

#[derive(Clone)]
pub struct ProviderConfigReader {
    repo: Arc<dyn CredentialRepository>,
    crypto: Arc<CryptoEngine>,
}

impl ProviderConfigReader {
    pub fn new(repo: Arc<dyn CredentialRepository>, crypto: Arc<CryptoEngine>) -> Self {
        Self { repo, crypto }
    }

    /// `None` means no provider is configured. Nothing is cached: every call
    /// reads and decrypts anew, so an activation or rotation is seen by the
    /// next call.
    pub async fn get_active_provider_config(&self) -> Result<Option<ActiveProviderConfig>, AppError> {
        let Some(record) = self.repo.fetch_active().await? else {
            return Ok(None);
        };

        let api_key = self.crypto.decrypt(&record.secret)?;
        Ok(Some(ActiveProviderConfig {
            provider: record.provider,
            model_id: record.model_id,
            api_key,
        }))
    }
}
