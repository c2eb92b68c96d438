use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use tracewarden_core::TenantId;
use tracewarden_violations::{EvidenceSigner, SinkError};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "hmac-sha256:";

/// Supplies signing keys, typically backed by a key-management service.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_key(&self, tenant: &TenantId) -> Result<Vec<u8>, SinkError>;
}

/// Tenant keys held in a `DashMap`.
#[derive(Default)]
pub struct MemoryKeySource {
    keys: DashMap<TenantId, Vec<u8>>,
}

impl MemoryKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the key for `tenant`.
    pub fn set_key(&self, tenant: TenantId, key: impl Into<Vec<u8>>) {
        self.keys.insert(tenant, key.into());
    }
}

#[async_trait]
impl KeySource for MemoryKeySource {
    async fn fetch_key(&self, tenant: &TenantId) -> Result<Vec<u8>, SinkError> {
        self.keys
            .get(tenant)
            .map(|k| k.value().clone())
            .ok_or_else(|| SinkError::Signing(format!("no signing key for tenant '{tenant}'")))
    }
}

/// HMAC-SHA256 signer that fetches the tenant's key on every call and
/// drops it once the signature is computed.
pub struct HmacEvidenceSigner {
    keys: Arc<dyn KeySource>,
}

impl HmacEvidenceSigner {
    pub fn new(keys: Arc<dyn KeySource>) -> Self {
        Self { keys }
    }

    fn mac(key: &[u8], canonical: &[u8]) -> Result<HmacSha256, SinkError> {
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| SinkError::Signing(format!("invalid HMAC key: {e}")))?;
        mac.update(canonical);
        Ok(mac)
    }

    /// Check a signature produced by this signer.
    pub fn verify(key: &[u8], canonical: &[u8], signature: &str) -> Result<bool, SinkError> {
        let Some(hex_sig) = signature.strip_prefix(PREFIX) else {
            return Ok(false);
        };
        let Ok(expected) = hex::decode(hex_sig) else {
            return Ok(false);
        };
        Ok(Self::mac(key, canonical)?.verify_slice(&expected).is_ok())
    }
}

#[async_trait]
impl EvidenceSigner for HmacEvidenceSigner {
    async fn sign(&self, tenant: &TenantId, canonical: &[u8]) -> Result<String, SinkError> {
        let key = self.keys.fetch_key(tenant).await?;
        let mac = Self::mac(&key, canonical)?;
        Ok(format!("{PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
    }
}
