//! Evidence signing for violations.
//!
//! [`SigningSink`] wraps any [`ViolationSink`] and attaches a signature over
//! the violation's canonical bytes before forwarding it. Signing itself is
//! done by an external [`EvidenceSigner`]; this crate holds no key material.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use tracewarden_core::TenantId;

use crate::error::SinkError;
use crate::record::Violation;
use crate::sink::ViolationSink;

/// Signs canonical violation bytes on behalf of a tenant.
#[async_trait]
pub trait EvidenceSigner: Send + Sync {
    async fn sign(&self, tenant: &TenantId, canonical: &[u8]) -> Result<String, SinkError>;
}

/// A sink decorator that signs each violation before forwarding it.
///
/// A signing failure is returned to the caller and nothing is forwarded.
pub struct SigningSink {
    inner: Arc<dyn ViolationSink>,
    signer: Arc<dyn EvidenceSigner>,
}

impl SigningSink {
    pub fn new(inner: Arc<dyn ViolationSink>, signer: Arc<dyn EvidenceSigner>) -> Self {
        Self { inner, signer }
    }
}

#[async_trait]
impl ViolationSink for SigningSink {
    async fn publish(&self, violation: Violation) -> Result<(), SinkError> {
        let canonical = violation.canonical_bytes()?;
        let signature = match self.signer.sign(violation.tenant(), &canonical).await {
            Ok(sig) => sig,
            Err(e) => {
                warn!(violation = violation.id(), error = %e, "evidence signing failed");
                return Err(e);
            }
        };
        self.inner.publish(violation.with_signature(signature)).await
    }
}
