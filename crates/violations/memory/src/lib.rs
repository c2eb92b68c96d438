//! In-memory collaborators for Tracewarden: a violation sink and an HMAC
//! evidence signer backed by a tenant key map. Suitable for development and
//! testing.

pub mod signer;
pub mod sink;

pub use signer::{HmacEvidenceSigner, KeySource, MemoryKeySource};
pub use sink::MemoryViolationSink;
