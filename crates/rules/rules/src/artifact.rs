//! Versioned, checksummed serialization of parsed rules.
//!
//! An artifact stores a rule's definition together with its parsed
//! expression so a store can hand back rules without re-parsing. The payload
//! is kept as the exact JSON text that was hashed, so verification never
//! depends on re-serialization being byte-stable.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RuleError;
use crate::ir::expr::Expr;
use crate::ir::rule::RuleDefinition;

/// Current artifact format version.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    checksum: String,
    payload: String,
}

#[derive(Deserialize)]
struct Payload {
    definition: RuleDefinition,
    expression: Expr,
}

/// A decoded artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleArtifact {
    pub definition: RuleDefinition,
    pub expression: Expr,
}

impl RuleArtifact {
    pub fn new(definition: RuleDefinition, expression: Expr) -> Self {
        Self {
            definition,
            expression,
        }
    }

    /// Serialize to the on-disk representation.
    pub fn encode(&self) -> Result<Vec<u8>, RuleError> {
        let payload = serde_json::to_string(&PayloadRef {
            definition: &self.definition,
            expression: &self.expression,
        })
        .map_err(|e| RuleError::Load(format!("cannot serialize rule artifact: {e}")))?;
        let envelope = Envelope {
            format_version: ARTIFACT_FORMAT_VERSION,
            checksum: checksum(&payload),
            payload,
        };
        serde_json::to_vec(&envelope)
            .map_err(|e| RuleError::Load(format!("cannot serialize rule artifact: {e}")))
    }

    /// Decode and verify an artifact.
    ///
    /// Any structural problem, unknown version, or checksum mismatch is
    /// reported as [`RuleError::CorruptedState`]. Nothing is repaired.
    pub fn decode(bytes: &[u8]) -> Result<Self, RuleError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| RuleError::CorruptedState(format!("malformed envelope: {e}")))?;
        if envelope.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(RuleError::CorruptedState(format!(
                "unsupported format version {} (expected {ARTIFACT_FORMAT_VERSION})",
                envelope.format_version
            )));
        }
        let actual = checksum(&envelope.payload);
        if actual != envelope.checksum {
            return Err(RuleError::CorruptedState(format!(
                "checksum mismatch: recorded {}, computed {actual}",
                envelope.checksum
            )));
        }
        let payload: Payload = serde_json::from_str(&envelope.payload)
            .map_err(|e| RuleError::CorruptedState(format!("malformed payload: {e}")))?;
        Ok(Self {
            definition: payload.definition,
            expression: payload.expression,
        })
    }
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    definition: &'a RuleDefinition,
    expression: &'a Expr,
}

fn checksum(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}
