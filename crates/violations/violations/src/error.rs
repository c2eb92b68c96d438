/// Errors raised while publishing or signing violations.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The downstream sink rejected or failed to store the violation.
    #[error("publish failed: {0}")]
    Publish(String),

    /// The evidence signer failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The violation could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}
