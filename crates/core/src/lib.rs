pub mod error;
pub mod severity;
pub mod span;
pub mod types;

pub use error::{CoreError, TenantIsolationError};
pub use severity::Severity;
pub use span::{AttributeValue, Attributes, Span, SpanKind, SpanStatus};
pub use types::{RuleId, SpanId, TenantId, TraceId};
