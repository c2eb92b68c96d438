pub mod emitter;
pub mod error;
pub mod record;
pub mod signing;
pub mod sink;

pub use emitter::{DedupWindow, Emission, RuleMatch, ViolationEmitter};
pub use error::SinkError;
pub use record::{DedupKey, SpanRef, Violation};
pub use signing::{EvidenceSigner, SigningSink};
pub use sink::ViolationSink;
