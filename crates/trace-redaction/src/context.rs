//! Per-session state shared by every redaction primitive.

use crate::timeline::Timeline;

/// Session bundle built once by the surrounding pipeline before redaction
/// starts and torn down when the trace run ends. Redaction primitives
/// only read it; independent sessions own independent contexts, so they
/// can be processed in parallel with no shared mutable state.
#[derive(Debug, Default)]
pub struct TraceContext {
    /// The one uid whose data may remain visible. Redaction operations
    /// that need it fail when it is unset.
    pub package_uid: Option<u64>,
    /// Name of the protected package. Carried for primitives outside
    /// this crate; the process event redactor never reads it.
    pub package_name: Option<String>,
    /// Ownership history, populated and sorted during ingestion and
    /// read-only once queries begin.
    pub timeline: Option<Timeline>,
}

impl TraceContext {
    pub fn new() -> Self {
        Self::default()
    }
}
