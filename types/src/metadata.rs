//! Open key/value annotations attached to blocks.

use std::collections::BTreeMap;

/// Producer-specific annotations. Ordered so serialized records are stable.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Well-known metadata keys.
pub mod keys {
    /// Model that produced the content.
    pub const MODEL: &str = "model";
    /// Wall-clock time the producer spent, in milliseconds.
    pub const DURATION_MS: &str = "duration_ms";
    /// Why the last transition attempt failed. Present only on live blocks.
    pub const TRANSITION_ERROR: &str = "transition_error";
}

/// Read `duration_ms` as an integer, if present and numeric.
#[must_use]
pub fn duration_ms(metadata: &Metadata) -> Option<u64> {
    metadata.get(keys::DURATION_MS).and_then(serde_json::Value::as_u64)
}
