use serde::{Deserialize, Serialize};

use crate::define_id;

define_id!(
    /// An IAM instance. Every event, query and append is scoped to one.
    InstanceId,
    "inst"
);
define_id!(
    /// Correlates the events of one command with the request that caused it.
    RequestId,
    "req"
);

// =============================================================================
// Log Positions
// =============================================================================

/// Global position of an event in the log.
///
/// Positions are assigned on append and strictly increase. Zero means
/// "nothing observed yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(position: i64) -> Self {
        Self(position)
    }

    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Sequence of an event within its aggregate, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateSeq(i32);

impl AggregateSeq {
    pub const FIRST: Self = Self(1);

    #[must_use]
    pub const fn new(seq: i32) -> Self {
        Self(seq)
    }

    #[must_use]
    pub const fn value(&self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for AggregateSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
