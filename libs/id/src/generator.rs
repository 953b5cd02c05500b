//! ID generation for aggregates created by commands.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::IdError;

/// Hands out fresh aggregate IDs.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Result<String, IdError>;
}

/// Production generator: a bare ULID string per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidGenerator;

impl IdGenerator for UlidGenerator {
    fn next_id(&self) -> Result<String, IdError> {
        Ok(crate::Ulid::new().to_string())
    }
}

/// Deterministic generator yielding `{prefix}{n}` starting at 1.
///
/// Used by fixtures that need predictable IDs such as `key1`, `key2`.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    prefix: String,
    next: AtomicU64,
    limit: Option<u64>,
}

impl SequenceIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
            limit: None,
        }
    }

    /// Fails every call after `limit` IDs were handed out.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> Result<String, IdError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.limit {
            if n > limit {
                return Err(IdError::Generation {
                    message: format!("sequence exhausted after {limit} ids"),
                });
            }
        }
        Ok(format!("{}{}", self.prefix, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulid_generator_unique() {
        let generator = UlidGenerator;
        let a = generator.next_id().unwrap();
        let b = generator.next_id().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 26);
    }

    #[test]
    fn test_sequence_generator_counts_from_one() {
        let generator = SequenceIdGenerator::new("key");
        assert_eq!(generator.next_id().unwrap(), "key1");
        assert_eq!(generator.next_id().unwrap(), "key2");
    }

    #[test]
    fn test_sequence_generator_limit() {
        let generator = SequenceIdGenerator::new("id").with_limit(1);
        assert!(generator.next_id().is_ok());
        assert!(matches!(
            generator.next_id(),
            Err(IdError::Generation { .. })
        ));
    }
}
