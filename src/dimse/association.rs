//! The per-association state machine and id sequence (section 4.1, P2/P3).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    Opening,
    Negotiating,
    Established,
    Releasing,
    Aborting,
    Closed,
}

/// A monotonically increasing counter that wraps from `u32::MAX` to `1`,
/// never yielding `0` (P3). Guarded by an atomic rather than a monitor,
/// since the only operation is fetch-and-increment.
#[derive(Clone)]
pub struct AssociationIdSequence {
    next: Arc<AtomicU32>,
}

impl Default for AssociationIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl AssociationIdSequence {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn next_id(&self) -> u32 {
        loop {
            let current = self.next.load(Ordering::SeqCst);
            let after = if current == u32::MAX { 1 } else { current + 1 };
            if self
                .next
                .compare_exchange(current, after, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return current;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_never_yields_zero() {
        let seq = AssociationIdSequence::new();
        for _ in 0..10_000 {
            assert_ne!(seq.next_id(), 0);
        }
    }

    #[test]
    fn test_sequence_wraps_from_max_to_one() {
        let seq = AssociationIdSequence {
            next: Arc::new(AtomicU32::new(u32::MAX)),
        };
        assert_eq!(seq.next_id(), u32::MAX);
        assert_eq!(seq.next_id(), 1);
    }
}
