//! Chain cursor and the tick state machine.
//!
//! The cursor is the persisted pointer to the last fully applied block. A tick
//! moves through [`TickPhase`]s:
//!
//! ```text
//! IDLE → FETCHING → APPLYING → IDLE      (happy path)
//! IDLE → FETCHING → ERROR → IDLE         (fetch failure)
//! IDLE → FETCHING → APPLYING → ERROR → IDLE
//! ```
//!
//! The cursor only advances when a whole range has been committed, so a failed
//! tick is redelivered from `last_processed_block + 1` on the next one.
//!
//! ## Example
//!
//! ```
//! use pm_event_indexer::cursor::Cursor;
//!
//! let cursor = Cursor::new(100);
//! assert_eq!(cursor.pending_range(105, 3), Some(101..=103));
//! assert_eq!(cursor.pending_range(100, 3), None);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

use crate::db::models::{from_sql_int, CursorRecord};
use crate::error::{IndexerError, IndexerResult};

/// Persisted indexing position. One per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cursor {
    /// Last block whose events are durably applied
    pub last_processed_block: u64,
    /// First block of the most recent failed tick
    pub last_error_block: Option<u64>,
    /// Maintenance lock; ticks are skipped while set
    pub locked: bool,
}

impl Cursor {
    /// Unlocked cursor positioned at `last_processed_block`.
    #[must_use]
    pub const fn new(last_processed_block: u64) -> Self {
        Self {
            last_processed_block,
            last_error_block: None,
            locked: false,
        }
    }

    /// Blocks to process for the given head, capped at `max_blocks`.
    ///
    /// Returns `None` when the cursor is already at or beyond the head.
    #[must_use]
    pub fn pending_range(&self, head: u64, max_blocks: u64) -> Option<RangeInclusive<u64>> {
        if head <= self.last_processed_block || max_blocks == 0 {
            return None;
        }
        let from = self.last_processed_block + 1;
        let to = head.min(self.last_processed_block.saturating_add(max_blocks));
        Some(from..=to)
    }
}

impl From<CursorRecord> for Cursor {
    fn from(record: CursorRecord) -> Self {
        Self {
            last_processed_block: from_sql_int(record.last_processed_block),
            last_error_block: record.last_error_block.map(from_sql_int),
            locked: record.locked,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}", self.last_processed_block)?;
        if let Some(error_block) = self.last_error_block {
            write!(f, " (last error at {error_block})")?;
        }
        if self.locked {
            write!(f, " [locked]")?;
        }
        Ok(())
    }
}

/// Phase of the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TickPhase {
    /// Waiting for the next tick
    #[default]
    Idle,
    /// Reading the head, blocks and receipts from the node
    Fetching,
    /// Decoding and applying events inside the tick transaction
    Applying,
    /// The tick failed; the error block has been recorded
    Error,
}

impl TickPhase {
    /// Whether `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Fetching)
                | (Self::Fetching, Self::Applying | Self::Error | Self::Idle)
                | (Self::Applying, Self::Idle | Self::Error)
                | (Self::Error, Self::Idle)
        )
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns a state error on an illegal transition.
    pub fn transition(&mut self, next: Self) -> IndexerResult<()> {
        if !self.can_transition_to(next) {
            return Err(IndexerError::state(
                format!("Illegal tick transition {self} -> {next}"),
                None,
            ));
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for TickPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Fetching => "FETCHING",
            Self::Applying => "APPLYING",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_range_is_capped() {
        let cursor = Cursor::new(10);
        assert_eq!(cursor.pending_range(1000, 100), Some(11..=110));
        assert_eq!(cursor.pending_range(12, 100), Some(11..=12));
    }

    #[test]
    fn test_no_range_when_caught_up() {
        let cursor = Cursor::new(10);
        assert_eq!(cursor.pending_range(10, 100), None);
        assert_eq!(cursor.pending_range(9, 100), None);
        assert_eq!(cursor.pending_range(20, 0), None);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut phase = TickPhase::default();
        phase.transition(TickPhase::Fetching).unwrap();
        phase.transition(TickPhase::Applying).unwrap();
        phase.transition(TickPhase::Idle).unwrap();
        assert_eq!(phase, TickPhase::Idle);
    }

    #[test]
    fn test_error_path_transitions() {
        let mut phase = TickPhase::Idle;
        phase.transition(TickPhase::Fetching).unwrap();
        phase.transition(TickPhase::Error).unwrap();
        assert!(phase.transition(TickPhase::Applying).is_err());
        phase.transition(TickPhase::Idle).unwrap();
    }

    #[test]
    fn test_idle_cannot_apply_directly() {
        let mut phase = TickPhase::Idle;
        assert!(phase.transition(TickPhase::Applying).is_err());
        assert_eq!(phase, TickPhase::Idle);
    }

    #[test]
    fn test_display() {
        let cursor = Cursor {
            last_processed_block: 5,
            last_error_block: Some(6),
            locked: true,
        };
        assert_eq!(cursor.to_string(), "block 5 (last error at 6) [locked]");
    }
}
