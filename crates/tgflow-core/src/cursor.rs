//! Offset tracking for update retrieval.

use crate::error::InvalidCursorError;

/// The last update identifier handed off to dispatch.
///
/// The platform treats an update as confirmed once a retrieval call asks for
/// identifiers after it, so the cursor only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetCursor {
    current: Option<i64>,
}

impl OffsetCursor {
    /// Creates an unset cursor.
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// Creates a cursor resuming after a previously acknowledged identifier.
    pub const fn starting_at(update_id: i64) -> Self {
        Self {
            current: Some(update_id),
        }
    }

    /// Returns the last acknowledged identifier.
    pub fn current(&self) -> Option<i64> {
        self.current
    }

    /// Moves the cursor to `update_id`.
    ///
    /// Fails without changing state if that would move it backwards.
    pub fn advance_to(&mut self, update_id: i64) -> Result<(), InvalidCursorError> {
        if let Some(current) = self.current
            && update_id < current
        {
            return Err(InvalidCursorError {
                current,
                requested: update_id,
            });
        }
        self.current = Some(update_id);
        Ok(())
    }

    /// Returns the first identifier the next retrieval should ask for.
    ///
    /// `None` means no constraint.
    pub fn next_poll_start(&self) -> Option<i64> {
        self.current.map(|id| id.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_cursor() {
        let cursor = OffsetCursor::new();
        assert_eq!(cursor.current(), None);
        assert_eq!(cursor.next_poll_start(), None);
    }

    #[test]
    fn test_advance() {
        let mut cursor = OffsetCursor::new();
        cursor.advance_to(10).unwrap();
        assert_eq!(cursor.current(), Some(10));
        assert_eq!(cursor.next_poll_start(), Some(11));

        // Re-acknowledging the same identifier is allowed.
        cursor.advance_to(10).unwrap();
        assert_eq!(cursor.next_poll_start(), Some(11));
    }

    #[test]
    fn test_regression_rejected() {
        let mut cursor = OffsetCursor::starting_at(42);
        let err = cursor.advance_to(41).unwrap_err();
        assert_eq!(
            err,
            InvalidCursorError {
                current: 42,
                requested: 41
            }
        );
        assert_eq!(cursor.current(), Some(42));
    }

    #[test]
    fn test_monotonic_over_sequences() {
        let sequences: [&[i64]; 4] = [
            &[1, 2, 3],
            &[5, 3, 9, 9, 2, 10],
            &[-5, -1, 0],
            &[i64::MAX - 1, 7, i64::MAX],
        ];

        for ids in sequences {
            let mut cursor = OffsetCursor::new();
            let mut previous = None;
            for &id in ids {
                let _ = cursor.advance_to(id);
                assert!(cursor.current() >= previous);
                previous = cursor.current();
            }
        }
    }

    #[test]
    fn test_next_start_saturates() {
        let cursor = OffsetCursor::starting_at(i64::MAX);
        assert_eq!(cursor.next_poll_start(), Some(i64::MAX));
    }
}
