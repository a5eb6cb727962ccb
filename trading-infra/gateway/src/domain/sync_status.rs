/// Synchronization state of one reconciled order book
/// Domain concept representing the priming state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    /// No snapshot yet, updates are buffered
    Unprimed,
    /// Snapshot requested, updates are buffered
    Priming,
    /// Snapshot applied, updates applied in sequence
    Primed,
    /// Sequence discontinuity detected, re-priming is pending
    Gapped,
}

impl BookState {
    /// Whether readers see a book that tracks the venue
    pub fn is_ready(&self) -> bool {
        matches!(self, BookState::Primed)
    }

    /// Whether incoming updates go to the buffer instead of the book
    pub fn is_buffering(&self) -> bool {
        !self.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_state_ready() {
        assert!(!BookState::Unprimed.is_ready());
        assert!(!BookState::Priming.is_ready());
        assert!(BookState::Primed.is_ready());
        assert!(!BookState::Gapped.is_ready());
    }

    #[test]
    fn test_book_state_buffering() {
        assert!(BookState::Unprimed.is_buffering());
        assert!(BookState::Priming.is_buffering());
        assert!(!BookState::Primed.is_buffering());
        assert!(BookState::Gapped.is_buffering());
    }
}
