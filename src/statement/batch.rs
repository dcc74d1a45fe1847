//! Packet-size-aware batch planning

use std::ops::Range;

/// Outcome of a batch execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Affected rows summed over every chunk
    pub affected_rows: u64,
    /// Commands sent
    pub chunks: usize,
    /// Parameter sets executed
    pub rows: usize,
}

/// Rows per chunk for rows of at most `max_row` bytes
///
/// `overhead` is the fixed cost of one command (opcode, statement id and
/// flags); `max_packet` is the session's
/// `max_allowed_packet`. The whole batch goes in one chunk when
/// `total_size` fits; otherwise as many rows as fit, never fewer than one.
pub fn chunk_rows(
    total_rows: usize,
    total_size: usize,
    max_row: usize,
    overhead: usize,
    max_packet: usize,
) -> usize {
    if total_rows == 0 {
        return 0;
    }
    let budget = max_packet.saturating_sub(overhead);
    if total_size <= budget || max_row == 0 {
        return total_rows;
    }
    (budget / max_row).clamp(1, total_rows)
}

/// Split `row_sizes.len()` rows into consecutive chunks
///
/// A row of unknown size (a stream without declared length) forces one row
/// per chunk for the whole batch.
pub fn plan(row_sizes: &[Option<usize>], overhead: usize, max_packet: usize) -> Vec<Range<usize>> {
    let total_rows = row_sizes.len();
    let per_chunk = if row_sizes.iter().any(Option::is_none) {
        1.min(total_rows)
    } else {
        let sizes = row_sizes.iter().flatten();
        let total_size = sizes.clone().fold(0usize, |acc, s| acc.saturating_add(*s));
        let max_row = sizes.copied().max().unwrap_or(0);
        chunk_rows(total_rows, total_size, max_row, overhead, max_packet)
    };
    if per_chunk == 0 {
        return Vec::new();
    }
    (0..total_rows)
        .step_by(per_chunk)
        .map(|start| start..(start + per_chunk).min(total_rows))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_whole_batch_when_it_fits() {
        let sizes = vec![Some(10); 5];
        assert_eq!(plan(&sizes, 8, 100), vec![0..5]);
    }

    #[test]
    fn test_split_by_max_row() {
        let sizes = vec![Some(10), Some(30), Some(10), Some(10)];
        // budget 92, max row 30 -> 3 per chunk
        assert_eq!(plan(&sizes, 8, 100), vec![0..3, 3..4]);
    }

    #[test]
    fn test_floor_of_one_row() {
        let sizes = vec![Some(500), Some(500)];
        assert_eq!(plan(&sizes, 8, 100), vec![0..1, 1..2]);
    }

    #[test]
    fn test_unknown_size_forces_single_rows() {
        let sizes = vec![Some(1), None, Some(1)];
        assert_eq!(plan(&sizes, 0, 1 << 20), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_empty_batch() {
        assert!(plan(&[], 10, 100).is_empty());
        assert_eq!(chunk_rows(0, 0, 0, 0, 100), 0);
    }

    proptest! {
        #[test]
        fn prop_chunks_fit_and_cover(
            n in 1usize..500,
            row in 1usize..2_000,
            overhead in 0usize..512,
            extra in 0usize..100_000,
        ) {
            let max_packet = overhead + row + extra;
            let sizes = vec![Some(row); n];
            let chunks = plan(&sizes, overhead, max_packet);

            let c = chunks[0].len();
            prop_assert!(c >= 1);
            prop_assert!(c * row <= max_packet - overhead);
            prop_assert_eq!(chunks.len(), (n + c - 1) / c);

            let mut next = 0;
            for chunk in &chunks {
                prop_assert_eq!(chunk.start, next);
                prop_assert!(chunk.end > chunk.start);
                next = chunk.end;
            }
            prop_assert_eq!(next, n);
        }
    }
}
