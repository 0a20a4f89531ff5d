//! Sheet row arithmetic for snapshots.
//!
//! A snapshot is the sink's content read once at the start of a run. Sinks
//! number rows from 1 with a single header row, so data row `i` (0-based)
//! lives at sheet row `i + 2`.

/// Rows occupied by the header.
pub const HEADER_ROWS: usize = 1;

/// Sheet row number (1-based) of the data row at `index` (0-based).
pub fn data_row_number(index: usize) -> usize {
    index + HEADER_ROWS + 1
}

/// First sheet row after the last occupied row of a snapshot.
pub fn append_start_row(snapshot_rows: usize) -> usize {
    data_row_number(snapshot_rows)
}

/// Rows a sink must hold to take `incoming` more rows plus a safety buffer.
pub fn rows_needed(snapshot_rows: usize, incoming: usize, buffer: usize) -> usize {
    HEADER_ROWS + snapshot_rows + incoming + buffer
}

/// Capacity to request when `current` cannot hold `needed` rows.
///
/// Grows to at least double the current size, capped at `max`. Returns
/// `None` when no growth is required.
pub fn capacity_target(current: usize, needed: usize, max: usize) -> Option<usize> {
    if current >= needed {
        return None;
    }
    Some(needed.max(current.saturating_mul(2)).min(max))
}
