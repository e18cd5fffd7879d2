use crate::timerange::TimeWindow;
use chrono::Duration;

/// One bounded sub-range of the overall search window.
///
/// Batches are contiguous and non-overlapping; their union is exactly the
/// planned window. `index` is the batch's position in the plan and forms
/// half of a task's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub window: TimeWindow,
    pub index: usize,
}

/// Split a window into ordered batches of at most `batch_duration` each.
///
/// Pure and deterministic: identical inputs always yield the identical
/// sequence. The final batch is shorter when the window is not an exact
/// multiple of `batch_duration`. Callers validate that `batch_duration`
/// is positive before planning.
pub fn plan_batches(window: &TimeWindow, batch_duration: Duration) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut cursor = window.start;
    let mut index = 0;

    while cursor < window.end {
        let end = match cursor.checked_add_signed(batch_duration) {
            Some(t) => std::cmp::min(t, window.end),
            None => window.end,
        };
        batches.push(Batch {
            window: TimeWindow { start: cursor, end },
            index,
        });
        cursor = end;
        index += 1;
    }

    batches
}
