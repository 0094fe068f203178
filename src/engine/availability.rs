use crate::model::*;

// ── Free windows ─────────────────────────────────────────────────

/// The parts of `window` not covered by any of `booked`.
/// `booked` may be unsorted and may overlap or stick out of the window.
pub fn free_spans(window: &Span, booked: &[Span]) -> Vec<Span> {
    let mut clipped: Vec<Span> = booked
        .iter()
        .filter(|b| b.overlaps(window))
        .map(|b| Span::new(b.start.max(window.start), b.end.min(window.end)))
        .collect();
    clipped.sort_by_key(|s| s.start);
    subtract_intervals(&[*window], &merge_overlapping(&clipped))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` from sorted, disjoint `base`.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Span::new(current_start, b.end));
        }
    }

    result
}
