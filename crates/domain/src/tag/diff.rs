//! Byte-level change detection shared by the read and write paths.

use std::ops::Range;

/// Minimal `[start, end)` span covering every byte that differs between
/// `old` and `new`. Both slices must have the same length.
pub fn dirty_span(old: &[u8], new: &[u8]) -> Option<Range<usize>> {
    debug_assert_eq!(old.len(), new.len());
    let start = old.iter().zip(new).position(|(a, b)| a != b)?;
    let end = old
        .iter()
        .zip(new)
        .rposition(|(a, b)| a != b)
        .map_or(start + 1, |last| last + 1);
    Some(start..end)
}

/// Splits the differences between a pending write buffer and the last
/// written snapshot into spans, one per driver write call.
///
/// With `optimize` set and a non-zero `budget`, a span keeps absorbing
/// differing bytes (and the unchanged bytes between them) as long as the
/// span stays within `budget` bytes; otherwise a new span starts at the
/// differing byte. Without optimization a single span covers the whole
/// touched region.
pub fn write_spans(pending: &[u8], written: &[u8], budget: usize, optimize: bool) -> Vec<Range<usize>> {
    debug_assert_eq!(pending.len(), written.len());
    let bounded = optimize && budget > 0;
    let mut spans = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for (i, (p, w)) in pending.iter().zip(written).enumerate() {
        if p == w {
            continue;
        }
        match current.as_mut() {
            Some(span) if !bounded || i + 1 - span.start <= budget => span.end = i + 1,
            _ => {
                if let Some(span) = current.take() {
                    spans.push(span);
                }
                current = Some(i..i + 1);
            }
        }
    }

    if let Some(span) = current {
        spans.push(span);
    }
    spans
}

/// Smallest range covering both inputs. Empty ranges are ignored.
pub fn union(a: &Range<usize>, b: &Range<usize>) -> Range<usize> {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.clone(),
        (_, true) => a.clone(),
        _ => a.start.min(b.start)..a.end.max(b.end),
    }
}
