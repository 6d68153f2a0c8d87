// src/tracking.rs
//
// Boundary between the external detector/tracker and the risk core.
//
// Rows arrive as `(x1, y1, x2, y2, confidence, class, track_id, ...)`. Only
// the box and the track id are consumed. The tracker occasionally emits the
// same id twice in one frame; the first row wins.

use crate::types::BBox;
use std::collections::HashSet;
use tracing::debug;

/// Index of the persistent track id inside a tracker row.
pub const TRACK_ID_INDEX: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedDetection {
    pub track_id: u32,
    pub bbox: BBox,
}

/// `None` for malformed rows: too few fields, non-finite values, an id out
/// of range, or a box that is degenerate once clipped to the frame origin.
/// Boxes hanging off the left or top edge are clamped, not dropped.
pub fn parse_row(row: &[f32]) -> Option<TrackedDetection> {
    if row.len() <= TRACK_ID_INDEX {
        return None;
    }
    let (x1, y1, x2, y2) = (row[0], row[1], row[2], row[3]);
    let id = row[TRACK_ID_INDEX];

    let all_finite = [x1, y1, x2, y2, id].iter().all(|v| v.is_finite());
    if !all_finite || id < 0.0 || id > u32::MAX as f32 {
        return None;
    }
    let (x1, y1) = (x1.max(0.0), y1.max(0.0));
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(TrackedDetection {
        track_id: id as u32,
        bbox: BBox::new(x1, y1, x2, y2),
    })
}

/// Parse one frame's rows and drop duplicate ids, keeping first occurrences
/// in input order.
pub fn dedup_tracks<R: AsRef<[f32]>>(rows: &[R]) -> Vec<TrackedDetection> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let row = row.as_ref();
        let Some(det) = parse_row(row) else {
            debug!("Dropping malformed tracker row with {} fields", row.len());
            continue;
        };
        if seen.insert(det.track_id) {
            out.push(det);
        } else {
            debug!("Dropping duplicate row for track {}", det.track_id);
        }
    }
    out
}
