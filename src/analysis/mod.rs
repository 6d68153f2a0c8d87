// src/analysis/mod.rs
//
// Per-frame analysis stages.
//
// Signal flow:
//   gray frames   → ego_speed ──→ ROI scale
//   tracked boxes → risk (zone, dwell, score, level) → warning → alert keys

pub mod ego_speed;
pub mod risk;
pub mod warning;
