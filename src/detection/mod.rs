// src/detection/mod.rs

pub mod edges;
pub mod lane_estimator;
pub mod lane_smoother;
pub mod segments;

pub use edges::to_gray;
pub use lane_estimator::{LaneEstimate, LaneGeometryEstimator};
