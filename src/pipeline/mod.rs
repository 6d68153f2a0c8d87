// src/pipeline/mod.rs

pub mod frame_context;
pub mod metrics;
pub mod orchestrator;

pub use frame_context::FrameOutput;
pub use orchestrator::RiskPipeline;
