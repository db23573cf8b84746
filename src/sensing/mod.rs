//! The scan state machine and the loop that drives it.

mod controller;
mod loop_worker;
mod orchestrator;
pub mod phash;
mod pipeline;
mod state;

pub use controller::ScanController;
pub use orchestrator::{Orchestrator, ScanComponents};
pub use phash::{hamming_distance, PerceptualHash, PerceptualHasher};
pub use pipeline::{Pipeline, PipelineConfig, PipelineOutput};
pub use state::{
    ClassificationResult, CycleReport, MaliciousDetails, Method, ScanCase, ScanEvent, ScanState,
    SkipReason, StageTimings, TickOutcome,
};
