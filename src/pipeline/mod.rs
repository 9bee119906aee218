// Roster enrichment pipeline: orchestration and the processing stages it runs

pub mod orchestrator;
pub mod processing;

pub use orchestrator::{PipelineInputs, PipelineOrchestrator, PipelineStage, PipelineSummary};
