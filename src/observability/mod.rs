// Observability: metrics for the pipeline run

pub mod metrics;
