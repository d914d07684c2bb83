//! Bucket payload sources and bulk ingestion of zonal time series.

pub mod bucket_cli;
pub mod pipeline;
pub mod sources;

pub use bucket_cli::BucketCli;
pub use pipeline::{IngestSpec, IngestSummary, IngestionPipeline};
pub use sources::{BucketSource, PayloadSource, RetryPolicy};
