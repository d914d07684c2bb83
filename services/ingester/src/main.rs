//! Zonal statistics ingester.
//!
//! Evaluates mean zonal reductions over a remote feature collection,
//! optionally uploads the reduced payload to the bucket, then ingests the
//! bucket payloads into the relational catalog.

mod config;

use anyhow::Result;
use chrono::{Datelike, Duration, Utc};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use compute::{materialize_reduced, monthly_bands, HttpReduceClient, ReduceRequest};
use ingestion::bucket_cli::{delete_local_file, BucketCli};
use ingestion::{BucketSource, IngestSpec, IngestionPipeline, RetryPolicy};
use storage::Catalog;
use zonal_common::{FeatureCollection, Statics};

use config::IngesterConfig;

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Zonal statistics ingester for timeseries services")]
struct Args {
    /// Image asset to evaluate
    #[arg(short = 'a', long = "asset-id", required = true)]
    asset_id: String,

    /// Remote feature collection to reduce over
    #[arg(short = 'f', long = "feature-collection-id", required = true)]
    feature_collection_id: String,

    /// Year to process (default: last calendar year)
    #[arg(short, long)]
    year: Option<i32>,

    /// Variables to evaluate
    #[arg(short, long, num_args = 1.., default_values_t = default_variables())]
    variables: Vec<String>,

    /// Dataset the observations belong to
    #[arg(short, long, default_value = "ssebop")]
    dataset: String,

    /// Owner of the ingested geometries
    #[arg(long, default_value_t = 0)]
    user_id: i32,

    /// Skip evaluation and ingest existing bucket payloads only
    #[arg(long)]
    skip_compute: bool,

    /// Upload the reduced payload to this bucket destination before ingesting
    #[arg(long)]
    upload_dest: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn default_variables() -> Vec<String> {
    ["et", "etr", "etf", "ndvi", "count"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting zonal statistics ingester");

    let config = IngesterConfig::from_env()?;
    let statics = match &config.statics_file {
        Some(path) => Statics::from_yaml_file(path)?,
        None => Statics::builtin(),
    };

    let year = args
        .year
        .unwrap_or_else(|| (Utc::now() - Duration::days(365)).year());

    // The feature collection must be configured; its region drives naming.
    let region = statics
        .region_for_collection(&args.feature_collection_id)?
        .to_string();
    info!(region = %region, year = year, "Resolved feature collection");

    if !args.skip_compute {
        run_compute(&config, &args, &region, year).await?;
    }

    let catalog = Catalog::connect(&config.database_url).await?;
    catalog.migrate().await?;

    let source = BucketSource::new(
        &config.geo_bucket_url,
        &config.data_bucket_url,
        &statics,
        RetryPolicy::default(),
    )?;

    let pipeline = IngestionPipeline::new(catalog, statics);
    let spec = IngestSpec {
        region,
        dataset: args.dataset.clone(),
        year,
        user_id: args.user_id,
    };

    let summary = pipeline.run(&source, &spec).await?;
    info!(
        ingested = summary.features_ingested,
        skipped = summary.features_skipped,
        data_rows = summary.data_rows,
        "Ingester finished"
    );

    Ok(())
}

/// Evaluate every requested variable, merge the reduced collections into a
/// single payload keyed by feature index, and optionally upload it.
async fn run_compute(
    config: &IngesterConfig,
    args: &Args,
    region: &str,
    year: i32,
) -> Result<()> {
    let client = HttpReduceClient::new(&config.compute_url)?;

    let mut merged: Option<FeatureCollection> = None;
    for variable in &args.variables {
        info!(variable = %variable, year = year, "Computing zonal statistics");

        let bands = monthly_bands(variable, year)?;
        let request = ReduceRequest::mean(&args.asset_id, &args.feature_collection_id, bands);
        let collection = materialize_reduced(&client, &request).await?;
        info!(
            variable = %variable,
            features = collection.len(),
            "Reduced collection materialized"
        );

        merged = Some(match merged {
            None => collection,
            Some(mut acc) => {
                for (feature, extra) in acc.features.iter_mut().zip(collection.features) {
                    feature.properties.extend(extra.properties);
                }
                acc
            }
        });
    }

    if let (Some(collection), Some(dest)) = (&merged, &args.upload_dest) {
        upload_payload(config, collection, region, year, dest).await?;
    }

    Ok(())
}

/// Write the reduced payload to a local staging file and push it to the
/// bucket with the CLI client.
async fn upload_payload(
    config: &IngesterConfig,
    collection: &FeatureCollection,
    region: &str,
    year: i32,
    dest: &str,
) -> Result<()> {
    let file_name = format!("{}_{}_DATA.json", region, year);
    let local_path = std::env::temp_dir().join(&file_name);
    tokio::fs::write(&local_path, serde_json::to_vec(collection)?).await?;

    let quiet = !tracing::enabled!(Level::DEBUG);
    let bucket = BucketCli::new(&config.bucket_cli, quiet);
    let dest_path = format!("{}/{}", dest.trim_end_matches('/'), file_name);
    bucket.copy(&local_path, &dest_path).await?;

    delete_local_file(&local_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_variables() {
        assert_eq!(default_variables(), vec!["et", "etr", "etf", "ndvi", "count"]);
    }

    #[test]
    fn test_args_parse_minimal() {
        let args = Args::parse_from([
            "ingester",
            "--asset-id",
            "projects/zonal/et/monthly",
            "--feature-collection-id",
            "users/zonal/mason_valley_fields",
        ]);
        assert!(args.year.is_none());
        assert_eq!(args.dataset, "ssebop");
        assert_eq!(args.variables.len(), 5);
        assert!(!args.skip_compute);
    }
}
