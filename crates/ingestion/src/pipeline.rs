//! Bulk ingestion pipeline.
//!
//! Reconciles (geometry, time-series) payload pairs against the catalog:
//! reference tables are populated on a fresh database, geometry rows are
//! written one atomic insert-if-absent at a time to obtain generated ids,
//! and metadata/observation rows for the whole run are staged into two
//! delimited files and bulk-copied in one operation per table.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use storage::{Catalog, NewGeom};
use zonal_common::geojson::multi_polygon_geojson;
use zonal_common::time::{date_for_subperiod, TemporalResolution};
use zonal_common::{geom_name, Statics, ZonalError, ZonalResult};

use crate::sources::PayloadSource;

/// Reserved marker for "value not available", distinct from a measured zero.
pub const MISSING_VALUE: f64 = -9999.0;

const ALL_RESOLUTIONS: [TemporalResolution; 3] = [
    TemporalResolution::Annual,
    TemporalResolution::Seasonal,
    TemporalResolution::Monthly,
];

/// One ingestion run: a (region, dataset, year) payload pair for one user.
#[derive(Debug, Clone)]
pub struct IngestSpec {
    pub region: String,
    pub dataset: String,
    pub year: i32,
    pub user_id: i32,
}

/// Counts reported by a completed run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestSummary {
    pub features_ingested: usize,
    pub features_skipped: usize,
    pub metadata_rows: usize,
    pub data_rows: usize,
}

/// Main ingestion pipeline.
pub struct IngestionPipeline {
    catalog: Catalog,
    statics: Statics,
}

impl IngestionPipeline {
    pub fn new(catalog: Catalog, statics: Statics) -> Self {
        Self { catalog, statics }
    }

    /// Ingest one (region, dataset, year) payload pair.
    #[instrument(skip(self, source), fields(region = %spec.region, dataset = %spec.dataset, year = spec.year))]
    pub async fn run(
        &self,
        source: &dyn PayloadSource,
        spec: &IngestSpec,
    ) -> ZonalResult<IngestSummary> {
        let timeseries = source
            .fetch_timeseries(&spec.region, &spec.dataset, spec.year)
            .await?;
        let geometries = source.fetch_geometry(&spec.region, spec.year).await?;

        if geometries.len() < timeseries.len() {
            return Err(ZonalError::InternalError(format!(
                "geometry payload has {} features but time series has {}",
                geometries.len(),
                timeseries.len()
            )));
        }

        let region_id = self.statics.region_id(&spec.region)?;
        let dataset = self.statics.dataset(&spec.dataset)?;
        let metadata_fields = &self.statics.region(&spec.region)?.metadata_fields;

        // Fresh database: reference tables come first, in dependency order.
        if !self.catalog.has_data().await? {
            info!("Database empty, populating reference tables");
            self.catalog.populate_reference_tables(&self.statics).await?;
        }

        let mut meta_file = NamedTempFile::new()?;
        let mut data_file = NamedTempFile::new()?;
        let mut summary = IngestSummary::default();

        {
            let mut meta_writer = csv::Writer::from_writer(meta_file.as_file_mut());
            let mut data_writer = csv::Writer::from_writer(data_file.as_file_mut());

            for (index, ts_feature) in timeseries.features.iter().enumerate() {
                let name = geom_name(&spec.region, index);
                let geo_feature = &geometries.features[index];

                let geometry = geo_feature.geometry.clone().ok_or_else(|| {
                    ZonalError::InvalidGeometry(format!("feature {} has no geometry", index))
                })?;
                let geom_type = geometry.type_name().to_string();
                let coords_geojson = multi_polygon_geojson(&geometry.into_multi_polygon()?)?;

                let new_geom = NewGeom {
                    user_id: spec.user_id,
                    region_id,
                    name: name.clone(),
                    geom_type,
                    coords_geojson,
                };

                // Atomic insert-if-absent; None means already ingested.
                let geom_id = match self.catalog.insert_geom_if_absent(&new_geom).await? {
                    Some(id) => id,
                    None => {
                        debug!(name = %name, "Feature already ingested, skipping");
                        summary.features_skipped += 1;
                        continue;
                    }
                };
                info!(name = %name, geom_id = geom_id, "Added geometry row");

                let (meta_rows, data_rows) = feature_rows(
                    geom_id,
                    dataset,
                    &self.statics,
                    metadata_fields,
                    spec.year,
                    &geo_feature.properties,
                    &ts_feature.properties,
                )?;

                for row in &meta_rows {
                    meta_writer
                        .write_record([
                            row.geom_id.to_string(),
                            row.name.clone(),
                            row.value.clone(),
                        ])
                        .map_err(stage_err)?;
                }
                for row in &data_rows {
                    data_writer
                        .write_record([
                            row.geom_id.to_string(),
                            row.dataset_id.to_string(),
                            row.variable_id.to_string(),
                            row.temporal_resolution.as_str().to_string(),
                            row.data_date.format("%Y-%m-%d").to_string(),
                            format!("{:.4}", row.data_value),
                        ])
                        .map_err(stage_err)?;
                }

                summary.metadata_rows += meta_rows.len();
                summary.data_rows += data_rows.len();
                summary.features_ingested += 1;
            }

            meta_writer.flush().map_err(|e| stage_err(e.into()))?;
            data_writer.flush().map_err(|e| stage_err(e.into()))?;
        }

        // One bulk COPY per table for the whole run.
        if summary.features_ingested > 0 {
            let meta_csv = tokio::fs::read(meta_file.path()).await?;
            let loaded = self.catalog.copy_geom_metadata(&meta_csv).await?;
            info!(rows = loaded, "Added geometry metadata rows");

            let data_csv = tokio::fs::read(data_file.path()).await?;
            let loaded = self.catalog.copy_data(&data_csv).await?;
            info!(rows = loaded, "Added observation rows");
        }

        // Staging files must never block the run; log removal failures.
        if let Err(e) = meta_file.close() {
            warn!(error = %e, "Failed to remove metadata staging file");
        }
        if let Err(e) = data_file.close() {
            warn!(error = %e, "Failed to remove data staging file");
        }

        info!(
            ingested = summary.features_ingested,
            skipped = summary.features_skipped,
            metadata_rows = summary.metadata_rows,
            data_rows = summary.data_rows,
            "Ingestion run complete"
        );

        Ok(summary)
    }
}

/// One staged `geom_metadata` row.
#[derive(Debug, Clone, PartialEq)]
struct MetadataStageRow {
    geom_id: i64,
    name: String,
    value: String,
}

/// One staged `data` row.
#[derive(Debug, Clone, PartialEq)]
struct DataStageRow {
    geom_id: i64,
    dataset_id: i32,
    variable_id: i32,
    temporal_resolution: TemporalResolution,
    data_date: NaiveDate,
    data_value: f64,
}

/// Build the staged metadata and observation rows for one new geometry.
fn feature_rows(
    geom_id: i64,
    dataset: &zonal_common::statics::DatasetInfo,
    statics: &Statics,
    metadata_fields: &[String],
    year: i32,
    geo_props: &Map<String, Value>,
    ts_props: &Map<String, Value>,
) -> ZonalResult<(Vec<MetadataStageRow>, Vec<DataStageRow>)> {
    let mut meta_rows = Vec::with_capacity(metadata_fields.len());
    for key in metadata_fields {
        meta_rows.push(MetadataStageRow {
            geom_id,
            name: key.clone(),
            value: metadata_value(geo_props, ts_props, key),
        });
    }

    let mut data_rows = Vec::new();
    for variable in &dataset.variables {
        let variable_id = statics.variable_id(variable)?;
        for resolution in ALL_RESOLUTIONS {
            for subperiod in Statics::subperiod_keys(resolution) {
                data_rows.push(DataStageRow {
                    geom_id,
                    dataset_id: dataset.id,
                    variable_id,
                    temporal_resolution: resolution,
                    data_date: date_for_subperiod(year, resolution, &subperiod)?,
                    data_value: observation_value(ts_props, variable, &subperiod),
                });
            }
        }
    }

    Ok((meta_rows, data_rows))
}

/// Metadata attribute value: geometry properties first, then time-series
/// properties, then the literal "Not Found".
fn metadata_value(
    geo_props: &Map<String, Value>,
    ts_props: &Map<String, Value>,
    key: &str,
) -> String {
    for props in [geo_props, ts_props] {
        match props.get(key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return s.clone(),
            Some(other) => return other.to_string(),
        }
    }
    "Not Found".to_string()
}

/// Observation value for `<variable>_<subperiod>`, rounded to 4 decimals;
/// absent or non-numeric properties become the missing-value sentinel.
fn observation_value(props: &Map<String, Value>, variable: &str, subperiod: &str) -> f64 {
    let key = format!("{}_{}", variable, subperiod);
    let parsed = match props.get(&key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(value) => round4(value),
        None => MISSING_VALUE,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn stage_err(e: csv::Error) -> ZonalError {
    ZonalError::InternalError(format!("staging write: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_metadata_value_fallback_chain() {
        let geo = props(&[("ACRES", json!(12.5)), ("NULLED", Value::Null)]);
        let ts = props(&[("CROP_TYPE", json!("alfalfa")), ("NULLED", json!("present"))]);

        // geometry payload wins
        assert_eq!(metadata_value(&geo, &ts, "ACRES"), "12.5");
        // falls back to the time-series payload
        assert_eq!(metadata_value(&geo, &ts, "CROP_TYPE"), "alfalfa");
        // null counts as absent
        assert_eq!(metadata_value(&geo, &ts, "NULLED"), "present");
        // absent everywhere
        assert_eq!(metadata_value(&geo, &ts, "OBJECTID"), "Not Found");
    }

    #[test]
    fn test_observation_value_rounding_and_sentinel() {
        let ts = props(&[
            ("et_m06", json!(101.23456)),
            ("et_m07", json!("88.5")),
            ("et_m08", json!("n/a")),
        ]);

        assert_eq!(observation_value(&ts, "et", "m06"), 101.2346);
        assert_eq!(observation_value(&ts, "et", "m07"), 88.5);
        assert_eq!(observation_value(&ts, "et", "m08"), MISSING_VALUE);
        assert_eq!(observation_value(&ts, "et", "m09"), MISSING_VALUE);
    }

    #[test]
    fn test_feature_rows_shape() {
        let statics = Statics::builtin();
        let dataset = statics.dataset("ssebop").unwrap();
        let fields = vec!["ACRES".to_string(), "OBJECTID".to_string()];
        let geo = props(&[("ACRES", json!(3.25))]);
        let ts = props(&[("et_m06", json!(101.23))]);

        let (meta_rows, data_rows) =
            feature_rows(7, dataset, &statics, &fields, 2017, &geo, &ts).unwrap();

        assert_eq!(meta_rows.len(), 2);
        assert_eq!(meta_rows[0].value, "3.25");
        assert_eq!(meta_rows[1].value, "Not Found");

        // 5 variables x (1 annual + 1 seasonal + 12 monthly) cells
        assert_eq!(data_rows.len(), 5 * 14);

        let june = data_rows
            .iter()
            .find(|r| {
                r.temporal_resolution == TemporalResolution::Monthly
                    && r.data_date == NaiveDate::from_ymd_opt(2017, 6, 30).unwrap()
                    && r.variable_id == statics.variable_id("et").unwrap()
            })
            .unwrap();
        assert_eq!(june.data_value, 101.23);

        // everything without a source property carries the sentinel
        let missing = data_rows
            .iter()
            .filter(|r| r.data_value == MISSING_VALUE)
            .count();
        assert_eq!(missing, data_rows.len() - 1);
    }

    #[test]
    fn test_annual_and_seasonal_dates() {
        let statics = Statics::builtin();
        let dataset = statics.dataset("gridmet").unwrap();
        let ts = props(&[("etr_annual", json!(1500.0)), ("etr_seasonal", json!(900.0))]);

        let (_, data_rows) =
            feature_rows(1, dataset, &statics, &[], 2017, &Map::new(), &ts).unwrap();

        // gridmet carries one variable: 14 cells
        assert_eq!(data_rows.len(), 14);

        let annual = data_rows
            .iter()
            .find(|r| r.temporal_resolution == TemporalResolution::Annual)
            .unwrap();
        assert_eq!(annual.data_date.to_string(), "2017-12-31");
        assert_eq!(annual.data_value, 1500.0);

        let seasonal = data_rows
            .iter()
            .find(|r| r.temporal_resolution == TemporalResolution::Seasonal)
            .unwrap();
        assert_eq!(seasonal.data_date.to_string(), "2017-10-31");
        assert_eq!(seasonal.data_value, 900.0);
    }
}
