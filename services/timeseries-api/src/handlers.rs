//! HTTP handlers for the timeseries query API.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::instrument;

use storage::{DataFilter, DataRecord, GeomRecord};
use zonal_common::time::{dates_for_query, parse_subperiod_month, TemporalResolution};
use zonal_common::{geom_name, ZonalError, ZonalResult};

use crate::state::AppState;

/// Owner id for shared region geometries.
const DEFAULT_USER_ID: i32 = 0;

/// Error wrapper mapping [`ZonalError`] onto HTTP responses.
pub struct ApiError(ZonalError);

impl From<ZonalError> for ApiError {
    fn from(err: ZonalError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Filter specification for the timeseries query.
#[derive(Debug, Deserialize)]
pub struct TimeseriesParams {
    pub region: String,
    pub dataset: String,
    pub variable: String,
    pub temporal_resolution: String,
    pub year: i32,
    /// Comma-separated month numbers, or "all" (monthly resolution only).
    pub months: Option<String>,
    /// Comma-separated feature indices, or "all".
    #[serde(default = "default_features")]
    pub features: String,
}

fn default_features() -> String {
    "all".to_string()
}

/// `GET /api/v1/timeseries` — flat observation records for a filter.
#[instrument(skip(state, params), fields(region = %params.region, dataset = %params.dataset))]
pub async fn timeseries_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<TimeseriesParams>,
) -> Result<Json<Vec<DataRecord>>, ApiError> {
    let region_id = state.statics.region_id(&params.region)?;
    let dataset_id = state.statics.dataset_id(&params.dataset)?;
    let variable_id = state.statics.variable_id(&params.variable)?;
    let resolution: TemporalResolution = params.temporal_resolution.parse()?;

    let months = parse_months(params.months.as_deref())?;
    let dates = dates_for_query(params.year, resolution, months.as_deref())?;

    let names = parse_features(&params.region, &params.features)?;
    let geom_ids = state
        .catalog
        .geom_ids(region_id, DEFAULT_USER_ID, names.as_deref())
        .await?;

    let records = state
        .catalog
        .query_data(&DataFilter {
            geom_ids,
            dataset_id,
            variable_id,
            temporal_resolution: resolution.as_str().to_string(),
            dates,
        })
        .await?;

    Ok(Json(records))
}

/// `GET /api/v1/geoms/:name` — geometry rows with GeoJSON coordinates.
#[instrument(skip(state))]
pub async fn geom_by_name_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<GeomRecord>>, ApiError> {
    let records = state.catalog.geoms_by_name(&name).await?;
    Ok(Json(records))
}

/// `GET /health`
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "timeseries-api",
    }))
}

/// Parse the month selection. `None` or `"all"` selects every month.
fn parse_months(months: Option<&str>) -> ZonalResult<Option<Vec<u32>>> {
    match months {
        None => Ok(None),
        Some(s) if s.trim().eq_ignore_ascii_case("all") => Ok(None),
        Some(s) => {
            let parsed = s
                .split(',')
                .map(|m| parse_subperiod_month(m.trim()))
                .collect::<ZonalResult<Vec<_>>>()?;
            Ok(Some(parsed))
        }
    }
}

/// Resolve the feature selection into geometry names. `"all"` means every
/// geometry of the region.
fn parse_features(region: &str, features: &str) -> ZonalResult<Option<Vec<String>>> {
    let trimmed = features.trim();
    if trimmed.eq_ignore_ascii_case("all") {
        return Ok(None);
    }

    let names = trimmed
        .split(',')
        .map(|idx| {
            let idx = idx.trim();
            idx.parse::<usize>()
                .map(|i| geom_name(region, i))
                .map_err(|_| ZonalError::InvalidParameter {
                    param: "features".to_string(),
                    message: format!("invalid feature index '{}'", idx),
                })
        })
        .collect::<ZonalResult<Vec<_>>>()?;

    Ok(Some(names))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_months() {
        assert_eq!(parse_months(None).unwrap(), None);
        assert_eq!(parse_months(Some("all")).unwrap(), None);
        assert_eq!(parse_months(Some("6")).unwrap(), Some(vec![6]));
        assert_eq!(parse_months(Some("6, 7, 8")).unwrap(), Some(vec![6, 7, 8]));
        assert!(parse_months(Some("13")).is_err());
        assert!(parse_months(Some("june")).is_err());
    }

    #[test]
    fn test_parse_features() {
        assert_eq!(parse_features("Mason", "all").unwrap(), None);
        assert_eq!(
            parse_features("Mason", "0,2").unwrap(),
            Some(vec!["Mason_0".to_string(), "Mason_2".to_string()])
        );
        assert!(parse_features("Mason", "x").is_err());
    }
}
