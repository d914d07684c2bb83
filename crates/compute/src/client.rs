//! Remote evaluation client for zonal reductions.
//!
//! The compute service applies a spatial reducer over every feature of a
//! named collection against a multi-band image and returns the reduced
//! feature collection. Evaluation runs on a fixed coordinate system and
//! pixel grid; deriving them from the image's own metadata is a known
//! limitation carried over from the source system.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use zonal_common::{FeatureCollection, ZonalError, ZonalResult};

/// Coordinate reference system used for every evaluation.
pub const EVALUATION_CRS: &str = "EPSG:32610";

/// Pixel grid transform: 30 m resolution, origin offset 15 m.
pub const EVALUATION_TRANSFORM: [f64; 6] = [30.0, 0.0, 15.0, 0.0, -30.0, 15.0];

/// Spatial aggregation applied per feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    Mean,
}

/// One band of the evaluation image: a source band filtered to a date
/// range and renamed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BandSpec {
    /// Output band name, e.g. `et_m06`.
    pub name: String,
    /// Band selected from the source collection.
    pub source_band: String,
    /// Inclusive start date, `YYYY-MM-DD`.
    pub start_date: String,
    /// Exclusive end date, `YYYY-MM-DD`.
    pub end_date: String,
}

/// Contiguous numeric feature-id range `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureIdRange {
    pub start: u64,
    pub end: u64,
}

/// One evaluation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceRequest {
    /// Image asset to evaluate.
    pub asset_id: String,
    /// Feature collection to reduce over.
    pub collection_id: String,
    /// Bands assembled into the evaluation image.
    pub bands: Vec<BandSpec>,
    pub reducer: Reducer,
    pub crs: String,
    pub crs_transform: [f64; 6],
    pub tile_scale: f64,
    /// Restrict evaluation to a feature-id slice (pagination).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id_range: Option<FeatureIdRange>,
}

impl ReduceRequest {
    /// Build a mean-reduction request on the fixed evaluation grid.
    pub fn mean(asset_id: &str, collection_id: &str, bands: Vec<BandSpec>) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            collection_id: collection_id.to_string(),
            bands,
            reducer: Reducer::Mean,
            crs: EVALUATION_CRS.to_string(),
            crs_transform: EVALUATION_TRANSFORM,
            tile_scale: 1.0,
            feature_id_range: None,
        }
    }
}

/// Wire response for an evaluation.
#[derive(Debug, Deserialize)]
struct ReduceResponse {
    feature_collection: FeatureCollection,
    /// Metadata properties of the evaluated image, copied onto each
    /// output feature.
    #[serde(default)]
    image_properties: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct CountRequest<'a> {
    collection_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Evaluation capability of the compute service.
#[async_trait]
pub trait ReduceClient: Send + Sync {
    /// Total number of features in a collection.
    async fn count_features(&self, collection_id: &str) -> ZonalResult<u64>;

    /// Evaluate one reduction request, returning the reduced features.
    async fn reduce_regions(&self, request: &ReduceRequest) -> ZonalResult<FeatureCollection>;
}

/// HTTP implementation of [`ReduceClient`] with bounded retries.
pub struct HttpReduceClient {
    client: Client,
    base_url: String,
    max_attempts: u32,
    initial_retry_delay: Duration,
    max_retry_delay: Duration,
}

impl HttpReduceClient {
    pub fn new(base_url: &str) -> ZonalResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| ZonalError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_attempts: 3,
            initial_retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(30),
        })
    }

    async fn try_count(&self, collection_id: &str) -> ZonalResult<u64> {
        let url = format!("{}/v1/featureCollections/count", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CountRequest { collection_id })
            .send()
            .await?;

        let response = check_status(response).await?;
        let body: CountResponse = response.json().await?;
        Ok(body.count)
    }

    async fn try_reduce(&self, request: &ReduceRequest) -> ZonalResult<FeatureCollection> {
        let url = format!("{}/v1/reduceRegions", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;

        let response = check_status(response).await?;
        let body: ReduceResponse = response.json().await?;

        let mut collection = body.feature_collection;
        if !body.image_properties.is_empty() {
            for feature in &mut collection.features {
                for (key, value) in &body.image_properties {
                    feature.properties.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(collection)
    }

    /// Sleep before the next attempt, doubling the delay.
    async fn backoff(&self, what: &str, error: &ZonalError, attempt: u32, delay: &mut Duration) {
        warn!(
            error = %error,
            attempt = attempt,
            max_attempts = self.max_attempts,
            delay_secs = delay.as_secs(),
            "{} failed, retrying",
            what
        );
        tokio::time::sleep(*delay).await;
        *delay = std::cmp::min(*delay * 2, self.max_retry_delay);
    }
}

#[async_trait]
impl ReduceClient for HttpReduceClient {
    #[instrument(skip(self))]
    async fn count_features(&self, collection_id: &str) -> ZonalResult<u64> {
        let mut attempt = 1;
        let mut delay = self.initial_retry_delay;

        loop {
            match self.try_count(collection_id).await {
                Ok(count) => {
                    debug!(collection = %collection_id, count = count, "Counted features");
                    return Ok(count);
                }
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    self.backoff("Feature count", &e, attempt, &mut delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[instrument(skip(self, request), fields(collection = %request.collection_id))]
    async fn reduce_regions(&self, request: &ReduceRequest) -> ZonalResult<FeatureCollection> {
        let mut attempt = 1;
        let mut delay = self.initial_retry_delay;

        loop {
            match self.try_reduce(request).await {
                Ok(collection) => {
                    debug!(features = collection.len(), "Evaluated reduction");
                    return Ok(collection);
                }
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    self.backoff("Evaluation", &e, attempt, &mut delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map a non-success response to an error, preserving the remote message.
/// Server errors are retryable fetch failures; everything else is a
/// terminal evaluation error.
async fn check_status(response: reqwest::Response) -> ZonalResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(ZonalError::FetchError(format!("{}: {}", status, body)))
    } else {
        Err(ZonalError::ComputeError(format!("{}: {}", status, body)))
    }
}

fn is_retryable(error: &ZonalError) -> bool {
    matches!(error, ZonalError::FetchError(_) | ZonalError::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = ReduceRequest::mean(
            "projects/usgs-ssebop/et/conus/monthly/v0",
            "users/zonal/mason_valley_fields",
            vec![BandSpec {
                name: "et_m06".to_string(),
                source_band: "et".to_string(),
                start_date: "2017-06-01".to_string(),
                end_date: "2017-07-01".to_string(),
            }],
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["reducer"], "mean");
        assert_eq!(json["crs"], "EPSG:32610");
        assert_eq!(json["crs_transform"][0], 30.0);
        assert_eq!(json["tile_scale"], 1.0);
        assert!(json.get("feature_id_range").is_none());
    }

    #[test]
    fn test_feature_id_range_serialization() {
        let mut request = ReduceRequest::mean("a", "c", vec![]);
        request.feature_id_range = Some(FeatureIdRange { start: 5000, end: 10000 });

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["feature_id_range"]["start"], 5000);
        assert_eq!(json["feature_id_range"]["end"], 10000);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&ZonalError::FetchError("503".into())));
        assert!(is_retryable(&ZonalError::Timeout));
        assert!(!is_retryable(&ZonalError::ComputeError("bad band".into())));
    }
}
