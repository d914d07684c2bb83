//! Bucket-backed payload sources.
//!
//! Geometry and time-series payloads live in object storage under
//! convention-based file names and are fetched over plain HTTP GET.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, error, instrument, warn};

use zonal_common::{FeatureCollection, Statics, ZonalError, ZonalResult};

/// Bounded retry policy for bucket fetches.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Initial retry delay (doubles each retry)
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Read-only access to region payloads.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Fetch the geometry payload for a region and year.
    async fn fetch_geometry(&self, region: &str, year: i32) -> ZonalResult<FeatureCollection>;

    /// Fetch the time-series payload for a region, dataset and year.
    async fn fetch_timeseries(
        &self,
        region: &str,
        dataset: &str,
        year: i32,
    ) -> ZonalResult<FeatureCollection>;
}

/// HTTP implementation of [`PayloadSource`] over bucket-hosted objects.
pub struct BucketSource {
    client: Client,
    geo_base_url: String,
    data_base_url: String,
    /// Regions whose geometry files are published per year.
    per_year_regions: BTreeSet<String>,
    retry: RetryPolicy,
}

impl BucketSource {
    pub fn new(
        geo_base_url: &str,
        data_base_url: &str,
        statics: &Statics,
        retry: RetryPolicy,
    ) -> ZonalResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| {
                ZonalError::InternalError(format!("Failed to create HTTP client: {}", e))
            })?;

        let per_year_regions = statics
            .regions
            .iter()
            .filter(|(_, info)| info.per_year_geometry)
            .map(|(name, _)| name.clone())
            .collect();

        Ok(Self {
            client,
            geo_base_url: normalize_base_url(geo_base_url),
            data_base_url: normalize_base_url(data_base_url),
            per_year_regions,
            retry,
        })
    }

    /// Geometry object name; field-boundary regions change every year.
    fn geometry_object(&self, region: &str, year: i32) -> String {
        if self.per_year_regions.contains(region) {
            format!("{}_{}_GEOM.geojson", region, year)
        } else {
            format!("{}_GEOM.geojson", region)
        }
    }

    fn timeseries_object(region: &str, dataset: &str, year: i32) -> String {
        format!("{}/{}_{}_DATA.json", dataset, region, year)
    }

    /// GET with bounded exponential-backoff retry.
    async fn get_bytes(&self, url: &str) -> ZonalResult<Bytes> {
        let mut attempt = 1;
        let mut delay = self.retry.initial_delay;

        loop {
            match self.try_get(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if attempt < self.retry.max_attempts && is_retryable(&e) => {
                    warn!(
                        url = %url,
                        error = %e,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.retry.max_delay);
                    attempt += 1;
                }
                Err(e) => {
                    error!(url = %url, error = %e, "Fetch failed");
                    return Err(e);
                }
            }
        }
    }

    async fn try_get(&self, url: &str) -> ZonalResult<Bytes> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(ZonalError::FetchError(format!(
                "GET {} failed: {}",
                url,
                response.status()
            )));
        }

        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl PayloadSource for BucketSource {
    #[instrument(skip(self))]
    async fn fetch_geometry(&self, region: &str, year: i32) -> ZonalResult<FeatureCollection> {
        let url = format!("{}{}", self.geo_base_url, self.geometry_object(region, year));
        let bytes = self.get_bytes(&url).await?;
        debug!(url = %url, size = bytes.len(), "Fetched geometry payload");

        serde_json::from_slice(&bytes)
            .map_err(|e| ZonalError::FetchError(format!("{}: invalid GeoJSON: {}", url, e)))
    }

    #[instrument(skip(self))]
    async fn fetch_timeseries(
        &self,
        region: &str,
        dataset: &str,
        year: i32,
    ) -> ZonalResult<FeatureCollection> {
        let url = format!(
            "{}{}",
            self.data_base_url,
            Self::timeseries_object(region, dataset, year)
        );
        let bytes = self.get_bytes(&url).await?;
        debug!(url = %url, size = bytes.len(), "Fetched time-series payload");

        serde_json::from_slice(&bytes)
            .map_err(|e| ZonalError::FetchError(format!("{}: invalid JSON: {}", url, e)))
    }
}

fn normalize_base_url(base: &str) -> String {
    let mut url = base.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

fn is_retryable(error: &ZonalError) -> bool {
    matches!(error, ZonalError::FetchError(_) | ZonalError::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> BucketSource {
        BucketSource::new(
            "https://bucket.example.com/geo",
            "https://bucket.example.com/data/",
            &Statics::builtin(),
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_geometry_object_names() {
        let source = source();
        // Field-boundary regions get a year infix, others do not.
        assert_eq!(
            source.geometry_object("US_fields", 2017),
            "US_fields_2017_GEOM.geojson"
        );
        assert_eq!(
            source.geometry_object("Mason", 2017),
            "Mason_2017_GEOM.geojson"
        );
        assert_eq!(
            source.geometry_object("US_states", 2017),
            "US_states_GEOM.geojson"
        );
    }

    #[test]
    fn test_timeseries_object_name() {
        assert_eq!(
            BucketSource::timeseries_object("Mason", "ssebop", 2017),
            "ssebop/Mason_2017_DATA.json"
        );
    }

    #[test]
    fn test_base_url_normalization() {
        let source = source();
        assert!(source.geo_base_url.ends_with('/'));
        assert!(source.data_base_url.ends_with('/'));
        assert_eq!(source.geo_base_url, "https://bucket.example.com/geo/");
    }
}
