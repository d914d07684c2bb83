//! Zonal statistics assembly: monthly band construction and paginated
//! materialization of reduced feature collections.

use tracing::{debug, info, instrument};

use zonal_common::time::month_span;
use zonal_common::{FeatureCollection, ZonalResult};

use crate::client::{BandSpec, FeatureIdRange, ReduceClient, ReduceRequest};

/// The compute service caps materialized results per call.
pub const PAGE_SIZE: u64 = 5000;

/// Build the twelve monthly band specs for one variable and year.
///
/// Band `<var>_mNN` selects the source band over `[month start, next month)`.
pub fn monthly_bands(variable: &str, year: i32) -> ZonalResult<Vec<BandSpec>> {
    let mut bands = Vec::with_capacity(12);
    for month in 1..=12 {
        let (start_date, end_date) = month_span(year, month)?.as_strings();
        bands.push(BandSpec {
            name: format!("{}_m{:02}", variable, month),
            source_band: variable.to_string(),
            start_date,
            end_date,
        });
    }
    Ok(bands)
}

/// Materialize a reduced feature collection page by page.
///
/// Asks the service for the total feature count, then issues exactly
/// `ceil(count / PAGE_SIZE)` requests over contiguous id ranges of width
/// `PAGE_SIZE`, concatenating every page. An empty collection issues no
/// page requests at all.
#[instrument(skip(client, request), fields(collection = %request.collection_id))]
pub async fn materialize_reduced(
    client: &dyn ReduceClient,
    request: &ReduceRequest,
) -> ZonalResult<FeatureCollection> {
    let total = client.count_features(&request.collection_id).await?;
    let pages = total.div_ceil(PAGE_SIZE);

    info!(total = total, pages = pages, "Materializing reduced collection");

    let mut collection = FeatureCollection::new();
    for page in 0..pages {
        let start = page * PAGE_SIZE;
        let mut page_request = request.clone();
        page_request.feature_id_range = Some(FeatureIdRange {
            start,
            end: start + PAGE_SIZE,
        });

        let slice = client.reduce_regions(&page_request).await?;
        debug!(page = page, features = slice.len(), "Fetched page");
        collection.extend(slice);
    }

    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use zonal_common::geojson::Feature;
    use zonal_common::ZonalError;

    /// Serves `total` synthetic features, recording every requested range.
    struct MockReduceClient {
        total: u64,
        requests: Mutex<Vec<(u64, u64)>>,
    }

    impl MockReduceClient {
        fn new(total: u64) -> Self {
            Self {
                total,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReduceClient for MockReduceClient {
        async fn count_features(&self, _collection_id: &str) -> ZonalResult<u64> {
            Ok(self.total)
        }

        async fn reduce_regions(&self, request: &ReduceRequest) -> ZonalResult<FeatureCollection> {
            let range = request
                .feature_id_range
                .ok_or_else(|| ZonalError::InternalError("missing id range".into()))?;
            self.requests.lock().unwrap().push((range.start, range.end));

            let mut collection = FeatureCollection::new();
            for fid in range.start..range.end.min(self.total) {
                let mut feature = Feature {
                    type_: "Feature".to_string(),
                    geometry: None,
                    properties: Default::default(),
                };
                feature.properties.insert("FID".to_string(), json!(fid));
                collection.features.push(feature);
            }
            Ok(collection)
        }
    }

    fn request() -> ReduceRequest {
        ReduceRequest::mean("asset", "collection", vec![])
    }

    async fn run(total: u64) -> (FeatureCollection, Vec<(u64, u64)>) {
        let client = MockReduceClient::new(total);
        let collection = materialize_reduced(&client, &request()).await.unwrap();
        let requests = client.requests.lock().unwrap().clone();
        (collection, requests)
    }

    #[tokio::test]
    async fn test_empty_collection_issues_no_pages() {
        let (collection, requests) = run(0).await;
        assert!(collection.is_empty());
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn test_exact_page_boundary() {
        let (collection, requests) = run(5000).await;
        assert_eq!(collection.len(), 5000);
        assert_eq!(requests, vec![(0, 5000)]);
    }

    #[tokio::test]
    async fn test_multiple_pages_no_gaps_no_duplicates() {
        let (collection, requests) = run(12001).await;
        assert_eq!(collection.len(), 12001);
        assert_eq!(requests, vec![(0, 5000), (5000, 10000), (10000, 15000)]);

        let mut fids: Vec<u64> = collection
            .features
            .iter()
            .map(|f| f.property("FID").and_then(|v| v.as_u64()).unwrap())
            .collect();
        fids.sort_unstable();
        fids.dedup();
        assert_eq!(fids.len(), 12001);
        assert_eq!(fids.first(), Some(&0));
        assert_eq!(fids.last(), Some(&12000));
    }

    #[test]
    fn test_monthly_bands() {
        let bands = monthly_bands("et", 2017).unwrap();
        assert_eq!(bands.len(), 12);
        assert_eq!(bands[5].name, "et_m06");
        assert_eq!(bands[5].start_date, "2017-06-01");
        assert_eq!(bands[5].end_date, "2017-07-01");
        assert_eq!(bands[11].end_date, "2018-01-01");
    }
}
