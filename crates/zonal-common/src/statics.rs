//! Static lookup tables mapping region/dataset/variable names to database
//! identifiers and source-collection ids.
//!
//! The tables are an explicitly constructed value passed to every component;
//! nothing reads them as ambient global state. `Statics::builtin()` carries
//! the production tables, and a YAML file can override the whole set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ZonalError, ZonalResult};
use crate::time::TemporalResolution;

/// One named spatial partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionInfo {
    pub id: i32,
    /// Field-boundary regions get a new geometry file every year.
    #[serde(default)]
    pub per_year_geometry: bool,
    /// Attribute keys copied into `geom_metadata` at ingestion time.
    #[serde(default)]
    pub metadata_fields: Vec<String>,
}

/// One remote-sensing data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: i32,
    /// Source image-collection identifier on the compute service.
    pub source_collection: String,
    /// Variables published by this dataset.
    pub variables: Vec<String>,
}

/// One physical quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableInfo {
    pub id: i32,
    pub units: String,
}

/// One named quantity scoped to a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub id: i32,
    pub dataset: String,
    #[serde(default)]
    pub properties: String,
}

/// A known remote feature collection and the region it maps to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollectionInfo {
    pub collection_id: String,
    pub region: String,
}

/// The full static configuration set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statics {
    pub regions: BTreeMap<String, RegionInfo>,
    pub datasets: BTreeMap<String, DatasetInfo>,
    pub variables: BTreeMap<String, VariableInfo>,
    pub parameters: BTreeMap<String, ParameterInfo>,
    pub feature_collections: BTreeMap<String, FeatureCollectionInfo>,
}

impl Statics {
    /// The production lookup tables.
    pub fn builtin() -> Self {
        let mut regions = BTreeMap::new();
        regions.insert(
            "US_states".to_string(),
            RegionInfo {
                id: 1,
                per_year_geometry: false,
                metadata_fields: vec!["NAME".to_string(), "STATEFP".to_string()],
            },
        );
        regions.insert(
            "US_counties".to_string(),
            RegionInfo {
                id: 2,
                per_year_geometry: false,
                metadata_fields: vec![
                    "NAME".to_string(),
                    "STATEFP".to_string(),
                    "COUNTYFP".to_string(),
                ],
            },
        );
        regions.insert(
            "US_huc8".to_string(),
            RegionInfo {
                id: 3,
                per_year_geometry: false,
                metadata_fields: vec!["NAME".to_string(), "HUC8".to_string()],
            },
        );
        regions.insert(
            "US_fields".to_string(),
            RegionInfo {
                id: 4,
                per_year_geometry: true,
                metadata_fields: vec![
                    "OBJECTID".to_string(),
                    "ACRES".to_string(),
                    "CROP_TYPE".to_string(),
                ],
            },
        );
        regions.insert(
            "Mason".to_string(),
            RegionInfo {
                id: 5,
                per_year_geometry: true,
                metadata_fields: vec!["OBJECTID".to_string(), "ACRES".to_string()],
            },
        );

        let mut datasets = BTreeMap::new();
        datasets.insert(
            "ssebop".to_string(),
            DatasetInfo {
                id: 1,
                source_collection: "projects/usgs-ssebop/et/conus/monthly/v0".to_string(),
                variables: vec![
                    "et".to_string(),
                    "etr".to_string(),
                    "etf".to_string(),
                    "ndvi".to_string(),
                    "count".to_string(),
                ],
            },
        );
        datasets.insert(
            "modis".to_string(),
            DatasetInfo {
                id: 2,
                source_collection: "MODIS/006/MOD16A2".to_string(),
                variables: vec!["et".to_string(), "ndvi".to_string()],
            },
        );
        datasets.insert(
            "gridmet".to_string(),
            DatasetInfo {
                id: 3,
                source_collection: "IDAHO_EPSCOR/GRIDMET".to_string(),
                variables: vec!["etr".to_string()],
            },
        );

        let mut variables = BTreeMap::new();
        variables.insert("et".to_string(), VariableInfo { id: 1, units: "mm".to_string() });
        variables.insert("etr".to_string(), VariableInfo { id: 2, units: "mm".to_string() });
        variables.insert("etf".to_string(), VariableInfo { id: 3, units: "none".to_string() });
        variables.insert("ndvi".to_string(), VariableInfo { id: 4, units: "none".to_string() });
        variables.insert("count".to_string(), VariableInfo { id: 5, units: "count".to_string() });

        let mut parameters = BTreeMap::new();
        parameters.insert(
            "et_actual".to_string(),
            ParameterInfo { id: 1, dataset: "ssebop".to_string(), properties: String::new() },
        );
        parameters.insert(
            "et_reference".to_string(),
            ParameterInfo { id: 2, dataset: "gridmet".to_string(), properties: String::new() },
        );
        parameters.insert(
            "et_fraction".to_string(),
            ParameterInfo { id: 3, dataset: "ssebop".to_string(), properties: String::new() },
        );

        let mut feature_collections = BTreeMap::new();
        feature_collections.insert(
            "central_valley".to_string(),
            FeatureCollectionInfo {
                collection_id: "users/zonal/base15_ca_poly_170616".to_string(),
                region: "US_fields".to_string(),
            },
        );
        feature_collections.insert(
            "mason_valley".to_string(),
            FeatureCollectionInfo {
                collection_id: "users/zonal/mason_valley_fields".to_string(),
                region: "Mason".to_string(),
            },
        );
        feature_collections.insert(
            "us_states_500k".to_string(),
            FeatureCollectionInfo {
                collection_id: "users/zonal/us_states_500k".to_string(),
                region: "US_states".to_string(),
            },
        );

        Self {
            regions,
            datasets,
            variables,
            parameters,
            feature_collections,
        }
    }

    /// Load a full table set from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ZonalResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        serde_yaml::from_str(&text)
            .map_err(|e| ZonalError::InternalError(format!("statics file: {}", e)))
    }

    pub fn region(&self, name: &str) -> ZonalResult<&RegionInfo> {
        self.regions
            .get(name)
            .ok_or_else(|| ZonalError::UnknownRegion(name.to_string()))
    }

    pub fn region_id(&self, name: &str) -> ZonalResult<i32> {
        Ok(self.region(name)?.id)
    }

    pub fn dataset(&self, name: &str) -> ZonalResult<&DatasetInfo> {
        self.datasets
            .get(name)
            .ok_or_else(|| ZonalError::UnknownDataset(name.to_string()))
    }

    pub fn dataset_id(&self, name: &str) -> ZonalResult<i32> {
        Ok(self.dataset(name)?.id)
    }

    pub fn variable(&self, name: &str) -> ZonalResult<&VariableInfo> {
        self.variables
            .get(name)
            .ok_or_else(|| ZonalError::UnknownVariable(name.to_string()))
    }

    pub fn variable_id(&self, name: &str) -> ZonalResult<i32> {
        Ok(self.variable(name)?.id)
    }

    /// Resolve a remote collection id to its configured region.
    pub fn region_for_collection(&self, collection_id: &str) -> ZonalResult<&str> {
        self.feature_collections
            .values()
            .find(|fc| fc.collection_id == collection_id)
            .map(|fc| fc.region.as_str())
            .ok_or_else(|| ZonalError::InvalidParameter {
                param: "feature_collection_id".to_string(),
                message: format!("'{}' is not a configured feature collection", collection_id),
            })
    }

    /// Sub-period keys stored for one temporal resolution.
    pub fn subperiod_keys(resolution: TemporalResolution) -> Vec<String> {
        match resolution {
            TemporalResolution::Annual => vec!["annual".to_string()],
            TemporalResolution::Seasonal => vec!["seasonal".to_string()],
            TemporalResolution::Monthly => (1..=12).map(|m| format!("m{:02}", m)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookups() {
        let statics = Statics::builtin();
        assert_eq!(statics.region_id("US_fields").unwrap(), 4);
        assert_eq!(statics.dataset_id("ssebop").unwrap(), 1);
        assert_eq!(statics.variable("et").unwrap().units, "mm");
        assert!(statics.region("US_fields").unwrap().per_year_geometry);
        assert!(!statics.region("US_states").unwrap().per_year_geometry);
    }

    #[test]
    fn test_unknown_names_error() {
        let statics = Statics::builtin();
        assert!(matches!(
            statics.region_id("Atlantis"),
            Err(ZonalError::UnknownRegion(_))
        ));
        assert!(matches!(
            statics.dataset_id("sentinel9"),
            Err(ZonalError::UnknownDataset(_))
        ));
        assert!(matches!(
            statics.variable_id("albedo"),
            Err(ZonalError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_region_for_collection() {
        let statics = Statics::builtin();
        let region = statics
            .region_for_collection("users/zonal/mason_valley_fields")
            .unwrap();
        assert_eq!(region, "Mason");
        assert!(statics.region_for_collection("users/nobody/none").is_err());
    }

    #[test]
    fn test_subperiod_keys() {
        assert_eq!(Statics::subperiod_keys(TemporalResolution::Annual), vec!["annual"]);
        let monthly = Statics::subperiod_keys(TemporalResolution::Monthly);
        assert_eq!(monthly.len(), 12);
        assert_eq!(monthly[5], "m06");
    }

    #[test]
    fn test_yaml_roundtrip() {
        let statics = Statics::builtin();
        let yaml = serde_yaml::to_string(&statics).unwrap();
        let back: Statics = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.region_id("Mason").unwrap(), 5);
    }
}
