//! Geometry and observation catalog using PostgreSQL.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::postgres::{PgPoolCopyExt, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use tracing::{info, instrument};

use zonal_common::{Statics, ZonalError, ZonalResult};

/// Database connection pool and catalog operations.
pub struct Catalog {
    pool: PgPool,
}

impl Catalog {
    /// Create a new catalog connection from database URL.
    pub async fn connect(database_url: &str) -> ZonalResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| ZonalError::DatabaseError(format!("Connection failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> ZonalResult<()> {
        // Split SQL statements and execute them individually
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| ZonalError::DatabaseError(format!("Migration failed: {}", e)))?;
            }
        }

        Ok(())
    }

    /// Bootstrap check: does any observation row exist yet?
    pub async fn has_data(&self) -> ZonalResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM data)")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ZonalError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(exists)
    }

    /// Populate the Region, Dataset, Parameter and Variable reference tables
    /// from the static configuration, in that dependency order.
    ///
    /// Each table is written in its own transaction; a failed write rolls the
    /// whole table back and re-raises.
    #[instrument(skip(self, statics))]
    pub async fn populate_reference_tables(&self, statics: &Statics) -> ZonalResult<()> {
        let mut tx = self.pool.begin().await?;
        for (name, region) in &statics.regions {
            sqlx::query("INSERT INTO region (id, name) VALUES ($1, $2)")
                .bind(region.id)
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(|e| ZonalError::DatabaseError(format!("Region insert failed: {}", e)))?;
        }
        tx.commit().await?;
        info!(count = statics.regions.len(), "Added region rows");

        let mut tx = self.pool.begin().await?;
        for (name, dataset) in &statics.datasets {
            sqlx::query("INSERT INTO dataset (id, name, source_collection) VALUES ($1, $2, $3)")
                .bind(dataset.id)
                .bind(name)
                .bind(&dataset.source_collection)
                .execute(&mut *tx)
                .await
                .map_err(|e| ZonalError::DatabaseError(format!("Dataset insert failed: {}", e)))?;
        }
        tx.commit().await?;
        info!(count = statics.datasets.len(), "Added dataset rows");

        let mut tx = self.pool.begin().await?;
        for (name, parameter) in &statics.parameters {
            let dataset_id = statics.dataset_id(&parameter.dataset)?;
            sqlx::query(
                "INSERT INTO parameter (id, dataset_id, name, properties) VALUES ($1, $2, $3, $4)",
            )
            .bind(parameter.id)
            .bind(dataset_id)
            .bind(name)
            .bind(&parameter.properties)
            .execute(&mut *tx)
            .await
            .map_err(|e| ZonalError::DatabaseError(format!("Parameter insert failed: {}", e)))?;
        }
        tx.commit().await?;
        info!(count = statics.parameters.len(), "Added parameter rows");

        let mut tx = self.pool.begin().await?;
        for (name, variable) in &statics.variables {
            sqlx::query("INSERT INTO variable (id, name, units) VALUES ($1, $2, $3)")
                .bind(variable.id)
                .bind(name)
                .bind(&variable.units)
                .execute(&mut *tx)
                .await
                .map_err(|e| ZonalError::DatabaseError(format!("Variable insert failed: {}", e)))?;
        }
        tx.commit().await?;
        info!(count = statics.variables.len(), "Added variable rows");

        Ok(())
    }

    /// Insert a geometry row unless one with the same (region, user, name)
    /// already exists.
    ///
    /// The existence check and the insert are one atomic statement; `None`
    /// means the feature was already ingested and should be skipped.
    pub async fn insert_geom_if_absent(&self, geom: &NewGeom) -> ZonalResult<Option<i64>> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO geom (user_id, region_id, name, type, coords) \
             VALUES ($1, $2, $3, $4, ST_GeomFromGeoJSON($5)) \
             ON CONFLICT (region_id, user_id, name) DO NOTHING \
             RETURNING id",
        )
        .bind(geom.user_id)
        .bind(geom.region_id)
        .bind(&geom.name)
        .bind(&geom.geom_type)
        .bind(&geom.coords_geojson)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ZonalError::DatabaseError(format!("Geom insert failed: {}", e)))?;

        Ok(id)
    }

    /// Resolve geometry ids for a region and user.
    ///
    /// `names = None` selects every geometry of the region for that user.
    pub async fn geom_ids(
        &self,
        region_id: i32,
        user_id: i32,
        names: Option<&[String]>,
    ) -> ZonalResult<Vec<i64>> {
        let ids = match names {
            Some(names) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM geom \
                     WHERE region_id = $1 AND user_id = $2 AND name = ANY($3) \
                     ORDER BY id",
                )
                .bind(region_id)
                .bind(user_id)
                .bind(names)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM geom WHERE region_id = $1 AND user_id = $2 ORDER BY id",
                )
                .bind(region_id)
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| ZonalError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(ids)
    }

    /// Fetch geometry rows by name, coordinates rendered as GeoJSON.
    pub async fn geoms_by_name(&self, name: &str) -> ZonalResult<Vec<GeomRecord>> {
        let rows = sqlx::query_as::<_, GeomRow>(
            "SELECT id, user_id, region_id, name, type AS geom_type, \
             ST_AsGeoJSON(coords) AS coords \
             FROM geom WHERE name = $1 ORDER BY id",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZonalError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Fetch observation rows matching a filter. The full result set is
    /// materialized; query-side pagination is not needed at current volumes.
    pub async fn query_data(&self, filter: &DataFilter) -> ZonalResult<Vec<DataRecord>> {
        let rows = sqlx::query_as::<_, DataRow>(
            "SELECT id, geom_id, dataset_id, variable_id, temporal_resolution, \
             data_date, data_value \
             FROM data \
             WHERE geom_id = ANY($1) AND dataset_id = $2 AND variable_id = $3 \
             AND temporal_resolution = $4 AND data_date = ANY($5) \
             ORDER BY geom_id, data_date",
        )
        .bind(&filter.geom_ids)
        .bind(filter.dataset_id)
        .bind(filter.variable_id)
        .bind(&filter.temporal_resolution)
        .bind(&filter.dates)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ZonalError::DatabaseError(format!("Query failed: {}", e)))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Bulk-load staged geometry metadata rows (CSV: geom_id, name, properties).
    pub async fn copy_geom_metadata(&self, csv: &[u8]) -> ZonalResult<u64> {
        self.copy_csv(
            "COPY geom_metadata (geom_id, name, properties) FROM STDIN WITH (FORMAT csv)",
            csv,
        )
        .await
    }

    /// Bulk-load staged observation rows
    /// (CSV: geom_id, dataset_id, variable_id, temporal_resolution, data_date, data_value).
    pub async fn copy_data(&self, csv: &[u8]) -> ZonalResult<u64> {
        self.copy_csv(
            "COPY data (geom_id, dataset_id, variable_id, temporal_resolution, data_date, data_value) \
             FROM STDIN WITH (FORMAT csv)",
            csv,
        )
        .await
    }

    async fn copy_csv(&self, statement: &str, csv: &[u8]) -> ZonalResult<u64> {
        let mut sink = self
            .pool
            .copy_in_raw(statement)
            .await
            .map_err(|e| ZonalError::DatabaseError(format!("COPY start failed: {}", e)))?;

        sink.send(csv)
            .await
            .map_err(|e| ZonalError::DatabaseError(format!("COPY send failed: {}", e)))?;

        let rows = sink
            .finish()
            .await
            .map_err(|e| ZonalError::DatabaseError(format!("COPY finish failed: {}", e)))?;

        Ok(rows)
    }
}

/// A geometry row to be inserted. Coordinates are a GeoJSON MultiPolygon
/// string; `geom_type` records the source geometry type before
/// normalization.
#[derive(Debug, Clone)]
pub struct NewGeom {
    pub user_id: i32,
    pub region_id: i32,
    pub name: String,
    pub geom_type: String,
    pub coords_geojson: String,
}

/// A geometry row read back out, coordinates as a GeoJSON value.
#[derive(Debug, Clone, Serialize)]
pub struct GeomRecord {
    pub id: i64,
    pub user_id: i32,
    pub region_id: i32,
    pub name: String,
    #[serde(rename = "type")]
    pub geom_type: String,
    pub coords: serde_json::Value,
}

/// Filter for observation queries.
#[derive(Debug, Clone)]
pub struct DataFilter {
    pub geom_ids: Vec<i64>,
    pub dataset_id: i32,
    pub variable_id: i32,
    pub temporal_resolution: String,
    pub dates: Vec<NaiveDate>,
}

/// One observation row, serialized flat with the date as `YYYY-MM-DD`.
#[derive(Debug, Clone, Serialize)]
pub struct DataRecord {
    pub id: i64,
    pub geom_id: i64,
    pub dataset_id: i32,
    pub variable_id: i32,
    pub temporal_resolution: String,
    pub data_date: String,
    pub data_value: f64,
}

/// Internal row type for geometry queries.
#[derive(FromRow)]
struct GeomRow {
    id: i64,
    user_id: i32,
    region_id: i32,
    name: String,
    geom_type: String,
    coords: String,
}

impl From<GeomRow> for GeomRecord {
    fn from(row: GeomRow) -> Self {
        let coords =
            serde_json::from_str(&row.coords).unwrap_or(serde_json::Value::Null);
        GeomRecord {
            id: row.id,
            user_id: row.user_id,
            region_id: row.region_id,
            name: row.name,
            geom_type: row.geom_type,
            coords,
        }
    }
}

/// Internal row type for observation queries.
#[derive(FromRow)]
struct DataRow {
    id: i64,
    geom_id: i64,
    dataset_id: i32,
    variable_id: i32,
    temporal_resolution: String,
    data_date: NaiveDate,
    data_value: f64,
}

impl From<DataRow> for DataRecord {
    fn from(row: DataRow) -> Self {
        DataRecord {
            id: row.id,
            geom_id: row.geom_id,
            dataset_id: row.dataset_id,
            variable_id: row.variable_id,
            temporal_resolution: row.temporal_resolution,
            data_date: row.data_date.format("%Y-%m-%d").to_string(),
            data_value: row.data_value,
        }
    }
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS postgis;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    name VARCHAR(100),
    email VARCHAR(200),
    password VARCHAR(200),
    role VARCHAR(50),
    active VARCHAR(10),
    joined TIMESTAMPTZ,
    last_login TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS region (
    id INTEGER PRIMARY KEY,
    name VARCHAR(100) NOT NULL
);

CREATE TABLE IF NOT EXISTS dataset (
    id INTEGER PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    source_collection VARCHAR(200) NOT NULL
);

CREATE TABLE IF NOT EXISTS variable (
    id INTEGER PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    units VARCHAR(50) NOT NULL
);

CREATE TABLE IF NOT EXISTS parameter (
    id INTEGER PRIMARY KEY,
    dataset_id INTEGER NOT NULL REFERENCES dataset(id),
    name VARCHAR(100) NOT NULL,
    properties TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS geom (
    id BIGSERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL,
    region_id INTEGER NOT NULL REFERENCES region(id),
    name VARCHAR(200) NOT NULL,
    type VARCHAR(30) NOT NULL,
    coords GEOMETRY(MULTIPOLYGON),

    UNIQUE(region_id, user_id, name)
);

CREATE TABLE IF NOT EXISTS geom_metadata (
    id BIGSERIAL PRIMARY KEY,
    geom_id BIGINT NOT NULL REFERENCES geom(id),
    name VARCHAR(100) NOT NULL,
    properties TEXT
);

CREATE TABLE IF NOT EXISTS data (
    id BIGSERIAL PRIMARY KEY,
    geom_id BIGINT NOT NULL REFERENCES geom(id),
    dataset_id INTEGER NOT NULL REFERENCES dataset(id),
    variable_id INTEGER NOT NULL REFERENCES variable(id),
    temporal_resolution VARCHAR(20) NOT NULL,
    data_date DATE NOT NULL,
    data_value DOUBLE PRECISION NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_geom_region_user ON geom(region_id, user_id);
CREATE INDEX IF NOT EXISTS idx_data_lookup ON data(geom_id, dataset_id, variable_id, temporal_resolution);
CREATE INDEX IF NOT EXISTS idx_data_date ON data(data_date);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_record_date_rendering() {
        let row = DataRow {
            id: 7,
            geom_id: 3,
            dataset_id: 1,
            variable_id: 1,
            temporal_resolution: "monthly".to_string(),
            data_date: NaiveDate::from_ymd_opt(2017, 6, 30).unwrap(),
            data_value: 101.2345,
        };

        let record: DataRecord = row.into();
        assert_eq!(record.data_date, "2017-06-30");

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"data_date\":\"2017-06-30\""));
    }

    #[test]
    fn test_geom_record_coords_parse() {
        let row = GeomRow {
            id: 1,
            user_id: 0,
            region_id: 5,
            name: "Mason_0".to_string(),
            geom_type: "Polygon".to_string(),
            coords: r#"{"type":"MultiPolygon","coordinates":[]}"#.to_string(),
        };

        let record: GeomRecord = row.into();
        assert_eq!(record.coords["type"], "MultiPolygon");
    }

    #[test]
    fn test_schema_creates_all_tables() {
        for table in [
            "users",
            "region",
            "dataset",
            "variable",
            "parameter",
            "geom",
            "geom_metadata",
            "data",
        ] {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)),
                "missing table {}",
                table
            );
        }
    }
}
