//! PostgreSQL-backed storage for geometries and zonal observations.

pub mod catalog;

pub use catalog::{Catalog, DataFilter, DataRecord, GeomRecord, NewGeom};
