//! Common types and utilities shared across all zonal-timeseries services.

pub mod error;
pub mod geojson;
pub mod naming;
pub mod statics;
pub mod time;

pub use error::{ZonalError, ZonalResult};
pub use naming::geom_name;
pub use geojson::{Feature, FeatureCollection, Geometry, MultiPolygonCoords};
pub use statics::Statics;
pub use time::{DateSpan, TemporalResolution, MONTH_LENGTHS};
