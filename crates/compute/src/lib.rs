//! Client for the remote zonal-reduction compute service.

pub mod client;
pub mod zonal;

pub use client::{
    BandSpec, FeatureIdRange, HttpReduceClient, ReduceClient, ReduceRequest, Reducer,
};
pub use zonal::{materialize_reduced, monthly_bands, PAGE_SIZE};
