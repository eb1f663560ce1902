//! Core pipeline stages: raster extraction, masking and alignment, parcel
//! cleaning, the spatial join and cultivar summaries. These are the building
//! blocks consumed by the high-level `api` module.
pub mod cleaning;
pub mod extract;
pub mod join;
pub mod masking;
pub mod params;
pub mod summary;
