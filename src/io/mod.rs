//! I/O layer: GDAL-backed raster reading/writing and reprojection, GeoPackage
//! parcel layers, and CSV table writers.
pub mod gdal;
pub use gdal::{GdalError, RasterMetadata, RasterReader};

pub mod vector;
pub use vector::{ParcelLayer, RawParcel};

pub mod writers;
