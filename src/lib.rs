#![doc = r#"
canopyjoin: confidence and LiDAR raster extraction joined to poplar parcels.

This crate turns per-year confidence rasters and LiDAR canopy-metric rasters into
flat tables of pixel samples, cleans the cultivar metadata of several parcel
sources into one canonical GeoPackage layer, and joins the two spatially to
compute the plantation age behind every sample. It powers the `canopyjoin` CLI
and can be embedded in your own Rust applications.

Requirements
------------
- GDAL development headers and runtime available on your system
  (`gdalbuildvrt` on `PATH` for stacking).
- Rust 2024 edition toolchain.

Quick start: extract and join
-----------------------------
```rust,no_run
use std::path::Path;
use canopyjoin::{PipelineConfig, Scale, join_to_csv};

fn main() -> canopyjoin::Result<()> {
    let config = PipelineConfig {
        years: vec![2019, 2020, 2021],
        scale: Scale::Parcel,
        ..Default::default()
    };
    let rows = join_to_csv(
        Path::new("/data/confidence_T31TCJ.tif"),
        Path::new("/data/peupleraies_merged.gpkg"),
        &config,
        Path::new("/out/joined_T31TCJ.csv"),
    )?;
    println!("{rows} joined rows");
    Ok(())
}
```

Raster preparation
------------------
```rust,no_run
use std::path::Path;
use canopyjoin::core::masking::{stack_bands, mask_to_parcels, DEFAULT_PARCEL_LAYER};
use canopyjoin::types::PixelType;

fn main() -> canopyjoin::Result<()> {
    let Some(vrt) = stack_bands(
        Path::new("/data/confidence"),
        "T31TCJ",
        &[2019, 2020, 2021],
        "confidence",
        Path::new("/out/stacks"),
    )? else {
        return Ok(());
    };
    mask_to_parcels(
        &vrt,
        Path::new("/data/peupleraies_merged.gpkg"),
        DEFAULT_PARCEL_LAYER,
        Path::new("/out/masked"),
        "confidence_T31TCJ",
        0.0,
        PixelType::UInt8,
    )?;
    Ok(())
}
```

Error handling
--------------
All public functions return `canopyjoin::Result<T>`; match on `canopyjoin::Error`
to handle specific cases. Missing input rasters are not errors: extraction returns
`None` and logs a warning.

```rust,no_run
use std::path::Path;
use canopyjoin::{Error, core::extract::extract_single_metric_set};

fn main() {
    let metrics = vec![
        ("CC".to_string(), Path::new("/data/cc.tif").to_path_buf()),
        ("MOCH".to_string(), Path::new("/data/moch.tif").to_path_buf()),
    ];
    match extract_single_metric_set(&metrics, -999.0) {
        Ok(table) => println!("{} rows", table.rows.len()),
        Err(Error::GridMismatch { other, detail, .. }) => eprintln!("{other:?}: {detail}"),
        Err(other) => eprintln!("Other error: {other}"),
    }
}
```

Useful modules
--------------
- [`api`]: high-level entry points writing CSV and GeoPackage outputs.
- [`core`]: extraction, masking, cleaning, join and summary stages.
- [`types`]: `GeoTransform`, `Scale`, `PixelType`, `AttrValue`.
- [`io`]: GDAL raster and vector readers/writers, CSV tables.
- [`error`]: crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod api;
pub mod core;
pub mod error;
pub mod io;
pub mod types;

// Curated public API surface
// Types
pub use core::params::{LayerSpec, MetricSource, PipelineConfig};
pub use error::{Error, Result};
pub use types::{AttrValue, GeoTransform, PixelType, Scale};

// Readers
pub use io::gdal::{GdalError, RasterMetadata, RasterReader};
pub use io::vector::{ParcelLayer, RawParcel};

// Stage entry points
pub use core::cleaning::{ParcelRecord, clean_layer, finalize_layer, is_single_cultivar, normalize_cultivar_name};
pub use core::extract::{MetricTable, PixelSample, extract_multiband, extract_single_metric_set};
pub use core::join::{JoinedRecord, ParcelSet, join_at_parcel_scale, join_at_pixel_scale};
pub use core::masking::{align_to_reference, inspect, mask_to_parcels, stack_bands};

// High-level API re-exports
pub use api::{
    BatchReport, clean_to_geopackage, extract_directory_to_csv, extract_metrics_to_csv,
    extract_to_csv, iterate_rasters, join_to_csv, load_parcel_set,
};
