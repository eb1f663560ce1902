//! High-level library API: chain extraction, cleaning and joining stages and
//! write their tables to CSV or GeoPackage. Prefer these entry points over the
//! `core` modules when scripting a full run.
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::cleaning::{ParcelRecord, ParcelRecordBuilder, clean_layer, finalize_layer, merge_layers};
use crate::core::extract::{
    PixelSample, attach_metrics, extract_multiband, extract_single_metric_set,
};
use crate::core::join::{ParcelSet, join_at_parcel_scale, join_at_pixel_scale, joined_header};
use crate::core::params::PipelineConfig;
use crate::error::{Error, Result};
use crate::io::vector::{read_parcel_layer, write_parcel_layer};
use crate::io::writers::table::{
    enriched_header, sample_header, write_metric_table, write_table_file,
};
use crate::types::Scale;

/// Raster extensions picked up by directory helpers
const RASTER_EXTENSIONS: [&str; 3] = ["tif", "tiff", "vrt"];

/// Batch extraction report
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Rasters directly inside `input_dir`, sorted by name.
pub fn iterate_rasters(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut rasters = Vec::new();
    for entry in std::fs::read_dir(input_dir)? {
        let path = entry?.path();
        let is_raster = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| RASTER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && is_raster {
            rasters.push(path);
        }
    }
    rasters.sort();
    Ok(rasters)
}

/// Extract a year-stacked confidence raster to CSV. Returns the number of rows
/// written, `None` when the raster is missing or holds no valid pixel.
pub fn extract_to_csv(raster: &Path, years: &[i32], nodata: f64, output: &Path) -> Result<Option<usize>> {
    match extract_multiband(raster, years, nodata)? {
        Some(samples) => Ok(Some(write_table_file(output, &sample_header(), &samples)?)),
        None => Ok(None),
    }
}

/// Extract every raster of `input_dir` (one per tile) into a single CSV.
/// If `continue_on_error` is true, failures are counted and skipped; otherwise
/// the first error is returned.
pub fn extract_directory_to_csv(
    input_dir: &Path,
    years: &[i32],
    nodata: f64,
    output: &Path,
    continue_on_error: bool,
) -> Result<BatchReport> {
    let mut report = BatchReport::default();
    let mut samples: Vec<PixelSample> = Vec::new();

    for path in iterate_rasters(input_dir)? {
        match extract_multiband(&path, years, nodata) {
            Ok(Some(tile)) => {
                samples.extend(tile);
                report.processed += 1;
            }
            Ok(None) => report.skipped += 1,
            Err(e) => {
                report.errors += 1;
                if !continue_on_error {
                    return Err(e);
                }
                warn!("Error extracting {:?}: {}", path, e);
            }
        }
    }

    write_table_file(output, &sample_header(), &samples)?;
    info!(
        "Extraction complete: {} processed, {} skipped, {} errors",
        report.processed, report.skipped, report.errors
    );
    Ok(report)
}

/// Merge the configured LiDAR metric rasters and write the wide table to CSV.
pub fn extract_metrics_to_csv(config: &PipelineConfig, output: &Path) -> Result<usize> {
    let table = extract_single_metric_set(&config.metric_paths(), config.lidar_nodata)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(output)?;
    write_metric_table(file, &table)
}

/// Clean every configured source layer of `input`, merge them and write the
/// result as `output_layer` of a new GeoPackage. Returns the parcel count.
pub fn clean_to_geopackage(
    input: &Path,
    config: &PipelineConfig,
    output: &Path,
    output_layer: &str,
) -> Result<usize> {
    if config.layers.is_empty() {
        return Err(Error::Config("no source layer configured".into()));
    }
    let mut crs = None;
    let mut cleaned = Vec::with_capacity(config.layers.len());
    for spec in &config.layers {
        let layer = read_parcel_layer(input, &spec.layer_name)?;
        if crs.is_none() {
            crs = layer.crs.clone();
        }
        let records = clean_layer(
            &layer,
            &spec.columns_to_keep,
            &spec.rename_map,
            &spec.layer_name,
            config.scale,
        )?;
        cleaned.push(finalize_layer(records, &spec.source_label, config.scale));
    }
    let merged = merge_layers(cleaned);

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_parcel_layer(output, output_layer, &merged, config.scale, crs.as_deref())?;
    Ok(merged.len())
}

/// Load an already cleaned parcel layer as a spatially indexed set.
/// Multi-part geometries keep their first part.
pub fn load_parcel_set(geopackage: &Path, layer_name: &str, scale: Scale) -> Result<ParcelSet> {
    let layer = read_parcel_layer(geopackage, layer_name)?;
    let mut records: Vec<ParcelRecord> = Vec::with_capacity(layer.features.len());
    for feature in layer.features {
        let polygon = match feature.geometry {
            geo::Geometry::Polygon(p) => p,
            geo::Geometry::MultiPolygon(mp) => match mp.0.into_iter().next() {
                Some(p) => p,
                None => continue,
            },
            _ => continue,
        };
        records.push(
            ParcelRecordBuilder::new(feature.attributes)
                .geometry(polygon)
                .build(scale)?,
        );
    }
    info!("{} parcels indexed from layer {}", records.len(), layer_name);
    Ok(ParcelSet::new(records, layer.crs))
}

/// Extract `raster`, join the samples onto the cleaned parcels and write the
/// joined table to CSV. At pixel scale the configured per-pixel LiDAR metrics
/// are attached to each sample before joining. The canonical header is written
/// even when no row survives.
pub fn join_to_csv(
    raster: &Path,
    parcels_geopackage: &Path,
    config: &PipelineConfig,
    output: &Path,
) -> Result<usize> {
    let samples = extract_multiband(raster, &config.years, config.confidence_nodata)?
        .unwrap_or_else(|| {
            warn!("Nothing to join for {:?}", raster);
            Vec::new()
        });
    let parcels = load_parcel_set(parcels_geopackage, &config.parcel_layer, config.scale)?;

    match config.scale {
        Scale::Parcel => {
            let joined = join_at_parcel_scale(samples, &parcels);
            let header = joined_header(sample_header(), Scale::Parcel);
            write_table_file(output, &header, &joined)
        }
        Scale::Pixel if !config.lidar_metrics.is_empty() => {
            let table = extract_single_metric_set(&config.metric_paths(), config.lidar_nodata)?;
            let header = joined_header(enriched_header(&table.metrics), Scale::Pixel);
            let enriched = attach_metrics(samples, &table);
            let joined = join_at_pixel_scale(enriched, &parcels);
            write_table_file(output, &header, &joined)
        }
        Scale::Pixel => {
            let joined = join_at_pixel_scale(samples, &parcels);
            let header = joined_header(sample_header(), Scale::Pixel);
            write_table_file(output, &header, &joined)
        }
    }
}
