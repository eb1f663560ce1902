//! Raster value extraction: valid-pixel sampling with coordinate reconstruction,
//! multi-band (one band per year) extraction, and merging of single-band metric
//! rasters into a wide table keyed by pixel coordinates.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::io::gdal::{RasterMetadata, RasterReader};
use crate::types::GeoTransform;

/// Default no-data sentinel of the confidence rasters.
pub const CONFIDENCE_NODATA: f64 = 0.0;
/// Default no-data sentinel of the LiDAR metric rasters.
pub const LIDAR_NODATA: f64 = -999.0;

/// A pixel that passed the no-data mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidPixel {
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// One valid pixel of one band of a multi-band raster.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSample {
    pub x: f64,
    pub y: f64,
    pub value: f64,
    /// Observation year of the band
    pub band_label: i32,
    pub tile: String,
}

fn is_nodata(value: f64, nodata: f64) -> bool {
    if nodata.is_nan() {
        value.is_nan()
    } else {
        value == nodata
    }
}

/// Every pixel of `band` whose value differs from `nodata`, in row-major order,
/// with the geographic coordinates of its centre.
pub fn valid_pixels(band: &Array2<f64>, transform: &GeoTransform, nodata: f64) -> Vec<ValidPixel> {
    band.indexed_iter()
        .filter(|(_, value)| !is_nodata(**value, nodata))
        .map(|((row, col), &value)| {
            let (x, y) = transform.pixel_center(row, col);
            ValidPixel {
                row,
                col,
                x,
                y,
                value,
            }
        })
        .collect()
}

/// Tile identifier encoded as the last `_`-separated token of the file stem,
/// e.g. `confidence_T31TCJ.tif` -> `T31TCJ`.
pub fn tile_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.rsplit('_').next().unwrap_or_default().to_string()
}

/// Extract valid pixels of a raster whose bands are labelled by `band_labels`
/// (band 1 is the first label). Returns `None` when the file does not exist
/// or no band held a valid pixel.
pub fn extract_multiband(
    path: &Path,
    band_labels: &[i32],
    nodata: f64,
) -> Result<Option<Vec<PixelSample>>> {
    if !path.exists() {
        warn!("Raster not found: {:?}", path);
        return Ok(None);
    }
    let reader = RasterReader::open(path)?;
    let tile = tile_id(path);
    let transform = reader.metadata.geotransform;
    if band_labels.len() != reader.metadata.bands {
        warn!(
            "{:?}: {} band labels for {} bands, extracting {}",
            path,
            band_labels.len(),
            reader.metadata.bands,
            band_labels.len().min(reader.metadata.bands)
        );
    }

    let mut samples = Vec::new();
    for (idx, &label) in band_labels.iter().enumerate().take(reader.metadata.bands) {
        let band = reader.read_band(idx + 1)?;
        let pixels = valid_pixels(&band, &transform, nodata);
        if pixels.is_empty() {
            debug!("{:?}: band {} ({}) holds no valid pixel", path, idx + 1, label);
            continue;
        }
        samples.extend(pixels.into_iter().map(|p| PixelSample {
            x: p.x,
            y: p.y,
            value: p.value,
            band_label: label,
            tile: tile.clone(),
        }));
    }

    if samples.is_empty() {
        return Ok(None);
    }
    info!("{:?}: extracted {} pixel samples", path, samples.len());
    Ok(Some(samples))
}

fn coord_key(x: f64, y: f64) -> (u64, u64) {
    (x.to_bits(), y.to_bits())
}

/// One row of a `MetricTable`; `values` follows `MetricTable::metrics`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub x: f64,
    pub y: f64,
    pub values: Vec<Option<f64>>,
}

/// Wide table of per-pixel metrics keyed by (x, y).
#[derive(Debug, Clone, Default)]
pub struct MetricTable {
    pub metrics: Vec<String>,
    pub rows: Vec<MetricRow>,
    index: HashMap<(u64, u64), usize>,
}

impl MetricTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, metric: &str) -> Option<usize> {
        self.metrics.iter().position(|m| m == metric)
    }

    pub fn get(&self, x: f64, y: f64) -> Option<&MetricRow> {
        self.index.get(&coord_key(x, y)).map(|&i| &self.rows[i])
    }

    /// Full outer merge of one metric's pixels on (x, y): coordinates missing on
    /// either side get `None` for the other side's metrics.
    pub fn merge_outer(&mut self, metric: &str, pixels: &[ValidPixel]) {
        self.metrics.push(metric.to_string());
        let width = self.metrics.len();
        for row in &mut self.rows {
            row.values.push(None);
        }
        for p in pixels {
            match self.index.get(&coord_key(p.x, p.y)) {
                Some(&i) => self.rows[i].values[width - 1] = Some(p.value),
                None => {
                    let mut values = vec![None; width];
                    values[width - 1] = Some(p.value);
                    self.index.insert(coord_key(p.x, p.y), self.rows.len());
                    self.rows.push(MetricRow {
                        x: p.x,
                        y: p.y,
                        values,
                    });
                }
            }
        }
    }
}

/// Read each named single-band metric raster and merge them into one table.
/// Missing files are skipped; rasters must share the grid of the first one read.
pub fn extract_single_metric_set(
    path_by_metric: &[(String, PathBuf)],
    nodata: f64,
) -> Result<MetricTable> {
    let mut table = MetricTable::new();
    let mut reference: Option<(PathBuf, RasterMetadata)> = None;

    for (metric, path) in path_by_metric {
        if !path.exists() {
            warn!("LiDAR raster not found for {}: {:?}", metric, path);
            continue;
        }
        let reader = RasterReader::open(path)?;
        match &reference {
            Some((ref_path, ref_meta)) => {
                if let Some(detail) = ref_meta.grid_difference(&reader.metadata) {
                    return Err(Error::GridMismatch {
                        reference: ref_path.clone(),
                        other: path.clone(),
                        detail,
                    });
                }
            }
            None => reference = Some((path.clone(), reader.metadata.clone())),
        }
        let band = reader.read_band(1)?;
        let pixels = valid_pixels(&band, &reader.metadata.geotransform, nodata);
        debug!("{}: {} valid pixels", metric, pixels.len());
        table.merge_outer(metric, &pixels);
    }

    info!(
        "Metric table: {} rows, metrics {:?}",
        table.rows.len(),
        table.metrics
    );
    Ok(table)
}

/// A pixel sample carrying the per-pixel metrics found at its coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedSample {
    pub sample: PixelSample,
    pub metric_names: Arc<[String]>,
    pub metrics: Vec<Option<f64>>,
}

/// Left join of a metric table onto pixel samples by exact (x, y).
pub fn attach_metrics(samples: Vec<PixelSample>, table: &MetricTable) -> Vec<EnrichedSample> {
    let names: Arc<[String]> = table.metrics.clone().into();
    let mut unmatched = 0usize;
    let enriched: Vec<EnrichedSample> = samples
        .into_iter()
        .map(|sample| {
            let metrics = match table.get(sample.x, sample.y) {
                Some(row) => row.values.clone(),
                None => {
                    unmatched += 1;
                    vec![None; names.len()]
                }
            };
            EnrichedSample {
                sample,
                metric_names: Arc::clone(&names),
                metrics,
            }
        })
        .collect();
    debug!("{} samples without metric values", unmatched);
    enriched
}
