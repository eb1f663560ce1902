//! Raster preparation: per-year stacking into a virtual raster, clipping stacks
//! to inward-buffered parcel polygons, aligning auxiliary rasters onto a
//! reference grid, band annotation and diagnostic inspection.
use std::path::{Path, PathBuf};
use std::process::Command;

use geo::{BoundingRect, Buffer, Geometry, Intersects, Point, Polygon, Validation};
use ndarray::Array2;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::io::gdal::{
    RasterReader, RasterSpec, in_memory_dataset, open_for_update, reproject_nearest, write_geotiff,
};
use crate::io::vector::read_parcel_layer;
use crate::types::{GeoTransform, PixelType};

/// Inward buffer applied to parcels before masking, in CRS units.
pub const MASK_BUFFER: f64 = 10.0;
/// No-data used by `align_to_reference` when the source declares none.
pub const DEFAULT_ALIGN_NODATA: f64 = -999.0;
/// Layer of the merged parcel GeoPackage used as a mask.
pub const DEFAULT_PARCEL_LAYER: &str = "peupleraies_merged_parcelle";

const GDALBUILDVRT: &str = "gdalbuildvrt";

/// Stack single-band rasters into one multi-band VRT (one band per input, in order).
/// The exit status of `gdalbuildvrt` is checked.
pub fn stack_rasters(rasters: &[PathBuf], vrt_path: &Path) -> Result<()> {
    run_stacker(GDALBUILDVRT, rasters, vrt_path)
}

fn run_stacker(program: &str, rasters: &[PathBuf], vrt_path: &Path) -> Result<()> {
    if let Some(parent) = vrt_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let status = Command::new(program)
        .arg("-separate")
        .arg("-overwrite")
        .arg(vrt_path)
        .args(rasters)
        .status()
        .map_err(|e| Error::ExternalCommand {
            program: program.to_string(),
            status: e.to_string(),
        })?;
    if !status.success() {
        return Err(Error::ExternalCommand {
            program: program.to_string(),
            status: status.to_string(),
        });
    }
    Ok(())
}

/// `<base_dir>/<year>/<type_prefix>_<zone>_<year>.tif` for every year that has one,
/// in year order.
fn locate_year_rasters(base_dir: &Path, zone: &str, years: &[i32], type_prefix: &str) -> Vec<PathBuf> {
    let mut rasters = Vec::with_capacity(years.len());
    for year in years {
        let path = base_dir
            .join(year.to_string())
            .join(format!("{}_{}_{}.tif", type_prefix, zone, year));
        if path.exists() {
            rasters.push(path);
        } else {
            warn!("Raster not found for year {} and zone {}", year, zone);
        }
    }
    rasters
}

/// Locate `<base_dir>/<year>/<type_prefix>_<zone>_<year>.tif` for every year and
/// stack the ones found into `<out_dir>/<type_prefix>_stack_<zone>.vrt`.
/// Missing years are reported and skipped; `None` when nothing was found.
pub fn stack_bands(
    base_dir: &Path,
    zone: &str,
    years: &[i32],
    type_prefix: &str,
    out_dir: &Path,
) -> Result<Option<PathBuf>> {
    let rasters = locate_year_rasters(base_dir, zone, years, type_prefix);
    if rasters.is_empty() {
        warn!("No raster available to build the {} stack of {}", type_prefix, zone);
        return Ok(None);
    }
    let vrt_path = out_dir.join(format!("{}_stack_{}.vrt", type_prefix, zone));
    stack_rasters(&rasters, &vrt_path)?;
    info!("VRT created at {:?} ({} bands)", vrt_path, rasters.len());
    Ok(Some(vrt_path))
}

/// Shrink each parcel by `distance`, keeping the valid, non-empty parts.
/// Fails when nothing survives the buffer.
pub fn buffer_parcels(geometries: &[Geometry<f64>], distance: f64) -> Result<Vec<Polygon<f64>>> {
    let mut polygons = Vec::new();
    for geometry in geometries {
        let buffered = match geometry {
            Geometry::Polygon(p) => p.buffer(-distance),
            Geometry::MultiPolygon(mp) => mp.buffer(-distance),
            _ => continue,
        };
        polygons.extend(
            buffered
                .0
                .into_iter()
                .filter(|p| !p.exterior().0.is_empty() && p.is_valid()),
        );
    }
    if polygons.is_empty() {
        return Err(Error::Config(format!(
            "no parcel geometry left after a -{} buffer",
            distance
        )));
    }
    Ok(polygons)
}

/// Pixel window `(row0, col0, rows, cols)` covering `polygons`, clamped to the raster.
fn crop_window(
    transform: &GeoTransform,
    polygons: &[Polygon<f64>],
    size: (usize, usize),
) -> Result<(usize, usize, usize, usize)> {
    let inverse = transform
        .invert()
        .ok_or_else(|| Error::Config("raster geotransform is not invertible".into()))?;
    let (mut min_row, mut min_col) = (f64::INFINITY, f64::INFINITY);
    let (mut max_row, mut max_col) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for rect in polygons.iter().filter_map(|p| p.bounding_rect()) {
        for (x, y) in [(rect.min().x, rect.min().y), (rect.max().x, rect.max().y)] {
            let (col, row) = inverse.apply(x, y);
            min_row = min_row.min(row);
            max_row = max_row.max(row);
            min_col = min_col.min(col);
            max_col = max_col.max(col);
        }
    }
    let (rows, cols) = size;
    let row0 = min_row.floor().max(0.0) as usize;
    let col0 = min_col.floor().max(0.0) as usize;
    let row1 = (max_row.ceil().max(0.0) as usize).min(rows);
    let col1 = (max_col.ceil().max(0.0) as usize).min(cols);
    if row0 >= row1 || col0 >= col1 {
        return Err(Error::Geometry("parcels do not overlap the raster".into()));
    }
    Ok((row0, col0, row1 - row0, col1 - col0))
}

/// Clip bands to the union of `polygons`, cropping to their extent. Pixels whose
/// centre lies outside every polygon are set to `nodata`.
pub fn clip_bands(
    bands: &[Array2<f64>],
    transform: &GeoTransform,
    polygons: &[Polygon<f64>],
    nodata: f64,
) -> Result<(Vec<Array2<f64>>, GeoTransform)> {
    if !transform.is_north_up() {
        return Err(Error::Config("rotated geotransforms are not supported for masking".into()));
    }
    let Some(first) = bands.first() else {
        return Err(Error::Config("raster has no band to mask".into()));
    };
    let (row0, col0, rows, cols) = crop_window(transform, polygons, first.dim())?;
    let (origin_x, origin_y) = transform.apply(col0 as f64, row0 as f64);
    let gt = &transform.0;
    let cropped = GeoTransform([origin_x, gt[1], 0.0, origin_y, 0.0, gt[5]]);

    let mut inside = Array2::<bool>::from_elem((rows, cols), false);
    for polygon in polygons {
        let Ok((r0, c0, nr, nc)) = crop_window(&cropped, std::slice::from_ref(polygon), (rows, cols))
        else {
            continue;
        };
        for r in r0..r0 + nr {
            for c in c0..c0 + nc {
                if inside[[r, c]] {
                    continue;
                }
                let (x, y) = cropped.pixel_center(r, c);
                if polygon.intersects(&Point::new(x, y)) {
                    inside[[r, c]] = true;
                }
            }
        }
    }

    let clipped = bands
        .iter()
        .map(|band| {
            Array2::from_shape_fn((rows, cols), |(r, c)| {
                if inside[[r, c]] {
                    band[[r + row0, c + col0]]
                } else {
                    nodata
                }
            })
        })
        .collect();
    Ok((clipped, cropped))
}

/// Clip a raster stack to the parcels of `layer` shrunk by `MASK_BUFFER`, and
/// write `<out_dir>/<out_name>.tif` with the requested no-data and pixel type.
pub fn mask_to_parcels(
    vrt_path: &Path,
    parcel_geopackage: &Path,
    layer: &str,
    out_dir: &Path,
    out_name: &str,
    nodata: f64,
    dtype: PixelType,
) -> Result<PathBuf> {
    mask_to_parcels_buffered(
        vrt_path,
        parcel_geopackage,
        layer,
        out_dir,
        out_name,
        nodata,
        dtype,
        MASK_BUFFER,
    )
}

/// `mask_to_parcels` with an explicit inward buffer distance.
#[allow(clippy::too_many_arguments)]
pub fn mask_to_parcels_buffered(
    vrt_path: &Path,
    parcel_geopackage: &Path,
    layer: &str,
    out_dir: &Path,
    out_name: &str,
    nodata: f64,
    dtype: PixelType,
    buffer: f64,
) -> Result<PathBuf> {
    let parcels = read_parcel_layer(parcel_geopackage, layer)?;
    let geometries: Vec<Geometry<f64>> = parcels.features.into_iter().map(|f| f.geometry).collect();
    let polygons = buffer_parcels(&geometries, buffer)?;

    let reader = RasterReader::open(vrt_path)?;
    let bands = reader.read_all_bands()?;
    let (clipped, transform) = clip_bands(&bands, &reader.metadata.geotransform, &polygons, nodata)?;

    std::fs::create_dir_all(out_dir)?;
    let output_path = out_dir.join(format!("{}.tif", out_name));
    write_geotiff(
        &output_path,
        &clipped,
        &RasterSpec {
            geotransform: transform,
            projection: &reader.metadata.projection,
            nodata: Some(nodata),
            pixel_type: dtype,
            band_descriptions: &reader.metadata.band_descriptions,
        },
    )?;
    info!("Masked raster written to {:?}", output_path);
    Ok(output_path)
}

/// Resample band 1 of `input_raster` onto the grid of `reference_raster`
/// (nearest neighbour) and write it as single-band float32.
pub fn align_to_reference(input_raster: &Path, reference_raster: &Path, out_path: &Path) -> Result<()> {
    let reference = RasterReader::open(reference_raster)?;
    let source = RasterReader::open(input_raster)?;
    let source_nodata = source.metadata.nodata;
    let nodata = source_nodata.unwrap_or(DEFAULT_ALIGN_NODATA);

    let source_band = source.read_band(1)?;
    let src_ds = in_memory_dataset(
        &[source_band],
        &RasterSpec {
            geotransform: source.metadata.geotransform,
            projection: &source.metadata.projection,
            nodata: source_nodata,
            pixel_type: PixelType::Float64,
            band_descriptions: &[],
        },
    )?;

    let ref_meta = &reference.metadata;
    let filled = Array2::from_elem((ref_meta.size_y, ref_meta.size_x), nodata);
    let dst_spec = RasterSpec {
        geotransform: ref_meta.geotransform,
        projection: &ref_meta.projection,
        nodata: Some(nodata),
        pixel_type: PixelType::Float32,
        band_descriptions: &[],
    };
    let dst_ds = in_memory_dataset(&[filled], &dst_spec)?;
    reproject_nearest(&src_ds, &dst_ds)?;

    let mut aligned = RasterReader::from_dataset(dst_ds)?.read_band(1)?;
    if let Some(src_nd) = source_nodata {
        aligned.mapv_inplace(|v| if v == src_nd { nodata } else { v });
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_geotiff(out_path, &[aligned], &dst_spec)?;
    info!("Aligned raster written to {:?}", out_path);
    Ok(())
}

/// Set band descriptions (e.g. years) on an existing raster, in place.
pub fn annotate_bands(raster_path: &Path, band_names: &[String]) -> Result<()> {
    use gdal::Metadata;

    let dataset = open_for_update(raster_path)?;
    let count = dataset.raster_count() as usize;
    if band_names.len() != count {
        return Err(Error::Config(format!(
            "{} band names for {} bands",
            band_names.len(),
            count
        )));
    }
    for (i, name) in band_names.iter().enumerate() {
        let mut band = dataset.rasterband(i + 1).map_err(crate::io::GdalError::from)?;
        band.set_description(name).map_err(crate::io::GdalError::from)?;
    }
    info!("Band descriptions set on {:?}", raster_path);
    Ok(())
}

/// Per-band pixel statistics of `inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct BandReport {
    pub band: usize,
    pub description: String,
    pub nodata_pixels: usize,
    pub valid_pixels: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

/// Diagnostic summary of a raster.
#[derive(Debug, Clone, Serialize)]
pub struct RasterReport {
    pub path: PathBuf,
    pub bands: usize,
    pub nodata: Option<f64>,
    pub resolution: (f64, f64),
    pub crs: String,
    pub band_reports: Vec<BandReport>,
}

impl std::fmt::Display for BandReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Band {}", self.band)?;
        if !self.description.is_empty() {
            write!(f, " ({})", self.description)?;
        }
        match (self.min, self.max, self.mean) {
            (Some(min), Some(max), Some(mean)) => write!(
                f,
                ": {} nodata, {} valid, min {}, max {}, mean {:.4}",
                self.nodata_pixels, self.valid_pixels, min, max, mean
            ),
            _ => write!(f, ": only no-data values ({} pixels)", self.nodata_pixels),
        }
    }
}

impl std::fmt::Display for RasterReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Raster: {}", self.path.display())?;
        writeln!(f, "Bands: {}", self.bands)?;
        match self.nodata {
            Some(nd) => writeln!(f, "NoData: {}", nd)?,
            None => writeln!(f, "NoData: none")?,
        }
        writeln!(f, "Resolution: {} x {}", self.resolution.0, self.resolution.1)?;
        write!(f, "CRS: {}", if self.crs.is_empty() { "undefined" } else { &self.crs })?;
        for band in &self.band_reports {
            write!(f, "\n{}", band)?;
        }
        Ok(())
    }
}

pub fn band_report(band: usize, description: String, data: &Array2<f64>, nodata: Option<f64>) -> BandReport {
    let mut valid = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in data.iter() {
        if nodata.is_some_and(|nd| v == nd) {
            continue;
        }
        valid += 1;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    let has_valid = valid > 0;
    BandReport {
        band,
        description,
        nodata_pixels: data.len() - valid,
        valid_pixels: valid,
        min: has_valid.then_some(min),
        max: has_valid.then_some(max),
        mean: has_valid.then(|| sum / valid as f64),
    }
}

/// Report band count, no-data, resolution, CRS and per-band statistics. Read-only.
pub fn inspect(raster_path: &Path) -> Result<RasterReport> {
    let reader = RasterReader::open(raster_path)?;
    let meta = &reader.metadata;
    info!("=== Raster: {:?} ===", raster_path);
    info!("Bands: {}", meta.bands);
    info!("NoData: {:?}", meta.nodata);
    info!("Resolution: {:?}", meta.geotransform.resolution());
    info!("CRS: {}", meta.epsg.as_deref().unwrap_or(&meta.projection));

    let mut band_reports = Vec::with_capacity(meta.bands);
    for idx in 1..=meta.bands {
        let data = reader.read_band(idx)?;
        let description = meta.band_descriptions.get(idx - 1).cloned().unwrap_or_default();
        let report = band_report(idx, description, &data, meta.nodata);
        match (report.min, report.max, report.mean) {
            (Some(min), Some(max), Some(mean)) => info!(
                "Band {}: {} nodata, {} valid, min {}, max {}, mean {:.4}",
                idx, report.nodata_pixels, report.valid_pixels, min, max, mean
            ),
            _ => info!("Band {} holds only no-data values", idx),
        }
        band_reports.push(report);
    }

    Ok(RasterReport {
        path: raster_path.to_path_buf(),
        bands: meta.bands,
        nodata: meta.nodata,
        resolution: meta.geotransform.resolution(),
        crs: meta.epsg.clone().unwrap_or_else(|| meta.projection.clone()),
        band_reports,
    })
}
