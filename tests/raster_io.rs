//! GDAL round trips on tiny rasters written into temporary directories:
//! extraction, metric merging, band annotation, inspection and alignment.

use std::path::{Path, PathBuf};

use canopyjoin::core::extract::{extract_multiband, extract_single_metric_set};
use canopyjoin::core::masking::{align_to_reference, annotate_bands, inspect};
use canopyjoin::io::gdal::{RasterSpec, write_geotiff};
use canopyjoin::{Error, GeoTransform, PixelType, RasterReader};
use ndarray::{Array2, array};
use tempfile::TempDir;

// ============================================================================
// Helper Functions
// ============================================================================

fn write_raster(
    path: &Path,
    bands: &[Array2<f64>],
    gt: [f64; 6],
    nodata: Option<f64>,
    pixel_type: PixelType,
) {
    write_geotiff(
        path,
        bands,
        &RasterSpec {
            geotransform: GeoTransform(gt),
            projection: "",
            nodata,
            pixel_type,
            band_descriptions: &[],
        },
    )
    .unwrap();
}

const GT_10M: [f64; 6] = [100.0, 10.0, 0.0, 200.0, 0.0, -10.0];

// ============================================================================
// Extraction
// ============================================================================

#[test]
fn extracts_valid_pixels_with_centre_coordinates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("confidence_T31TCJ.tif");
    write_raster(&path, &[array![[0.0, 5.0], [7.0, 0.0]]], GT_10M, Some(0.0), PixelType::UInt8);

    let samples = extract_multiband(&path, &[2020], 0.0).unwrap().unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!((samples[0].x, samples[0].y, samples[0].value), (115.0, 195.0, 5.0));
    assert_eq!((samples[1].x, samples[1].y, samples[1].value), (105.0, 185.0, 7.0));
    assert!(samples.iter().all(|s| s.band_label == 2020 && s.tile == "T31TCJ"));
}

#[test]
fn empty_bands_are_skipped_and_labels_follow_band_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conf_T1.tif");
    let bands = [
        array![[0.0, 0.0], [0.0, 0.0]],
        array![[3.0, 0.0], [0.0, 0.0]],
        array![[0.0, 0.0], [0.0, 4.0]],
    ];
    write_raster(&path, &bands, GT_10M, Some(0.0), PixelType::UInt8);

    let samples = extract_multiband(&path, &[2019, 2020, 2021], 0.0).unwrap().unwrap();
    let labels: Vec<i32> = samples.iter().map(|s| s.band_label).collect();
    assert_eq!(labels, vec![2020, 2021]);

    // fewer labels than bands: extraction stops at the last label
    let samples = extract_multiband(&path, &[2019, 2020], 0.0).unwrap().unwrap();
    assert_eq!(samples.len(), 1);

    let all_empty = dir.path().join("conf_T2.tif");
    write_raster(&all_empty, &[Array2::zeros((2, 2))], GT_10M, Some(0.0), PixelType::UInt8);
    assert!(extract_multiband(&all_empty, &[2019], 0.0).unwrap().is_none());
}

// ============================================================================
// Metric tables
// ============================================================================

#[test]
fn metric_rasters_merge_on_coordinates() {
    let dir = TempDir::new().unwrap();
    let cc = dir.path().join("cc.tif");
    let moch = dir.path().join("moch.tif");
    write_raster(&cc, &[array![[0.8, -999.0], [0.6, 0.7]]], GT_10M, Some(-999.0), PixelType::Float32);
    write_raster(&moch, &[array![[20.0, 21.0], [-999.0, 23.0]]], GT_10M, Some(-999.0), PixelType::Float32);

    let metrics = vec![
        ("CC".to_string(), cc),
        ("MOCH".to_string(), moch),
        ("ENL".to_string(), dir.path().join("missing.tif")),
    ];
    let table = extract_single_metric_set(&metrics, -999.0).unwrap();
    assert_eq!(table.metrics, vec!["CC", "MOCH"]);
    assert_eq!(table.rows.len(), 4);
    assert_eq!(table.get(115.0, 195.0).unwrap().values, vec![None, Some(21.0)]);
    assert_eq!(table.get(105.0, 185.0).unwrap().values[1], None);
    assert!(table.get(115.0, 185.0).unwrap().values.iter().all(Option::is_some));
}

#[test]
fn metric_rasters_on_different_grids_are_rejected() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.tif");
    let b = dir.path().join("b.tif");
    write_raster(&a, &[array![[1.0]]], GT_10M, Some(-999.0), PixelType::Float32);
    let shifted = [105.0, 10.0, 0.0, 200.0, 0.0, -10.0];
    write_raster(&b, &[array![[1.0]]], shifted, Some(-999.0), PixelType::Float32);

    let metrics = vec![("A".to_string(), a), ("B".to_string(), b.clone())];
    match extract_single_metric_set(&metrics, -999.0) {
        Err(Error::GridMismatch { other, .. }) => assert_eq!(other, b),
        other => panic!("expected a grid mismatch, got {:?}", other.map(|t| t.rows.len())),
    }
}

// ============================================================================
// Annotation and inspection
// ============================================================================

#[test]
fn band_names_are_written_in_place() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stack.tif");
    write_raster(&path, &[Array2::zeros((2, 2)), Array2::ones((2, 2))], GT_10M, Some(0.0), PixelType::UInt8);

    annotate_bands(&path, &["2019".to_string(), "2020".to_string()]).unwrap();
    let reader = RasterReader::open(&path).unwrap();
    assert_eq!(reader.metadata.band_descriptions, vec!["2019", "2020"]);

    let wrong = annotate_bands(&path, &["2019".to_string()]);
    assert!(matches!(wrong, Err(Error::Config(_))));
}

#[test]
fn inspect_reports_per_band_statistics() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conf.tif");
    write_raster(
        &path,
        &[array![[0.0, 2.0], [4.0, 0.0]], Array2::zeros((2, 2))],
        GT_10M,
        Some(0.0),
        PixelType::UInt8,
    );

    let report = inspect(&path).unwrap();
    assert_eq!(report.bands, 2);
    assert_eq!(report.nodata, Some(0.0));
    assert_eq!(report.resolution, (10.0, 10.0));
    let first = &report.band_reports[0];
    assert_eq!((first.valid_pixels, first.nodata_pixels), (2, 2));
    assert_eq!((first.min, first.max, first.mean), (Some(2.0), Some(4.0), Some(3.0)));
    assert_eq!(report.band_reports[1].valid_pixels, 0);
}

// ============================================================================
// Alignment
// ============================================================================

#[test]
fn alignment_resamples_onto_reference_grid() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("lidar_20m.tif");
    let reference = dir.path().join("confidence_10m.tif");
    let output: PathBuf = dir.path().join("aligned").join("lidar_10m.tif");

    // 2x2 pixels of 20 m covering x 0..40; the reference extends to x = 60
    write_raster(&source, &[array![[1.0, 2.0], [3.0, 4.0]]], [0.0, 20.0, 0.0, 40.0, 0.0, -20.0], None, PixelType::Float32);
    write_raster(&reference, &[Array2::zeros((4, 6))], [0.0, 10.0, 0.0, 40.0, 0.0, -10.0], Some(0.0), PixelType::UInt8);

    align_to_reference(&source, &reference, &output).unwrap();

    let reader = RasterReader::open(&output).unwrap();
    assert_eq!(reader.metadata.bands, 1);
    assert_eq!((reader.metadata.size_x, reader.metadata.size_y), (6, 4));
    assert_eq!(reader.metadata.nodata, Some(-999.0));
    assert_eq!(reader.metadata.geotransform.0, [0.0, 10.0, 0.0, 40.0, 0.0, -10.0]);
    let band = reader.read_band(1).unwrap();
    assert_eq!(band.row(0).to_vec(), vec![1.0, 1.0, 2.0, 2.0, -999.0, -999.0]);
    assert_eq!(band.row(3).to_vec(), vec![3.0, 3.0, 4.0, 4.0, -999.0, -999.0]);
}
