use gdal::cpl::CslStringList;
use gdal::raster::{Buffer, GdalType, ResampleAlg};
use gdal::{
    Dataset, DatasetOptions, DriverManager, GdalOpenFlags, Metadata,
    errors::GdalError as GdalCrateError,
};
use ndarray::Array2;
use std::path::Path;
use thiserror::Error;

use crate::types::{GeoTransform, PixelType};

/// Errors encountered when using the GDAL raster adapters
#[derive(Debug, Error)]
pub enum GdalError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalCrateError),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Band index {0} out of range (dataset has {1} bands)")]
    BandOutOfRange(usize, usize),
    #[error("Dimension mismatch: expected {0}x{1}, got {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),
    #[error("Reprojection failed with CPL error code {0}")]
    Reproject(u32),
    #[error("Vector layer error: {0}")]
    Vector(String),
}

/// Georeferencing and layout of a raster dataset
#[derive(Debug, Clone)]
pub struct RasterMetadata {
    /// Width (pixels) of the raster
    pub size_x: usize,
    /// Height (lines) of the raster
    pub size_y: usize,
    /// Number of raster bands
    pub bands: usize,
    pub geotransform: GeoTransform,
    /// Projection as returned by GDAL (WKT)
    pub projection: String,
    /// `EPSG:XXXX` when the WKT carries an authority code
    pub epsg: Option<String>,
    /// No-data value declared on band 1
    pub nodata: Option<f64>,
    pub band_descriptions: Vec<String>,
}

impl RasterMetadata {
    /// Describe how `other` differs from this grid, `None` when identical.
    pub fn grid_difference(&self, other: &RasterMetadata) -> Option<String> {
        if (self.size_x, self.size_y) != (other.size_x, other.size_y) {
            return Some(format!(
                "size {}x{} vs {}x{}",
                self.size_x, self.size_y, other.size_x, other.size_y
            ));
        }
        if self.geotransform != other.geotransform {
            return Some(format!(
                "geotransform {:?} vs {:?}",
                self.geotransform.0, other.geotransform.0
            ));
        }
        let same_crs = match (&self.epsg, &other.epsg) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => self.projection == other.projection,
        };
        if !same_crs {
            return Some("coordinate reference systems differ".to_string());
        }
        None
    }
}

/// Read-only access to a GDAL raster
pub struct RasterReader {
    pub dataset: Dataset,
    pub metadata: RasterMetadata,
}

// Helper to extract EPSG code from WKT authority tag
pub(crate) fn parse_epsg(wkt: &str) -> Option<String> {
    if wkt.starts_with("EPSG:") {
        return Some(wkt.to_string());
    }
    const KEY: &str = "AUTHORITY[\"EPSG\",\"";
    if let Some(idx) = wkt.rfind(KEY) {
        let start = idx + KEY.len();
        if let Some(end) = wkt[start..].find('"') {
            let code = &wkt[start..start + end];
            return Some(format!("EPSG:{}", code));
        }
    }
    None
}

impl RasterReader {
    /// Open a GDAL-supported raster (GeoTIFF, VRT, ...)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GdalError> {
        let dataset = Dataset::open(path.as_ref())?;
        Self::from_dataset(dataset)
    }

    pub fn from_dataset(dataset: Dataset) -> Result<Self, GdalError> {
        let (size_x, size_y) = dataset.raster_size();
        let bands = dataset.raster_count() as usize;
        if bands == 0 {
            return Err(GdalError::UnsupportedFormat("No raster bands found".into()));
        }
        let geotransform = match dataset.geo_transform() {
            Ok(gt) => GeoTransform(gt),
            Err(_) => GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        };
        let projection = dataset.projection();
        let epsg = parse_epsg(&projection);
        let nodata = dataset.rasterband(1)?.no_data_value();
        let mut band_descriptions = Vec::with_capacity(bands);
        for idx in 1..=bands {
            let band = dataset.rasterband(idx)?;
            band_descriptions.push(band.description().unwrap_or_default());
        }
        Ok(RasterReader {
            dataset,
            metadata: RasterMetadata {
                size_x: size_x as usize,
                size_y: size_y as usize,
                bands,
                geotransform,
                projection,
                epsg,
                nodata,
                band_descriptions,
            },
        })
    }

    /// Read a single band (1-based index) as an f64 ndarray of shape (height, width)
    pub fn read_band(&self, index: usize) -> Result<Array2<f64>, GdalError> {
        if index == 0 || index > self.metadata.bands {
            return Err(GdalError::BandOutOfRange(index, self.metadata.bands));
        }
        let band = self.dataset.rasterband(index)?;
        let window = (self.metadata.size_x, self.metadata.size_y);
        let buf = band.read_as::<f64>(
            (0, 0),
            window,
            window,
            Some(ResampleAlg::NearestNeighbour),
        )?;
        let data_vec = buf.data().to_vec();
        let len = data_vec.len();
        Array2::from_shape_vec((self.metadata.size_y, self.metadata.size_x), data_vec).map_err(
            |_| {
                GdalError::DimensionMismatch(
                    self.metadata.size_x,
                    self.metadata.size_y,
                    len,
                    1,
                )
            },
        )
    }

    /// Read all bands into a vector of f64 ndarrays
    pub fn read_all_bands(&self) -> Result<Vec<Array2<f64>>, GdalError> {
        let mut result = Vec::with_capacity(self.metadata.bands);
        for idx in 1..=self.metadata.bands {
            result.push(self.read_band(idx)?);
        }
        Ok(result)
    }
}

/// Open a raster in update mode (band descriptions and other in-place annotations).
pub fn open_for_update(path: &Path) -> Result<Dataset, GdalError> {
    let options = DatasetOptions {
        open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_RASTER,
        ..DatasetOptions::default()
    };
    Ok(Dataset::open_ex(path, options)?)
}

/// Layout of a raster about to be written
#[derive(Debug, Clone)]
pub struct RasterSpec<'a> {
    pub geotransform: GeoTransform,
    pub projection: &'a str,
    pub nodata: Option<f64>,
    pub pixel_type: PixelType,
    pub band_descriptions: &'a [String],
}

/// Write bands to an LZW-compressed GeoTIFF, casting samples to `spec.pixel_type`.
pub fn write_geotiff(path: &Path, bands: &[Array2<f64>], spec: &RasterSpec) -> Result<(), GdalError> {
    let mut options = CslStringList::new();
    options.set_name_value("COMPRESS", "LZW")?;
    match spec.pixel_type {
        PixelType::UInt8 => write_typed::<u8>("GTiff", path, bands, spec, &options, |v| v as u8)?,
        PixelType::Int16 => write_typed::<i16>("GTiff", path, bands, spec, &options, |v| v as i16)?,
        PixelType::UInt16 => write_typed::<u16>("GTiff", path, bands, spec, &options, |v| v as u16)?,
        PixelType::Int32 => write_typed::<i32>("GTiff", path, bands, spec, &options, |v| v as i32)?,
        PixelType::Float32 => write_typed::<f32>("GTiff", path, bands, spec, &options, |v| v as f32)?,
        PixelType::Float64 => write_typed::<f64>("GTiff", path, bands, spec, &options, |v| v)?,
    };
    Ok(())
}

/// Build an in-memory dataset holding `bands`; used as a warp source or destination.
pub fn in_memory_dataset(bands: &[Array2<f64>], spec: &RasterSpec) -> Result<Dataset, GdalError> {
    let options = CslStringList::new();
    match spec.pixel_type {
        PixelType::Float32 => write_typed::<f32>("MEM", Path::new(""), bands, spec, &options, |v| v as f32),
        _ => write_typed::<f64>("MEM", Path::new(""), bands, spec, &options, |v| v),
    }
}

fn write_typed<T: GdalType + Copy>(
    driver_name: &str,
    path: &Path,
    bands: &[Array2<f64>],
    spec: &RasterSpec,
    options: &CslStringList,
    cast: fn(f64) -> T,
) -> Result<Dataset, GdalError> {
    let first = bands
        .first()
        .ok_or_else(|| GdalError::UnsupportedFormat("no bands to write".into()))?;
    let (rows, cols) = first.dim();
    for band in bands {
        if band.dim() != (rows, cols) {
            let (r, c) = band.dim();
            return Err(GdalError::DimensionMismatch(cols, rows, c, r));
        }
    }

    let driver = DriverManager::get_driver_by_name(driver_name)?;
    let mut ds =
        driver.create_with_band_type_with_options::<T, _>(path, cols, rows, bands.len(), options)?;
    ds.set_geo_transform(&spec.geotransform.0)?;
    if !spec.projection.is_empty() {
        ds.set_projection(spec.projection)?;
    }

    for (i, data) in bands.iter().enumerate() {
        let mut band = ds.rasterband(i + 1)?;
        if let Some(nodata) = spec.nodata {
            band.set_no_data_value(Some(nodata))?;
        }
        if let Some(desc) = spec.band_descriptions.get(i) {
            band.set_description(desc)?;
        }
        let values: Vec<T> = data.iter().map(|&v| cast(v)).collect();
        let mut buf = Buffer::new((cols, rows), values);
        band.write((0, 0), (cols, rows), &mut buf)?;
    }
    Ok(ds)
}

/// Nearest-neighbour reprojection of `src` onto the grid of `dst`.
/// Source and destination no-data values declared on the bands are honoured.
pub fn reproject_nearest(src: &Dataset, dst: &Dataset) -> Result<(), GdalError> {
    let rc = unsafe {
        gdal_sys::GDALReprojectImage(
            src.c_dataset(),
            std::ptr::null(),
            dst.c_dataset(),
            std::ptr::null(),
            gdal_sys::GDALResampleAlg::GRA_NearestNeighbour,
            0.0,
            0.0,
            None,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if rc != gdal_sys::CPLErr::CE_None {
        return Err(GdalError::Reproject(rc as u32));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(gt: [f64; 6], projection: &str) -> RasterMetadata {
        RasterMetadata {
            size_x: 4,
            size_y: 3,
            bands: 1,
            geotransform: GeoTransform(gt),
            projection: projection.to_string(),
            epsg: parse_epsg(projection),
            nodata: None,
            band_descriptions: vec![],
        }
    }

    #[test]
    fn epsg_is_parsed_from_wkt_authority() {
        let wkt = r#"PROJCS["RGF93 / Lambert-93",AUTHORITY["EPSG","2154"]]"#;
        assert_eq!(parse_epsg(wkt).as_deref(), Some("EPSG:2154"));
        assert_eq!(parse_epsg("EPSG:4326").as_deref(), Some("EPSG:4326"));
        assert_eq!(parse_epsg("LOCAL_CS[\"x\"]"), None);
    }

    #[test]
    fn grid_difference_reports_transform_and_size() {
        let a = meta([0.0, 10.0, 0.0, 100.0, 0.0, -10.0], "EPSG:2154");
        let b = meta([5.0, 10.0, 0.0, 100.0, 0.0, -10.0], "EPSG:2154");
        assert!(a.grid_difference(&a.clone()).is_none());
        assert!(a.grid_difference(&b).unwrap().contains("geotransform"));

        let mut c = a.clone();
        c.size_x = 5;
        assert!(a.grid_difference(&c).unwrap().contains("size"));

        let d = meta([0.0, 10.0, 0.0, 100.0, 0.0, -10.0], "EPSG:32631");
        assert!(a.grid_difference(&d).is_some());
    }
}
