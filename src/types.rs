//! Shared types used across canopyjoin.
//! Includes the affine `GeoTransform`, the output `Scale`, raster `PixelType`
//! and the loosely typed `AttrValue` read from vector attribute tables.
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// GDAL-ordered affine coefficients
/// `[origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height]`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    pub fn new(coefficients: [f64; 6]) -> Self {
        GeoTransform(coefficients)
    }

    /// Map fractional (col, row) image coordinates to geographic (x, y).
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let gt = &self.0;
        (
            gt[0] + col * gt[1] + row * gt[2],
            gt[3] + col * gt[4] + row * gt[5],
        )
    }

    /// Geographic coordinates of the centre of pixel (row, col).
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Inverse mapping, `None` for a degenerate transform.
    pub fn invert(&self) -> Option<GeoTransform> {
        let gt = &self.0;
        let det = gt[1] * gt[5] - gt[2] * gt[4];
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = gt[5] * inv_det;
        let b = -gt[2] * inv_det;
        let d = -gt[4] * inv_det;
        let e = gt[1] * inv_det;
        Some(GeoTransform([
            -(a * gt[0] + b * gt[3]),
            a,
            b,
            -(d * gt[0] + e * gt[3]),
            d,
            e,
        ]))
    }

    /// (row, col) of the pixel containing geographic point (x, y).
    /// Indices can fall outside the raster; callers check bounds.
    pub fn pixel_index(&self, x: f64, y: f64) -> Option<(i64, i64)> {
        let inv = self.invert()?;
        let (col, row) = inv.apply(x, y);
        Some((row.floor() as i64, col.floor() as i64))
    }

    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }

    /// Absolute pixel size (x, y).
    pub fn resolution(&self) -> (f64, f64) {
        (self.0[1].abs(), self.0[5].abs())
    }
}

/// Output schema family. Parcel scale carries LiDAR summary metrics,
/// pixel scale only identity and provenance columns.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Parcel,
    Pixel,
}

impl FromStr for Scale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parcel" | "parcelle" => Ok(Scale::Parcel),
            "pixel" => Ok(Scale::Pixel),
            other => Err(Error::Config(format!(
                "scale must be 'parcel' or 'pixel', got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scale::Parcel => write!(f, "parcel"),
            Scale::Pixel => write!(f, "pixel"),
        }
    }
}

/// Pixel data type of written rasters.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    #[value(name = "uint8")]
    UInt8,
    #[value(name = "int16")]
    Int16,
    #[value(name = "uint16")]
    UInt16,
    #[value(name = "int32")]
    Int32,
    #[value(name = "float32")]
    Float32,
    #[value(name = "float64")]
    Float64,
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PixelType::UInt8 => "uint8",
            PixelType::Int16 => "int16",
            PixelType::UInt16 => "uint16",
            PixelType::Int32 => "int32",
            PixelType::Float32 => "float32",
            PixelType::Float64 => "float64",
        };
        write!(f, "{}", s)
    }
}

/// Attribute value read from a vector layer.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum AttrValue {
    #[default]
    Null,
    Int(i64),
    Real(f64),
    Text(String),
    Date(NaiveDate),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        match self {
            AttrValue::Null => true,
            AttrValue::Real(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Numeric coercion; unparseable text becomes `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Real(v) if v.is_finite() => Some(*v),
            AttrValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// First four characters of the textual form, used to reduce dates to a year.
    pub fn year_prefix(&self) -> Option<String> {
        match self {
            AttrValue::Date(d) => Some(format!("{:04}", d.year())),
            v if v.is_null() => None,
            v => {
                let text = v.to_string();
                if text.eq_ignore_ascii_case("nan") {
                    return None;
                }
                Some(text.chars().take(4).collect())
            }
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Null => Ok(()),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Real(v) => write!(f, "{}", v),
            AttrValue::Text(s) => write!(f, "{}", s),
            AttrValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Real(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_center_uses_half_pixel_offset() {
        let gt = GeoTransform([1000.0, 10.0, 0.0, 2000.0, 0.0, -10.0]);
        assert_eq!(gt.pixel_center(0, 0), (1005.0, 1995.0));
        assert_eq!(gt.pixel_center(1, 2), (1025.0, 1985.0));
    }

    #[test]
    fn pixel_index_inverts_center() {
        let gt = GeoTransform([500.0, 2.0, 0.5, 800.0, 0.25, -2.0]);
        let (x, y) = gt.pixel_center(7, 3);
        assert_eq!(gt.pixel_index(x, y), Some((7, 3)));
    }

    #[test]
    fn degenerate_transform_has_no_inverse() {
        let gt = GeoTransform([0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(gt.invert().is_none());
    }

    #[test]
    fn scale_parsing_rejects_unknown_values() {
        assert_eq!("parcel".parse::<Scale>().unwrap(), Scale::Parcel);
        assert_eq!("Pixel".parse::<Scale>().unwrap(), Scale::Pixel);
        assert!(matches!("county".parse::<Scale>(), Err(Error::Config(_))));
    }

    #[test]
    fn attr_value_coercion() {
        assert_eq!(AttrValue::from("2012").as_f64(), Some(2012.0));
        assert_eq!(AttrValue::from("unknown").as_f64(), None);
        assert_eq!(AttrValue::Int(7).to_string(), "7");
        assert!(AttrValue::Real(f64::NAN).is_null());
    }

    #[test]
    fn year_prefix_truncates_dates_and_text() {
        let d = NaiveDate::from_ymd_opt(2019, 5, 1).unwrap();
        assert_eq!(AttrValue::Date(d).year_prefix().as_deref(), Some("2019"));
        assert_eq!(AttrValue::from("2021-03-04").year_prefix().as_deref(), Some("2021"));
        assert_eq!(AttrValue::from("nan").year_prefix(), None);
        assert_eq!(AttrValue::Null.year_prefix(), None);
    }
}
