//! GeoPackage access for parcel layers: read a named layer into plain attribute
//! maps plus `geo` geometries, and write canonical parcel records back out.
use std::collections::HashMap;
use std::path::Path;

use gdal::spatial_ref::SpatialRef;
use gdal::vector::{
    FieldValue, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType, ToGdal,
};
use gdal::{Dataset, DriverManager};
use tracing::{debug, info};

use super::gdal::GdalError;
use crate::core::cleaning::ParcelRecord;
use crate::types::{AttrValue, Scale};

/// One feature of a source layer before cleaning.
#[derive(Debug, Clone)]
pub struct RawParcel {
    pub attributes: HashMap<String, AttrValue>,
    pub geometry: geo::Geometry<f64>,
}

/// A source layer: its features and the CRS they are expressed in.
#[derive(Debug, Clone, Default)]
pub struct ParcelLayer {
    pub crs: Option<String>,
    pub features: Vec<RawParcel>,
}

fn to_attr(value: Option<FieldValue>) -> AttrValue {
    match value {
        None => AttrValue::Null,
        Some(FieldValue::IntegerValue(v)) => AttrValue::Int(v as i64),
        Some(FieldValue::Integer64Value(v)) => AttrValue::Int(v),
        Some(FieldValue::RealValue(v)) => AttrValue::Real(v),
        Some(FieldValue::StringValue(s)) => AttrValue::Text(s),
        Some(FieldValue::DateValue(d)) => AttrValue::Date(d),
        Some(FieldValue::DateTimeValue(dt)) => AttrValue::Date(dt.date_naive()),
        Some(other) => AttrValue::Text(format!("{:?}", other)),
    }
}

/// Load every feature of `layer_name` from a GeoPackage (or any OGR source).
/// Features without geometry are skipped.
pub fn read_parcel_layer(path: &Path, layer_name: &str) -> Result<ParcelLayer, GdalError> {
    let dataset = Dataset::open(path)?;
    let mut layer = dataset.layer_by_name(layer_name)?;
    let crs = layer.spatial_ref().and_then(|srs| srs.to_wkt().ok());

    let mut features = Vec::new();
    let mut skipped = 0usize;
    for feature in layer.features() {
        let geometry = match feature.geometry() {
            Some(g) => g.to_geo()?,
            None => {
                skipped += 1;
                continue;
            }
        };
        let attributes = feature
            .fields()
            .map(|(name, value)| (name, to_attr(value)))
            .collect();
        features.push(RawParcel {
            attributes,
            geometry,
        });
    }
    if skipped > 0 {
        debug!("Layer {}: skipped {} features without geometry", layer_name, skipped);
    }
    info!(
        "Loaded {} features from layer {} of {:?}",
        features.len(),
        layer_name,
        path
    );
    Ok(ParcelLayer { crs, features })
}

/// Write canonical parcel records to a new GeoPackage layer.
/// Columns follow the scale's canonical order; attribute columns are stored as text or real.
pub fn write_parcel_layer(
    path: &Path,
    layer_name: &str,
    records: &[ParcelRecord],
    scale: Scale,
    crs: Option<&str>,
) -> Result<(), GdalError> {
    let driver = DriverManager::get_driver_by_name("GPKG")?;
    let mut ds = driver.create_vector_only(path)?;
    let srs = match crs {
        Some(wkt) if !wkt.is_empty() => Some(SpatialRef::from_wkt(wkt)?),
        _ => None,
    };
    let mut layer = ds.create_layer(LayerOptions {
        name: layer_name,
        srs: srs.as_ref(),
        ty: OGRwkbGeometryType::wkbPolygon,
        ..Default::default()
    })?;

    let columns = ParcelRecord::columns(scale);
    let defs: Vec<(&str, OGRFieldType::Type)> = columns
        .iter()
        .map(|&name| {
            let ty = if ParcelRecord::is_numeric_column(name) {
                OGRFieldType::OFTReal
            } else {
                OGRFieldType::OFTString
            };
            (name, ty)
        })
        .collect();
    layer.create_defn_fields(&defs)?;

    for record in records {
        let values = record.values(scale);
        let mut names = Vec::with_capacity(values.len());
        let mut fields = Vec::with_capacity(values.len());
        for (name, value) in columns.iter().zip(values.iter()) {
            let field = if ParcelRecord::is_numeric_column(name) {
                value.as_f64().map(FieldValue::RealValue)
            } else if value.is_null() {
                None
            } else {
                Some(FieldValue::StringValue(value.to_string()))
            };
            if let Some(field) = field {
                names.push(*name);
                fields.push(field);
            }
        }
        let geometry = record
            .geometry
            .to_gdal()
            .map_err(|e| GdalError::Vector(e.to_string()))?;
        layer.create_feature_fields(geometry, &names, &fields)?;
    }
    info!(
        "Wrote {} parcels to layer {} of {:?}",
        records.len(),
        layer_name,
        path
    );
    Ok(())
}
