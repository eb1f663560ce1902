//! Parcel layer cleaning: cultivar validation and spelling correction, per-source
//! schema normalization into typed canonical records, and finalization with a
//! source label and globally unique identifier.
use std::collections::{HashMap, HashSet};

use geo::{Geometry, Polygon};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::io::vector::ParcelLayer;
use crate::types::{AttrValue, Scale};

/// Canonical columns at parcel scale, in output order.
pub const PARCEL_COLUMNS: [&str; 14] = [
    "unique_id",
    "id_parc",
    "annee_plan",
    "cultivar_n",
    "source",
    "PAI_GF_mean",
    "VCI_mean",
    "CC",
    "MOCH",
    "ENL",
    "Z_mean",
    "densite",
    "biomass_mean",
    "lidar_date",
];

/// Canonical columns at pixel scale, in output order.
pub const PIXEL_COLUMNS: [&str; 6] = [
    "unique_id",
    "id_parc",
    "annee_plan",
    "cultivar_n",
    "source",
    "lidar_date",
];

/// LiDAR summary columns carried only at parcel scale.
pub const LIDAR_COLUMNS: [&str; 8] = [
    "PAI_GF_mean",
    "VCI_mean",
    "CC",
    "MOCH",
    "ENL",
    "Z_mean",
    "densite",
    "biomass_mean",
];

/// Planting density assigned to the Tarn-et-Garonne layers, which carry none.
pub const DEFAULT_DENSITY_DEP82: f64 = 204.0;

static CULTIVAR_CORRECTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("a4a", "A4A"),
        ("i 2014", "i214"),
        ("i 214", "i214"),
        ("i214", "i214"),
        ("i45/51", "i45/51"),
        ("i 45/51", "i45/51"),
        ("ameramo", "aleramo"),
        ("aleramo", "aleramo"),
        ("dvina", "diva"),
        ("diva", "diva"),
        ("raspage", "raspalje"),
        ("raspalje", "raspalje"),
        ("hoogorst", "hoogvorst"),
        ("hoogvorst", "hoogvorst"),
    ])
});

// Mixtures, trials and non-poplar species.
static EXCLUDED_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(melange|essai|essais|futaie melangee|divers|et|noyer hybride|noyer commun|robinier|cemagref|cèdre|vesten dellinois|noyer/robinier|A 4 A )\b",
    )
    .expect("static regex")
});

static TRIAL_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,4}-\d{1,2}").expect("static regex"));

static HYPHEN_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*-\s*").expect("static regex"));

/// True when a free-text cultivar field names exactly one cultivar.
/// `None` stands for a missing or non-textual value.
pub fn is_single_cultivar(value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return false;
    }
    if value.contains(',') {
        return false;
    }
    if EXCLUDED_WORDS.is_match(value) || TRIAL_CODE.is_match(value) {
        return false;
    }
    let lowered = trimmed.to_lowercase();
    let names: HashSet<&str> = HYPHEN_SPLIT.split(&lowered).collect();
    names.len() == 1
}

/// Canonical spelling of a cultivar name; unknown names are returned unchanged.
pub fn normalize_cultivar_name(raw_name: &str) -> String {
    CULTIVAR_CORRECTIONS
        .get(raw_name.to_lowercase().as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| raw_name.to_string())
}

/// Capitalize the first letter of each whitespace-separated word, lowercase the rest.
pub fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// LiDAR-derived summary metrics of a parcel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LidarSummary {
    pub pai_gf_mean: Option<f64>,
    pub vci_mean: Option<f64>,
    pub cc: Option<f64>,
    pub moch: Option<f64>,
    pub enl: Option<f64>,
    pub z_mean: Option<f64>,
    pub densite: Option<f64>,
    pub biomass_mean: Option<f64>,
}

impl LidarSummary {
    fn from_attributes(attrs: &HashMap<String, AttrValue>) -> Self {
        let get = |name: &str| attrs.get(name).and_then(AttrValue::as_f64);
        LidarSummary {
            pai_gf_mean: get("PAI_GF_mean"),
            vci_mean: get("VCI_mean"),
            cc: get("CC"),
            moch: get("MOCH"),
            enl: get("ENL"),
            z_mean: get("Z_mean"),
            densite: get("densite"),
            biomass_mean: get("biomass_mean"),
        }
    }

    /// Values in `LIDAR_COLUMNS` order.
    pub fn values(&self) -> [Option<f64>; 8] {
        [
            self.pai_gf_mean,
            self.vci_mean,
            self.cc,
            self.moch,
            self.enl,
            self.z_mean,
            self.densite,
            self.biomass_mean,
        ]
    }
}

/// A cleaned parcel in canonical form.
/// `lidar` is `Some` exactly when the record conforms to the parcel-scale schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelRecord {
    pub unique_id: Option<String>,
    pub id_parc: AttrValue,
    pub annee_plan: AttrValue,
    /// Cultivar as written in the source layer
    pub cultivar: Option<String>,
    pub cultivar_n: Option<String>,
    pub source: Option<String>,
    pub lidar: Option<LidarSummary>,
    pub lidar_date: Option<String>,
    pub geometry: Polygon<f64>,
}

impl ParcelRecord {
    pub fn columns(scale: Scale) -> &'static [&'static str] {
        match scale {
            Scale::Parcel => &PARCEL_COLUMNS,
            Scale::Pixel => &PIXEL_COLUMNS,
        }
    }

    pub fn is_numeric_column(name: &str) -> bool {
        LIDAR_COLUMNS.contains(&name)
    }

    pub fn scale(&self) -> Scale {
        if self.lidar.is_some() {
            Scale::Parcel
        } else {
            Scale::Pixel
        }
    }

    /// Add or drop the LiDAR block so the record matches `scale`.
    pub fn conform_to(&mut self, scale: Scale) {
        match scale {
            Scale::Parcel => {
                self.lidar.get_or_insert_with(LidarSummary::default);
            }
            Scale::Pixel => self.lidar = None,
        }
    }

    /// Attribute values in `columns(scale)` order.
    pub fn values(&self, scale: Scale) -> Vec<AttrValue> {
        let text = |v: &Option<String>| v.clone().map(AttrValue::Text).unwrap_or_default();
        let mut out = vec![
            text(&self.unique_id),
            self.id_parc.clone(),
            self.annee_plan.clone(),
            text(&self.cultivar_n),
            text(&self.source),
        ];
        if scale == Scale::Parcel {
            let lidar = self.lidar.clone().unwrap_or_default();
            out.extend(
                lidar
                    .values()
                    .into_iter()
                    .map(|v| v.map(AttrValue::Real).unwrap_or_default()),
            );
        }
        out.push(text(&self.lidar_date));
        out
    }
}

/// Collects canonical fields from a renamed attribute map and validates
/// the result before producing a `ParcelRecord`.
#[derive(Debug, Default)]
pub struct ParcelRecordBuilder {
    attributes: HashMap<String, AttrValue>,
    geometry: Option<Polygon<f64>>,
}

impl ParcelRecordBuilder {
    pub fn new(attributes: HashMap<String, AttrValue>) -> Self {
        ParcelRecordBuilder {
            attributes,
            geometry: None,
        }
    }

    pub fn geometry(mut self, geometry: Polygon<f64>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn build(self, scale: Scale) -> Result<ParcelRecord> {
        let geometry = self
            .geometry
            .ok_or_else(|| Error::Geometry("parcel record has no geometry".into()))?;
        if geometry.exterior().0.is_empty() {
            return Err(Error::Geometry("parcel polygon is empty".into()));
        }
        let attrs = &self.attributes;
        let text = |name: &str| match attrs.get(name) {
            Some(v) if !v.is_null() => Some(v.to_string()),
            _ => None,
        };
        let lidar = match scale {
            Scale::Parcel => Some(LidarSummary::from_attributes(attrs)),
            Scale::Pixel => None,
        };
        Ok(ParcelRecord {
            unique_id: text("unique_id"),
            id_parc: attrs.get("id_parc").cloned().unwrap_or_default(),
            annee_plan: attrs.get("annee_plan").cloned().unwrap_or_default(),
            cultivar: attrs.get("cultivar").and_then(|v| v.as_str()).map(str::to_string),
            cultivar_n: text("cultivar_n"),
            source: text("source"),
            lidar,
            lidar_date: text("lidar_date"),
            geometry,
        })
    }
}

/// Reduce a geometry to a single polygon: multi-part parcels keep their first part.
fn first_polygon(geometry: &Geometry<f64>) -> Option<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(p.clone()),
        Geometry::MultiPolygon(mp) => mp.0.first().cloned(),
        _ => None,
    }
}

/// Per-source special cases, applied after selection and renaming.
fn apply_layer_rules(attrs: &mut HashMap<String, AttrValue>, layer_name: &str, scale: Scale) -> bool {
    match layer_name {
        "dep47" => {
            if let Some(v) = attrs.remove("Densité") {
                attrs.insert("densite".to_string(), v);
            }
        }
        "dep82_bb" | "dep82_sp" => {
            attrs.insert("densite".to_string(), AttrValue::Real(DEFAULT_DENSITY_DEP82));
        }
        "dep73" => {
            attrs.insert("densite".to_string(), AttrValue::Null);
        }
        "dep10" => {
            if scale == Scale::Parcel {
                for col in [
                    "PAI_GF_mean",
                    "CC",
                    "MOCH",
                    "ENL",
                    "Z_mean",
                    "densite",
                    "biomass_mean",
                    "lidar_date",
                ] {
                    attrs.insert(col.to_string(), AttrValue::Null);
                }
            }
            // A second species recorded on the stand rules it out.
            if let Some(second) = attrs.remove("d_essenc_2") {
                if !second.is_null() {
                    return false;
                }
            }
        }
        _ => {}
    }
    true
}

/// Select, rename and normalize one source layer into canonical records.
/// Parcels that do not name exactly one cultivar are dropped.
pub fn clean_layer(
    layer: &ParcelLayer,
    columns_to_keep: &[String],
    rename_map: &HashMap<String, String>,
    layer_name: &str,
    scale: Scale,
) -> Result<Vec<ParcelRecord>> {
    let kept: Vec<&String> = columns_to_keep.iter().filter(|c| *c != "geometry").collect();
    let available: HashSet<&String> = layer
        .features
        .iter()
        .flat_map(|f| f.attributes.keys())
        .collect();
    for col in &kept {
        if !layer.features.is_empty() && !available.contains(col) {
            warn!("Layer {}: column {} not found, filled with nulls", layer_name, col);
        }
    }
    let renamed = |col: &String| rename_map.get(col).cloned().unwrap_or_else(|| col.clone());
    let has_id = kept.iter().any(|c| renamed(*c) == "id_parc");

    let mut records = Vec::with_capacity(layer.features.len());
    let mut second_species = 0usize;
    let mut multi_cultivar = 0usize;
    let mut unsupported_geometry = 0usize;

    for (idx, feature) in layer.features.iter().enumerate() {
        let mut attrs: HashMap<String, AttrValue> = kept
            .iter()
            .map(|col| {
                let value = feature.attributes.get(*col).cloned().unwrap_or_default();
                (renamed(*col), value)
            })
            .collect();

        if let Some(date) = attrs.get("lidar_date") {
            let year = date.year_prefix().map(AttrValue::Text).unwrap_or_default();
            attrs.insert("lidar_date".to_string(), year);
        }
        if !has_id {
            attrs.insert("id_parc".to_string(), AttrValue::Int(idx as i64 + 1));
        }
        if !apply_layer_rules(&mut attrs, layer_name, scale) {
            second_species += 1;
            continue;
        }

        let cultivar = attrs.get("cultivar").cloned().unwrap_or_default();
        let normalized = match &cultivar {
            AttrValue::Text(name) => AttrValue::Text(normalize_cultivar_name(name)),
            other => other.clone(),
        };
        attrs.insert("cultivar_n".to_string(), normalized);

        if !is_single_cultivar(cultivar.as_str()) {
            multi_cultivar += 1;
            continue;
        }

        let Some(polygon) = first_polygon(&feature.geometry) else {
            unsupported_geometry += 1;
            continue;
        };
        records.push(ParcelRecordBuilder::new(attrs).geometry(polygon).build(scale)?);
    }

    debug!(
        "Layer {}: kept {} parcels, dropped {} (second species), {} (not a single cultivar), {} (non-polygon geometry)",
        layer_name,
        records.len(),
        second_species,
        multi_cultivar,
        unsupported_geometry
    );
    Ok(records)
}

/// Stamp the source label, derive `unique_id`, conform to `scale` and title-case cultivar names.
/// Parcels without an `id_parc` cannot get a unique identifier and are dropped.
pub fn finalize_layer(records: Vec<ParcelRecord>, source_label: &str, scale: Scale) -> Vec<ParcelRecord> {
    let total = records.len();
    let finalized: Vec<ParcelRecord> = records
        .into_iter()
        .filter(|record| !record.id_parc.is_null())
        .map(|mut record| {
            record.source = Some(source_label.to_string());
            record.unique_id = Some(format!("{}_{}", source_label, record.id_parc));
            record.conform_to(scale);
            record.cultivar_n = record.cultivar_n.as_deref().map(title_case);
            record
        })
        .collect();
    if finalized.len() < total {
        warn!(
            "{} parcels of {} dropped for lack of an id_parc",
            total - finalized.len(),
            source_label
        );
    }
    finalized
}

/// Concatenate finalized layers from several sources into one parcel set.
pub fn merge_layers(layers: Vec<Vec<ParcelRecord>>) -> Vec<ParcelRecord> {
    let merged: Vec<ParcelRecord> = layers.into_iter().flatten().collect();
    let mut seen = HashSet::new();
    let duplicates = merged
        .iter()
        .filter_map(|r| r.unique_id.as_deref())
        .filter(|id| !seen.insert(*id))
        .count();
    if duplicates > 0 {
        warn!("{} duplicated unique_id values after merging layers", duplicates);
    }
    merged
}
