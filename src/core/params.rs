use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::extract::{CONFIDENCE_NODATA, LIDAR_NODATA};
use crate::core::masking::{DEFAULT_PARCEL_LAYER, MASK_BUFFER};
use crate::error::Result;
use crate::types::Scale;

/// How one source layer of the parcel GeoPackage maps onto the canonical schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    pub layer_name: String,
    /// Label written to `source` and used as the `unique_id` prefix
    pub source_label: String,
    pub columns_to_keep: Vec<String>,
    #[serde(default)]
    pub rename_map: HashMap<String, String>,
}

/// A named single-band metric raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSource {
    pub metric: String,
    pub path: PathBuf,
}

/// Pipeline parameters suitable for JSON config files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Observation year of each band of the confidence stacks, in band order
    pub years: Vec<i32>,
    pub confidence_nodata: f64,
    pub lidar_nodata: f64,
    /// Inward buffer applied to parcels before masking
    pub mask_buffer: f64,
    pub scale: Scale,
    /// Layer of the merged GeoPackage used for masking and joining
    pub parcel_layer: String,
    pub layers: Vec<LayerSpec>,
    pub lidar_metrics: Vec<MetricSource>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            years: Vec::new(),
            confidence_nodata: CONFIDENCE_NODATA,
            lidar_nodata: LIDAR_NODATA,
            mask_buffer: MASK_BUFFER,
            scale: Scale::Parcel,
            parcel_layer: DEFAULT_PARCEL_LAYER.to_string(),
            layers: Vec::new(),
            lidar_metrics: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn metric_paths(&self) -> Vec<(String, PathBuf)> {
        self.lidar_metrics
            .iter()
            .map(|m| (m.metric.clone(), m.path.clone()))
            .collect()
    }
}
