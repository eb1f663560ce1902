use clap::{Parser, Subcommand};
use std::path::PathBuf;

use canopyjoin::types::{PixelType, Scale};

#[derive(Parser)]
#[command(name = "canopyjoin", version, about = "Canopy raster extraction and parcel join CLI")]
pub struct CliArgs {
    /// Enable logging (RUST_LOG overrides the default debug level)
    #[arg(long, global = true, default_value_t = false)]
    pub log: bool,

    /// JSON pipeline configuration (years, nodata values, layers, LiDAR metrics)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Stack per-year rasters of a zone into one multi-band VRT
    Stack {
        /// Directory holding one sub-directory per year
        #[arg(long)]
        base_dir: PathBuf,
        #[arg(long)]
        zone: String,
        /// Comma-separated years; defaults to the configured years
        #[arg(long, value_delimiter = ',')]
        years: Vec<i32>,
        #[arg(long, default_value = "confidence")]
        type_prefix: String,
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Clip a raster stack to inward-buffered parcels
    Mask {
        #[arg(short, long)]
        input: PathBuf,
        /// GeoPackage holding the parcel layer
        #[arg(long)]
        parcels: PathBuf,
        /// Parcel layer; defaults to the configured parcel layer
        #[arg(long)]
        layer: Option<String>,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long)]
        out_name: String,
        #[arg(long, default_value_t = 0.0)]
        nodata: f64,
        #[arg(long, value_enum, default_value_t = PixelType::Float32)]
        dtype: PixelType,
    },

    /// Resample a raster onto the grid of a reference raster
    Align {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        reference: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print band count, nodata, resolution, CRS and per-band statistics
    Inspect {
        raster: PathBuf,
        /// Print the report as JSON on stdout
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Set band descriptions of a raster in place
    Annotate {
        raster: PathBuf,
        /// Comma-separated band names, one per band
        #[arg(long, value_delimiter = ',', required = true)]
        names: Vec<String>,
    },

    /// Extract valid pixels of a year-stacked raster (or a directory of tiles) to CSV
    Extract {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_delimiter = ',')]
        years: Vec<i32>,
        #[arg(long)]
        nodata: Option<f64>,
        /// Directory mode: continue with other tiles when one fails
        #[arg(long, default_value_t = false)]
        batch: bool,
    },

    /// Merge single-band LiDAR metric rasters into one CSV table
    ExtractMetrics {
        /// Metric raster as NAME=PATH; repeatable, added to the configured metrics
        #[arg(long = "metric")]
        metrics: Vec<String>,
        #[arg(long)]
        nodata: Option<f64>,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Clean and merge the configured source layers into one GeoPackage layer
    Clean {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Output layer; defaults to the configured parcel layer
        #[arg(long)]
        layer: Option<String>,
        #[arg(long, value_enum)]
        scale: Option<Scale>,
    },

    /// Join extracted pixels onto cleaned parcels and compute plantation age
    Join {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        parcels: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_delimiter = ',')]
        years: Vec<i32>,
        #[arg(long, value_enum)]
        scale: Option<Scale>,
    },

    /// Rank cultivars of a joined table by row count
    TopCultivars {
        table: PathBuf,
        #[arg(long, default_value_t = 12.0)]
        max_age: f64,
        #[arg(long, default_value_t = 6)]
        min_years: usize,
        #[arg(long, default_value_t = 20)]
        top_n: usize,
    },
}
