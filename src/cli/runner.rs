use std::path::{Path, PathBuf};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use canopyjoin::api::{
    clean_to_geopackage, extract_directory_to_csv, extract_metrics_to_csv, extract_to_csv,
    join_to_csv,
};
use canopyjoin::core::masking::{
    align_to_reference, annotate_bands, inspect, mask_to_parcels_buffered, stack_bands,
};
use canopyjoin::core::params::{MetricSource, PipelineConfig};
use canopyjoin::core::summary::{read_age_observations, top_cultivars};

use super::args::{CliArgs, Command};
use super::errors::AppError;

fn load_config(path: Option<&Path>) -> Result<PipelineConfig, AppError> {
    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Ok(PipelineConfig::from_json_file(path)?)
        }
        None => Ok(PipelineConfig::default()),
    }
}

fn parse_metric(value: &str) -> Result<MetricSource, AppError> {
    match value.split_once('=') {
        Some((metric, path)) if !metric.is_empty() && !path.is_empty() => Ok(MetricSource {
            metric: metric.to_string(),
            path: PathBuf::from(path),
        }),
        _ => Err(AppError::InvalidMetric {
            value: value.to_string(),
        }),
    }
}

/// Command-line years win over configured ones.
fn resolve_years(cli: Vec<i32>, config: &mut PipelineConfig) -> Result<(), AppError> {
    if !cli.is_empty() {
        config.years = cli;
    }
    if config.years.is_empty() {
        return Err(AppError::MissingArgument {
            arg: "--years".to_string(),
        });
    }
    Ok(())
}

pub fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.log {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Stack {
            base_dir,
            zone,
            years,
            type_prefix,
            out_dir,
        } => {
            resolve_years(years, &mut config)?;
            match stack_bands(&base_dir, &zone, &config.years, &type_prefix, &out_dir)? {
                Some(vrt) => info!("Stack ready: {:?}", vrt),
                None => warn!("No stack built for zone {}", zone),
            }
        }
        Command::Mask {
            input,
            parcels,
            layer,
            out_dir,
            out_name,
            nodata,
            dtype,
        } => {
            let layer = layer.unwrap_or_else(|| config.parcel_layer.clone());
            mask_to_parcels_buffered(
                &input,
                &parcels,
                &layer,
                &out_dir,
                &out_name,
                nodata,
                dtype,
                config.mask_buffer,
            )?;
        }
        Command::Align {
            input,
            reference,
            output,
        } => align_to_reference(&input, &reference, &output)?,
        Command::Inspect { raster, json } => {
            let report = inspect(&raster)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }
        Command::Annotate { raster, names } => annotate_bands(&raster, &names)?,
        Command::Extract {
            input,
            output,
            years,
            nodata,
            batch,
        } => {
            resolve_years(years, &mut config)?;
            let nodata = nodata.unwrap_or(config.confidence_nodata);
            if input.is_dir() {
                let report = extract_directory_to_csv(&input, &config.years, nodata, &output, batch)?;
                info!("Processed: {}", report.processed);
                info!("Skipped: {}", report.skipped);
                info!("Errors: {}", report.errors);
            } else if extract_to_csv(&input, &config.years, nodata, &output)?.is_none() {
                warn!("No valid pixel extracted from {:?}", input);
            }
        }
        Command::ExtractMetrics {
            metrics,
            nodata,
            output,
        } => {
            for value in &metrics {
                config.lidar_metrics.push(parse_metric(value)?);
            }
            if config.lidar_metrics.is_empty() {
                return Err(AppError::MissingArgument {
                    arg: "--metric".to_string(),
                }
                .into());
            }
            if let Some(nodata) = nodata {
                config.lidar_nodata = nodata;
            }
            extract_metrics_to_csv(&config, &output)?;
        }
        Command::Clean {
            input,
            output,
            layer,
            scale,
        } => {
            if let Some(scale) = scale {
                config.scale = scale;
            }
            let layer = layer.unwrap_or_else(|| config.parcel_layer.clone());
            let count = clean_to_geopackage(&input, &config, &output, &layer)?;
            info!("{} parcels written to {:?}", count, output);
        }
        Command::Join {
            input,
            parcels,
            output,
            years,
            scale,
        } => {
            resolve_years(years, &mut config)?;
            if let Some(scale) = scale {
                config.scale = scale;
            }
            let rows = join_to_csv(&input, &parcels, &config, &output)?;
            info!("{} joined rows written to {:?}", rows, output);
        }
        Command::TopCultivars {
            table,
            max_age,
            min_years,
            top_n,
        } => {
            let rows = read_age_observations(&table)?;
            for entry in top_cultivars(&rows, max_age, min_years, top_n) {
                println!("{}\t{}\t{}", entry.cultivar, entry.count, entry.distinct_ages);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_arguments_need_name_and_path() {
        let source = parse_metric("CC=/data/cc.tif").unwrap();
        assert_eq!(source.metric, "CC");
        assert_eq!(source.path, PathBuf::from("/data/cc.tif"));
        assert!(parse_metric("CC").is_err());
        assert!(parse_metric("=/data/cc.tif").is_err());
    }

    #[test]
    fn cli_years_override_configured_years() {
        let mut config = PipelineConfig {
            years: vec![2018],
            ..Default::default()
        };
        resolve_years(vec![2020, 2021], &mut config).unwrap();
        assert_eq!(config.years, vec![2020, 2021]);

        let mut empty = PipelineConfig::default();
        assert!(resolve_years(Vec::new(), &mut empty).is_err());
    }
}
