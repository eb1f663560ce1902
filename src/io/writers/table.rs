//! Flat CSV output of pipeline tables, consumed downstream by plotting and
//! dashboards. Missing values are written as empty fields.
use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::core::extract::{EnrichedSample, MetricTable, PixelSample};
use crate::error::Result;

/// A row that knows its column names and textual field values.
pub trait TableRow {
    fn header(&self) -> Vec<String>;
    fn fields(&self) -> Vec<String>;
}

/// Shortest round-tripping textual form; whole numbers print without a fraction.
pub fn format_f64(v: f64) -> String {
    if v.is_nan() { String::new() } else { format!("{}", v) }
}

pub fn format_opt(v: Option<f64>) -> String {
    v.map(format_f64).unwrap_or_default()
}

/// Columns of an extracted pixel sample table.
pub const SAMPLE_COLUMNS: [&str; 5] = ["x", "y", "valeur", "date", "tuile"];

pub fn sample_header() -> Vec<String> {
    SAMPLE_COLUMNS.iter().map(|s| s.to_string()).collect()
}

/// Sample columns followed by one column per metric.
pub fn enriched_header(metric_names: &[String]) -> Vec<String> {
    let mut header = sample_header();
    header.extend(metric_names.iter().cloned());
    header
}

impl TableRow for PixelSample {
    fn header(&self) -> Vec<String> {
        sample_header()
    }

    fn fields(&self) -> Vec<String> {
        vec![
            format_f64(self.x),
            format_f64(self.y),
            format_f64(self.value),
            self.band_label.to_string(),
            self.tile.clone(),
        ]
    }
}

impl TableRow for EnrichedSample {
    fn header(&self) -> Vec<String> {
        enriched_header(&self.metric_names)
    }

    fn fields(&self) -> Vec<String> {
        let mut fields = self.sample.fields();
        fields.extend(self.metrics.iter().map(|v| format_opt(*v)));
        fields
    }
}

/// Write `header` then one CSV record per row. The header is written even
/// when there are no rows.
pub fn write_table<R: TableRow, W: Write>(writer: W, header: &[String], rows: &[R]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(row.fields())?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

pub fn write_table_file<R: TableRow>(path: &Path, header: &[String], rows: &[R]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let written = write_table(File::create(path)?, header, rows)?;
    info!("Wrote {} rows to {:?}", written, path);
    Ok(written)
}

/// Write a metric table with columns `x, y, <metrics...>`.
pub fn write_metric_table<W: Write>(writer: W, table: &MetricTable) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec!["x".to_string(), "y".to_string()];
    header.extend(table.metrics.iter().cloned());
    wtr.write_record(&header)?;
    for row in &table.rows {
        let mut record = vec![format_f64(row.x), format_f64(row.y)];
        record.extend(row.values.iter().map(|v| format_opt(*v)));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(table.rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extract::{MetricTable, ValidPixel};

    fn sample() -> PixelSample {
        PixelSample {
            x: 105.0,
            y: 185.5,
            value: 7.0,
            band_label: 2020,
            tile: "T31TCJ".into(),
        }
    }

    #[test]
    fn pixel_samples_to_csv() {
        let mut out = Vec::new();
        let n = write_table(&mut out, &sample_header(), &[sample()]).unwrap();
        assert_eq!(n, 1);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "x,y,valeur,date,tuile\n105,185.5,7,2020,T31TCJ\n");
    }

    #[test]
    fn empty_tables_keep_their_header() {
        let mut out = Vec::new();
        let rows: Vec<PixelSample> = Vec::new();
        assert_eq!(write_table(&mut out, &sample_header(), &rows).unwrap(), 0);
        assert_eq!(String::from_utf8(out).unwrap(), "x,y,valeur,date,tuile\n");

        let mut out = Vec::new();
        let rows: Vec<EnrichedSample> = Vec::new();
        let header = enriched_header(&["CC".to_string(), "MOCH".to_string()]);
        write_table(&mut out, &header, &rows).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "x,y,valeur,date,tuile,CC,MOCH\n");
    }

    #[test]
    fn metric_table_missing_values_are_blank() {
        let mut table = MetricTable::new();
        let px = |x: f64, value: f64| ValidPixel { row: 0, col: 0, x, y: 1.0, value };
        table.merge_outer("CC", &[px(1.0, 0.5)]);
        table.merge_outer("MOCH", &[px(2.0, 20.0)]);
        let mut out = Vec::new();
        write_metric_table(&mut out, &table).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "x,y,CC,MOCH\n1,1,0.5,\n2,1,,20\n");
    }
}
