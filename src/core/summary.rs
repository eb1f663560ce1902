//! Cultivar selection over joined rows: which cultivars are frequent enough,
//! across enough plantation ages, to be worth plotting.
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::core::join::JoinedRecord;
use crate::error::{Error, Result};

pub const DEFAULT_MAX_AGE: f64 = 12.0;
pub const DEFAULT_MIN_YEARS: usize = 6;
pub const DEFAULT_TOP_N: usize = 20;

/// Row count of one selected cultivar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CultivarCount {
    pub cultivar: String,
    pub count: usize,
    pub distinct_ages: usize,
}

/// One (cultivar, plantation age) observation.
pub trait AgeObservation {
    fn cultivar(&self) -> Option<&str>;
    fn age(&self) -> f64;
}

impl<S> AgeObservation for JoinedRecord<'_, S> {
    fn cultivar(&self) -> Option<&str> {
        self.parcel.cultivar_n.as_deref()
    }

    fn age(&self) -> f64 {
        self.plantation_age
    }
}

impl AgeObservation for (String, f64) {
    fn cultivar(&self) -> Option<&str> {
        Some(&self.0)
    }

    fn age(&self) -> f64 {
        self.1
    }
}

/// Keep rows with `1 < age <= max_age`, take the `top_n` cultivars by row count,
/// then keep those seen at `min_years` distinct ages or more. Sorted by count
/// descending, ties by name.
pub fn top_cultivars<O: AgeObservation>(
    rows: &[O],
    max_age: f64,
    min_years: usize,
    top_n: usize,
) -> Vec<CultivarCount> {
    let mut groups: HashMap<&str, (usize, BTreeSet<u64>)> = HashMap::new();
    for row in rows {
        let age = row.age();
        if !(age > 1.0 && age <= max_age) {
            continue;
        }
        let Some(cultivar) = row.cultivar().filter(|c| !c.is_empty()) else {
            continue;
        };
        let entry = groups.entry(cultivar).or_default();
        entry.0 += 1;
        entry.1.insert(age.to_bits());
    }

    let mut ranked: Vec<CultivarCount> = groups
        .into_iter()
        .map(|(cultivar, (count, ages))| CultivarCount {
            cultivar: cultivar.to_string(),
            count,
            distinct_ages: ages.len(),
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.cultivar.cmp(&b.cultivar)));
    ranked.truncate(top_n);
    let before = ranked.len();
    ranked.retain(|c| c.distinct_ages >= min_years);
    debug!(
        "{} of the top {} cultivars cover at least {} ages",
        ranked.len(),
        before,
        min_years
    );
    ranked
}

/// Read `(cultivar_n, age_plan)` pairs back from a joined CSV table.
/// Rows with an empty cultivar or age are skipped.
pub fn read_age_observations(path: &Path) -> Result<Vec<(String, f64)>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| Error::Config(format!("{:?} has no {} column", path, name)))
    };
    let cultivar_idx = column("cultivar_n")?;
    let age_idx = column("age_plan")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cultivar = record.get(cultivar_idx).unwrap_or_default();
        let Ok(age) = record.get(age_idx).unwrap_or_default().parse::<f64>() else {
            continue;
        };
        if !cultivar.is_empty() {
            rows.push((cultivar.to_string(), age));
        }
    }
    Ok(rows)
}
