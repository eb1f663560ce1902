//! Spatial join of pixel samples onto parcel polygons and plantation age.
//!
//! Sample coordinates are taken to be in the parcels' CRS; no reprojection is
//! performed. Every (sample, parcel) pair whose point intersects the polygon
//! yields one row. Rows whose age is negative or cannot be computed (no parcel,
//! unparseable planting year) are discarded and counted in the debug log.
use geo::{BoundingRect, Intersects, Point};
use rstar::{AABB, RTree, RTreeObject};
use tracing::debug;

use crate::core::cleaning::ParcelRecord;
use crate::core::extract::{EnrichedSample, PixelSample};
use crate::io::gdal::parse_epsg;
use crate::io::writers::table::{TableRow, format_f64};
use crate::types::{AttrValue, Scale};

/// A record that can be placed on the map and dated.
pub trait SpatialSample {
    fn position(&self) -> (f64, f64);
    fn observation_year(&self) -> Option<i32>;
}

impl SpatialSample for PixelSample {
    fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    fn observation_year(&self) -> Option<i32> {
        Some(self.band_label)
    }
}

impl SpatialSample for EnrichedSample {
    fn position(&self) -> (f64, f64) {
        self.sample.position()
    }

    fn observation_year(&self) -> Option<i32> {
        self.sample.observation_year()
    }
}

struct ParcelEnvelope {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for ParcelEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Cleaned parcels with a spatial index over their bounding boxes.
pub struct ParcelSet {
    pub crs: Option<String>,
    pub records: Vec<ParcelRecord>,
    tree: RTree<ParcelEnvelope>,
}

impl ParcelSet {
    pub fn new(records: Vec<ParcelRecord>, crs: Option<String>) -> Self {
        let envelopes = records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record.geometry.bounding_rect().map(|rect| ParcelEnvelope {
                    index,
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                })
            })
            .collect();
        ParcelSet {
            crs,
            records,
            tree: RTree::bulk_load(envelopes),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// EPSG code of the parcels' CRS when recognizable, else the raw definition.
    pub fn crs_label(&self) -> String {
        match self.crs.as_deref() {
            Some(wkt) => parse_epsg(wkt).unwrap_or_else(|| wkt.to_string()),
            None => "undefined".to_string(),
        }
    }

    /// Indices of parcels whose polygon intersects point (x, y), ascending.
    pub fn intersecting(&self, x: f64, y: f64) -> Vec<usize> {
        let point = Point::new(x, y);
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .map(|candidate| candidate.index)
            .filter(|&i| self.records[i].geometry.intersects(&point))
            .collect();
        hits.sort_unstable();
        hits
    }
}

/// A sample enriched with the attributes of the parcel containing it.
#[derive(Debug, Clone)]
pub struct JoinedRecord<'p, S> {
    pub sample: S,
    pub parcel: &'p ParcelRecord,
    pub scale: Scale,
    /// Planting year coerced to a number
    pub planting_year: f64,
    pub plantation_age: f64,
}

#[derive(Debug, Default)]
struct DiscardCounts {
    unmatched: usize,
    unknown_age: usize,
    negative_age: usize,
}

fn spatial_join<'p, S: SpatialSample + Clone>(
    samples: Vec<S>,
    parcels: &'p ParcelSet,
    scale: Scale,
) -> Vec<JoinedRecord<'p, S>> {
    let mut counts = DiscardCounts::default();
    let mut joined = Vec::with_capacity(samples.len());
    debug!(
        "Joining {} samples onto {} parcels, coordinates taken in CRS {}",
        samples.len(),
        parcels.len(),
        parcels.crs_label()
    );

    for sample in samples {
        let (x, y) = sample.position();
        let hits = parcels.intersecting(x, y);
        if hits.is_empty() {
            counts.unmatched += 1;
            continue;
        }
        for index in hits {
            let parcel = &parcels.records[index];
            let (Some(year), Some(planting_year)) =
                (sample.observation_year(), parcel.annee_plan.as_f64())
            else {
                counts.unknown_age += 1;
                continue;
            };
            let plantation_age = year as f64 - planting_year;
            if plantation_age < 0.0 {
                counts.negative_age += 1;
                continue;
            }
            joined.push(JoinedRecord {
                sample: sample.clone(),
                parcel,
                scale,
                planting_year,
                plantation_age,
            });
        }
    }

    debug!(
        "Spatial join ({}): kept {} rows; discarded {} outside parcels, {} unknown age, {} negative age",
        scale,
        joined.len(),
        counts.unmatched,
        counts.unknown_age,
        counts.negative_age
    );
    joined
}

/// Join samples to parcels carrying the full parcel-scale attribute set,
/// LiDAR summary metrics included.
pub fn join_at_parcel_scale<'p, S: SpatialSample + Clone>(
    samples: Vec<S>,
    parcels: &'p ParcelSet,
) -> Vec<JoinedRecord<'p, S>> {
    spatial_join(samples, parcels, Scale::Parcel)
}

/// Join samples to parcels carrying identity and provenance columns only.
pub fn join_at_pixel_scale<'p, S: SpatialSample + Clone>(
    samples: Vec<S>,
    parcels: &'p ParcelSet,
) -> Vec<JoinedRecord<'p, S>> {
    spatial_join(samples, parcels, Scale::Pixel)
}

/// Columns of a joined table: the sample's columns, the parcel columns of
/// `scale`, then `age_plan`.
pub fn joined_header(sample_header: Vec<String>, scale: Scale) -> Vec<String> {
    let mut header = sample_header;
    header.extend(ParcelRecord::columns(scale).iter().map(|c| c.to_string()));
    header.push("age_plan".to_string());
    header
}

impl<S: TableRow> TableRow for JoinedRecord<'_, S> {
    fn header(&self) -> Vec<String> {
        joined_header(self.sample.header(), self.scale)
    }

    fn fields(&self) -> Vec<String> {
        let mut fields = self.sample.fields();
        fields.extend(
            self.parcel
                .values(self.scale)
                .into_iter()
                .enumerate()
                .map(|(i, value)| match (i, value) {
                    (2, _) => format_f64(self.planting_year),
                    (_, AttrValue::Real(v)) => format_f64(v),
                    (_, other) => other.to_string(),
                }),
        );
        fields.push(format_f64(self.plantation_age));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cleaning::ParcelRecordBuilder;
    use crate::io::writers::table::{sample_header, write_table};
    use geo::{Polygon, polygon};
    use std::collections::HashMap;

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ]
    }

    fn parcel(id: &str, planted: AttrValue, geometry: Polygon<f64>, scale: Scale) -> ParcelRecord {
        ParcelRecordBuilder::new(HashMap::from([
            ("unique_id".to_string(), AttrValue::from(id)),
            ("annee_plan".to_string(), planted),
            ("cultivar_n".to_string(), AttrValue::from("Koster")),
            ("CC".to_string(), AttrValue::Real(0.75)),
        ]))
        .geometry(geometry)
        .build(scale)
        .unwrap()
    }

    fn sample(x: f64, y: f64, year: i32) -> PixelSample {
        PixelSample {
            x,
            y,
            value: 42.0,
            band_label: year,
            tile: "T31TCJ".into(),
        }
    }

    fn parcels(scale: Scale) -> ParcelSet {
        ParcelSet::new(
            vec![
                parcel("dep10_1", AttrValue::Int(2015), square(0.0, 0.0, 100.0), scale),
                parcel("dep10_2", AttrValue::from("2021"), square(200.0, 0.0, 100.0), scale),
                parcel("dep10_3", AttrValue::from("unknown"), square(400.0, 0.0, 100.0), scale),
            ],
            Some("EPSG:2154".into()),
        )
    }

    #[test]
    fn intersecting_uses_polygon_not_only_envelope() {
        let triangle = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 0.0, y: 10.0), (x: 0.0, y: 0.0)];
        let set = ParcelSet::new(
            vec![parcel("a", AttrValue::Int(2000), triangle, Scale::Pixel)],
            None,
        );
        assert_eq!(set.intersecting(1.0, 1.0), vec![0]);
        assert!(set.intersecting(9.0, 9.0).is_empty());
    }

    #[test]
    fn ages_are_non_negative_and_invalid_rows_dropped() {
        let set = parcels(Scale::Parcel);
        let samples = vec![
            sample(50.0, 50.0, 2020),  // age 5
            sample(250.0, 50.0, 2020), // planted after observation
            sample(250.0, 50.0, 2023), // age 2
            sample(450.0, 50.0, 2020), // unparseable planting year
            sample(900.0, 50.0, 2020), // outside every parcel
        ];
        let joined = join_at_parcel_scale(samples, &set);
        assert_eq!(joined.len(), 2);
        assert!(joined.iter().all(|r| r.plantation_age >= 0.0));
        assert_eq!(joined[0].plantation_age, 5.0);
        assert_eq!(joined[0].parcel.unique_id.as_deref(), Some("dep10_1"));
        assert_eq!(joined[1].plantation_age, 2.0);
        assert_eq!(joined[1].planting_year, 2021.0);
    }

    #[test]
    fn overlapping_parcels_yield_one_row_each() {
        let set = ParcelSet::new(
            vec![
                parcel("a", AttrValue::Int(2010), square(0.0, 0.0, 10.0), Scale::Pixel),
                parcel("b", AttrValue::Int(2012), square(5.0, 0.0, 10.0), Scale::Pixel),
            ],
            None,
        );
        let joined = join_at_pixel_scale(vec![sample(7.0, 5.0, 2020)], &set);
        let ages: Vec<f64> = joined.iter().map(|r| r.plantation_age).collect();
        assert_eq!(ages, vec![10.0, 8.0]);
    }

    #[test]
    fn output_columns_follow_scale() {
        let parcel_set = parcels(Scale::Parcel);
        let joined = join_at_parcel_scale(vec![sample(10.0, 10.0, 2020)], &parcel_set);
        let header = joined[0].header();
        assert_eq!(&header[..5], &["x", "y", "valeur", "date", "tuile"]);
        assert!(header.contains(&"CC".to_string()));
        assert_eq!(header.last().map(String::as_str), Some("age_plan"));
        let fields = joined[0].fields();
        assert_eq!(fields.len(), header.len());
        assert_eq!(fields[header.iter().position(|h| h == "CC").unwrap()], "0.75");
        assert_eq!(fields.last().map(String::as_str), Some("5"));

        let pixel_set = parcels(Scale::Pixel);
        let joined = join_at_pixel_scale(vec![sample(10.0, 10.0, 2020)], &pixel_set);
        let header = joined[0].header();
        assert!(!header.contains(&"CC".to_string()));
        assert_eq!(header.len(), 5 + 6 + 1);
        assert_eq!(header, joined_header(sample_header(), Scale::Pixel));
    }

    #[test]
    fn joins_without_survivors_still_know_their_columns() {
        let set = parcels(Scale::Parcel);
        let joined = join_at_parcel_scale(vec![sample(250.0, 50.0, 2018)], &set);
        assert!(joined.is_empty());

        let mut out = Vec::new();
        let header = joined_header(sample_header(), Scale::Parcel);
        assert_eq!(write_table(&mut out, &header, &joined).unwrap(), 0);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("x,y,valeur,date,tuile,unique_id,id_parc,annee_plan"));
        assert!(text.trim_end().ends_with("lidar_date,age_plan"));
    }

    #[test]
    fn crs_label_prefers_epsg_code() {
        assert_eq!(parcels(Scale::Pixel).crs_label(), "EPSG:2154");
        assert_eq!(ParcelSet::new(Vec::new(), None).crs_label(), "undefined");
    }
}
