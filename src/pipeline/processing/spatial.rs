use geo::Point;
use tracing::{debug, info};

use crate::boundaries::{BoundaryGeometry, BoundaryLayer};
use crate::types::AddressRecord;

/// Counts from attributing one layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributionStats {
    pub matched: usize,
    pub unmatched: usize,
    /// Records with no usable coordinates (pending or failed geocode)
    pub without_point: usize,
    /// Records that fell inside more than one feature
    pub overlapping: usize,
}

/// Assigns boundary feature values to records by point-in-polygon containment
pub struct SpatialAttributor<'a> {
    layer: &'a BoundaryLayer,
    geometry: &'a BoundaryGeometry,
}

impl<'a> SpatialAttributor<'a> {
    pub fn new(layer: &'a BoundaryLayer, geometry: &'a BoundaryGeometry) -> Self {
        Self { layer, geometry }
    }

    /// Attribute every record in place. Never adds or removes records.
    ///
    /// Ordinary layers keep the first matching feature in file order and
    /// write an empty value when nothing matches. The multi-match layer keeps
    /// every match in discovery order for the reducer.
    pub fn attribute(&self, records: &mut [AddressRecord]) -> AttributionStats {
        let field = self.layer.output_field_name.as_str();
        let mut stats = AttributionStats::default();

        for record in records.iter_mut() {
            let matches: Vec<String> = match record.geocode.point() {
                Some((lon, lat)) => {
                    let point = Point::new(lon, lat);
                    self.geometry.matches(&point).map(str::to_string).collect()
                }
                None => {
                    stats.without_point += 1;
                    Vec::new()
                }
            };

            if matches.is_empty() {
                stats.unmatched += 1;
            } else {
                stats.matched += 1;
            }
            if matches.len() > 1 {
                stats.overlapping += 1;
                debug!(id = %record.id, layer = field, count = matches.len(), "Point falls in overlapping features");
            }

            if self.layer.multi_match {
                record.multi_matches = matches;
            } else {
                let value = matches.into_iter().next().unwrap_or_default();
                record.district_assignments.insert(field.to_string(), value);
            }
        }

        info!(
            "📍 Layer '{}': {} matched, {} unmatched ({} without coordinates, {} overlapping)",
            field, stats.matched, stats.unmatched, stats.without_point, stats.overlapping
        );
        stats
    }
}
