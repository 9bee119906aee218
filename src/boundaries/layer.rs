use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{BoundingRect, Geometry, MultiPolygon, Point, Polygon, Rect};
use geojson::{Feature, GeoJson};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use super::catalog::BoundaryLayer;
use crate::error::{GeocoderError, Result};

/// A polygonal boundary feature and the property value it assigns
#[derive(Debug, Clone)]
pub struct BoundaryFeature {
    pub value: String,
    geometry: MultiPolygon<f64>,
    bbox: Option<Rect<f64>>,
}

impl BoundaryFeature {
    pub fn new(value: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        let bbox = geometry.bounding_rect();
        Self {
            value: value.into(),
            geometry,
            bbox,
        }
    }

    /// Point-in-polygon test, boundary inclusive. The bounding box only short-circuits misses.
    pub fn contains(&self, point: &Point<f64>) -> bool {
        let Some(bbox) = &self.bbox else {
            return false;
        };
        let (x, y) = (point.x(), point.y());
        if x < bbox.min().x || x > bbox.max().x || y < bbox.min().y || y > bbox.max().y {
            return false;
        }
        self.geometry.coordinate_position(&point.0) != CoordPos::Outside
    }
}

/// The loaded geometry of one boundary layer, features kept in file order
#[derive(Debug, Clone, Default)]
pub struct BoundaryGeometry {
    features: Vec<BoundaryFeature>,
}

impl BoundaryGeometry {
    pub fn from_features(features: Vec<BoundaryFeature>) -> Self {
        Self { features }
    }

    /// Read and parse a layer's GeoJSON file
    pub fn load(layer: &BoundaryLayer) -> Result<Self> {
        let path = &layer.source_path;
        check_format(path)?;
        let text = fs::read_to_string(path)
            .map_err(|e| GeocoderError::geometry(path, format!("read failed: {}", e)))?;
        let geometry = Self::parse(path, &text, &layer.feature_property_name)?;
        info!(
            "🗺️ Loaded {} features for layer '{}' from {}",
            geometry.len(),
            layer.output_field_name,
            path.display()
        );
        Ok(geometry)
    }

    pub fn parse(path: &Path, text: &str, property: &str) -> Result<Self> {
        let geojson: GeoJson = text
            .parse()
            .map_err(|e: geojson::Error| GeocoderError::geometry(path, e.to_string()))?;

        let features = match geojson {
            GeoJson::FeatureCollection(collection) => {
                check_crs(path, collection.foreign_members.as_ref())?;
                collection.features
            }
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::Geometry(_) => {
                return Err(GeocoderError::geometry(
                    path,
                    "bare geometry has no properties to attribute",
                ))
            }
        };

        let mut loaded = Vec::with_capacity(features.len());
        let mut skipped = 0usize;
        for (index, feature) in features.into_iter().enumerate() {
            match to_boundary_feature(path, feature, property)? {
                Some(f) => loaded.push(f),
                None => {
                    debug!(index, "Skipping feature without polygon geometry");
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            warn!(
                "{} features in {} have no polygon geometry and were skipped",
                skipped,
                path.display()
            );
        }
        Ok(Self { features: loaded })
    }

    /// Values of every feature containing the point, in file order
    pub fn matches<'a>(&'a self, point: &'a Point<f64>) -> impl Iterator<Item = &'a str> + 'a {
        self.features
            .iter()
            .filter(move |f| f.contains(point))
            .map(|f| f.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

fn check_format(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "geojson" | "json" => Ok(()),
        "shp" => Err(GeocoderError::geometry(
            path,
            "shapefiles are not read directly; convert with `ogr2ogr -f GeoJSON -t_srs EPSG:4326`",
        )),
        other => Err(GeocoderError::geometry(
            path,
            format!("unsupported boundary format '{}'", other),
        )),
    }
}

/// GeoJSON is WGS84; a legacy `crs` member naming anything else would need reprojection.
fn check_crs(path: &Path, foreign: Option<&geojson::JsonObject>) -> Result<()> {
    let Some(crs) = foreign.and_then(|m| m.get("crs")) else {
        return Ok(());
    };
    let name = crs
        .pointer("/properties/name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let upper = name.to_ascii_uppercase();
    if upper.contains("CRS84") || upper.ends_with("EPSG::4326") || upper.ends_with("EPSG:4326") {
        Ok(())
    } else {
        Err(GeocoderError::geometry(
            path,
            format!("coordinate reference '{}' is not WGS84 and cannot be reprojected", name),
        ))
    }
}

fn to_boundary_feature(path: &Path, feature: Feature, property: &str) -> Result<Option<BoundaryFeature>> {
    let value = property_value(feature.property(property));
    let Some(geometry) = feature.geometry else {
        return Ok(None);
    };
    let geometry = Geometry::<f64>::try_from(geometry.value)
        .map_err(|e| GeocoderError::geometry(path, format!("invalid geometry: {}", e)))?;

    let polygons = collect_polygons(geometry);
    if polygons.is_empty() {
        return Ok(None);
    }
    Ok(Some(BoundaryFeature::new(value, MultiPolygon::new(polygons))))
}

fn collect_polygons(geometry: Geometry<f64>) -> Vec<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => vec![p],
        Geometry::MultiPolygon(mp) => mp.0,
        Geometry::Rect(r) => vec![r.to_polygon()],
        Geometry::Triangle(t) => vec![t.to_polygon()],
        Geometry::GeometryCollection(gc) => gc.0.into_iter().flat_map(collect_polygons).collect(),
        _ => Vec::new(),
    }
}

/// Property values become strings; numbers keep their JSON spelling, null and missing are empty.
fn property_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}
