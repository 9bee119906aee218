use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::{Config, LayerConfig};
use crate::constants::{
    BILLING_COLUMNS, BRANCH, FULL_ADDRESS, GEOCODE_ERROR, LAT, LON, MAILING_COLUMNS,
    MULTI_MATCH_LAYER_FIELD, MULTI_MATCH_LIST_FIELD, NORMALIZED_ADDRESS, NORMALIZED_ZIP,
};
use crate::error::{GeocoderError, Result};

/// One configured boundary layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryLayer {
    pub source_path: PathBuf,
    /// Feature property copied onto a record whose point falls inside the feature
    pub feature_property_name: String,
    pub output_field_name: String,
    /// Whether a record may keep every matching feature instead of the first
    pub multi_match: bool,
}

/// The ordered set of boundary layers a run attributes against
#[derive(Debug, Clone, Default)]
pub struct BoundaryLayerCatalog {
    layers: Vec<BoundaryLayer>,
}

impl BoundaryLayerCatalog {
    /// Build the catalog from the `[[layers]]` entries, resolving paths and
    /// checking that every boundary file exists before any geocoding starts.
    pub fn from_config(config: &Config) -> Result<Self> {
        let layers = config
            .layers
            .iter()
            .map(|entry| Self::layer_from_entry(config, entry))
            .collect::<Result<Vec<_>>>()?;
        let catalog = Self::new(layers)?;

        for layer in &catalog.layers {
            if !layer.source_path.is_file() {
                return Err(GeocoderError::geometry(
                    &layer.source_path,
                    "boundary file does not exist",
                ));
            }
        }

        info!("📚 Loaded boundary catalog with {} layers", catalog.layers.len());
        Ok(catalog)
    }

    fn layer_from_entry(config: &Config, entry: &LayerConfig) -> Result<BoundaryLayer> {
        if entry.feature_property_name.trim().is_empty() {
            return Err(GeocoderError::Schema(format!(
                "layer '{}' has an empty feature_property_name",
                entry.source_path.display()
            )));
        }
        if entry.new_feature_name.trim().is_empty() {
            return Err(GeocoderError::Schema(format!(
                "layer '{}' has an empty new_feature_name",
                entry.source_path.display()
            )));
        }
        Ok(BoundaryLayer {
            source_path: config.resolve(&entry.source_path),
            feature_property_name: entry.feature_property_name.clone(),
            output_field_name: entry.new_feature_name.clone(),
            multi_match: entry.multi_match || entry.new_feature_name == MULTI_MATCH_LAYER_FIELD,
        })
    }

    /// Validate an already-resolved list of layers
    pub fn new(layers: Vec<BoundaryLayer>) -> Result<Self> {
        let reserved: HashSet<&str> = [
            FULL_ADDRESS,
            LAT,
            LON,
            GEOCODE_ERROR,
            NORMALIZED_ADDRESS,
            NORMALIZED_ZIP,
            MULTI_MATCH_LIST_FIELD,
            BRANCH,
        ]
        .into_iter()
        .chain(MAILING_COLUMNS)
        .chain(BILLING_COLUMNS)
        .collect();

        let mut seen = HashSet::new();
        for layer in &layers {
            let field = layer.output_field_name.as_str();
            if reserved.contains(field) {
                return Err(GeocoderError::Config(format!(
                    "layer output field '{}' collides with a pipeline column",
                    field
                )));
            }
            if !seen.insert(field) {
                return Err(GeocoderError::Config(format!(
                    "layer output field '{}' is configured twice",
                    field
                )));
            }
            debug!(
                field,
                property = %layer.feature_property_name,
                multi_match = layer.multi_match,
                "Registered boundary layer"
            );
        }

        let multi = layers.iter().filter(|l| l.multi_match).count();
        if multi > 1 {
            return Err(GeocoderError::Config(format!(
                "{} layers are marked multi-match; at most one is allowed",
                multi
            )));
        }

        Ok(Self { layers })
    }

    /// Layers in declared order
    pub fn layers(&self) -> &[BoundaryLayer] {
        &self.layers
    }

    pub fn multi_match_layer(&self) -> Option<&BoundaryLayer> {
        self.layers.iter().find(|l| l.multi_match)
    }

    /// Output fields of the single-valued layers, in declared order
    pub fn ordinary_fields(&self) -> Vec<&str> {
        self.layers
            .iter()
            .filter(|l| !l.multi_match)
            .map(|l| l.output_field_name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
