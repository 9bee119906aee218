//! Boundary layers: the configured catalog and the loaded polygon geometry.

pub mod catalog;
pub mod layer;

pub use catalog::{BoundaryLayer, BoundaryLayerCatalog};
pub use layer::{BoundaryFeature, BoundaryGeometry};
