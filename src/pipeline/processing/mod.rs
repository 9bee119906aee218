// Pipeline processing: preprocessing, boundary attribution, reduction, and branch tagging

pub mod branch;
pub mod preprocess;
pub mod reduce;
pub mod spatial;

pub use branch::{tag_branches, BranchMap};
pub use preprocess::preprocess;
pub use reduce::reduce_multi_matches;
pub use spatial::{AttributionStats, SpatialAttributor};
