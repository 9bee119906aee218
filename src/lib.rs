pub mod apis;
pub mod boundaries;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod roster;
pub mod types;

pub use error::{GeocoderError, Result};
