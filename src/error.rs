use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeocoderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed geocoding response: {0}")]
    MalformedResponse(String),

    #[error("Failed to load boundary layer '{path}': {reason}")]
    GeometryLoad { path: PathBuf, reason: String },

    #[error("Schema violation: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Geocoding halted, partial output written to {}: {source}", partial_path.display())]
    PartialRun {
        partial_path: PathBuf,
        #[source]
        source: Box<GeocoderError>,
    },
}

impl GeocoderError {
    /// True for failures that abort the geocoding loop and trigger a partial write.
    pub fn is_transport(&self) -> bool {
        matches!(self, GeocoderError::Http(_) | GeocoderError::MalformedResponse(_))
    }

    pub fn geometry(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        GeocoderError::GeometryLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GeocoderError>;
