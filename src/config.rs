use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_GEOCODE_ENDPOINT, DEFAULT_GEOCODE_TIMEOUT_SECS, DEFAULT_ID_COLUMN};
use crate::error::{GeocoderError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    pub branches: BranchesConfig,
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
    /// Directory the config was read from; relative paths resolve against it
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    #[serde(default = "default_id_column")]
    pub id_column: String,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocoderConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchesConfig {
    /// Two-column table: zip code, raw branch code
    pub table: PathBuf,
}

/// One `[[layers]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct LayerConfig {
    pub source_path: PathBuf,
    pub feature_property_name: String,
    pub new_feature_name: String,
    #[serde(default)]
    pub multi_match: bool,
}

fn default_id_column() -> String {
    DEFAULT_ID_COLUMN.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_GEOCODE_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_GEOCODE_TIMEOUT_SECS
}

impl Config {
    pub fn load(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref();
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            GeocoderError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_toml(&config_content, base_dir)
    }

    pub fn from_toml(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(|e| {
            // A missing key is a schema problem, not a syntax one
            if e.message().starts_with("missing field") {
                GeocoderError::Schema(format!("config: {}", e.message()))
            } else {
                GeocoderError::Toml(e)
            }
        })?;
        config.base_dir = base_dir.into();
        Ok(config)
    }

    /// Resolve a configured path against the config file's directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn branch_table_path(&self) -> PathBuf {
        self.resolve(&self.branches.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[roster]
id_column = "AK_ID"

[branches]
table = "branch_zips.csv"

[[layers]]
source_path = "districts/wards.geojson"
feature_property_name = "ward"
new_feature_name = "ward"

[[layers]]
source_path = "districts/lsc.geojson"
feature_property_name = "school_nam"
new_feature_name = "school_boundary"
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_toml(SAMPLE, "/etc/roster").unwrap();
        assert_eq!(config.roster.id_column, "AK_ID");
        assert_eq!(config.geocoder.endpoint, DEFAULT_GEOCODE_ENDPOINT);
        assert_eq!(config.geocoder.timeout_seconds, DEFAULT_GEOCODE_TIMEOUT_SECS);
        assert_eq!(config.layers.len(), 2);
        assert_eq!(config.layers[1].new_feature_name, "school_boundary");
        assert!(!config.layers[1].multi_match);
        assert_eq!(
            config.branch_table_path(),
            PathBuf::from("/etc/roster/branch_zips.csv")
        );
    }

    #[test]
    fn test_roster_section_defaults() {
        let config = Config::from_toml("[branches]\ntable = \"b.csv\"\n", "").unwrap();
        assert_eq!(config.roster.id_column, DEFAULT_ID_COLUMN);
        assert!(config.layers.is_empty());
    }

    #[test]
    fn test_missing_branches_is_schema_violation() {
        let err = Config::from_toml("[roster]\nid_column = \"id\"\n", "").unwrap_err();
        assert!(matches!(err, GeocoderError::Schema(_)), "got {err:?}");
    }

    #[test]
    fn test_missing_layer_key_is_schema_violation() {
        let toml = "[branches]\ntable = \"b.csv\"\n[[layers]]\nsource_path = \"x.geojson\"\nnew_feature_name = \"ward\"\n";
        let err = Config::from_toml(toml, "").unwrap_err();
        assert!(matches!(err, GeocoderError::Schema(_)), "got {err:?}");
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let config = Config::from_toml("[branches]\ntable = \"/data/b.csv\"\n", "/etc").unwrap();
        assert_eq!(config.branch_table_path(), PathBuf::from("/data/b.csv"));
    }
}
