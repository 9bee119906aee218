use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Structured mailing address as it appears on the roster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailingAddress {
    pub line1: String,
    pub line2: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl MailingAddress {
    pub fn is_blank(&self) -> bool {
        [&self.line1, &self.line2, &self.city, &self.state, &self.zip]
            .iter()
            .all(|part| part.trim().is_empty())
    }

    /// Single-line form sent to the geocoder: `line1 line2, city, state zip, USA`.
    ///
    /// A row with no address parts at all composes to an empty string.
    pub fn compose(&self) -> String {
        if self.is_blank() {
            return String::new();
        }
        let street = join_nonempty(&[&self.line1, &self.line2], " ");
        let state_zip = join_nonempty(&[&self.state, &self.zip], " ");
        format!("{}, {}, {}, USA", street, self.city.trim(), state_zip)
    }
}

fn join_nonempty(parts: &[&String], sep: &str) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// A successful provider answer for one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedLocation {
    pub lat: f64,
    pub lon: f64,
    /// Provider's canonical formatted address
    pub normalized_address: String,
    /// Zip, or zip+4 when the provider supplied a suffix
    pub normalized_zip: String,
}

/// Outcome of a single geocoding call that returned a parseable response
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeResult {
    Success(GeocodedLocation),
    /// Provider answered with a status other than the success literal
    Rejected { status: String },
}

impl GeocodeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, GeocodeResult::Success(_))
    }
}

/// Where a record stands with respect to geocoding.
///
/// `Pending` is the resumability checkpoint: only pending records are sent to
/// the provider. `Failed` is written out as `0,0` with `geocode_error=true`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum GeocodeState {
    #[default]
    Pending,
    Resolved(GeocodedLocation),
    Failed,
}

impl GeocodeState {
    pub fn is_processed(&self) -> bool {
        !matches!(self, GeocodeState::Pending)
    }

    /// Coordinates usable for boundary attribution; failed and pending records have none.
    pub fn point(&self) -> Option<(f64, f64)> {
        match self {
            GeocodeState::Resolved(loc) => Some((loc.lon, loc.lat)),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, GeocodeState::Failed)
    }

    pub fn lat_cell(&self) -> String {
        match self {
            GeocodeState::Pending => String::new(),
            GeocodeState::Failed => "0".to_string(),
            GeocodeState::Resolved(loc) => loc.lat.to_string(),
        }
    }

    pub fn lon_cell(&self) -> String {
        match self {
            GeocodeState::Pending => String::new(),
            GeocodeState::Failed => "0".to_string(),
            GeocodeState::Resolved(loc) => loc.lon.to_string(),
        }
    }

    pub fn normalized_address(&self) -> &str {
        match self {
            GeocodeState::Resolved(loc) => &loc.normalized_address,
            _ => "",
        }
    }

    pub fn normalized_zip(&self) -> &str {
        match self {
            GeocodeState::Resolved(loc) => &loc.normalized_zip,
            _ => "",
        }
    }
}

impl From<GeocodeResult> for GeocodeState {
    fn from(result: GeocodeResult) -> Self {
        match result {
            GeocodeResult::Success(loc) => GeocodeState::Resolved(loc),
            GeocodeResult::Rejected { .. } => GeocodeState::Failed,
        }
    }
}

/// One roster entry as it moves through the pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressRecord {
    /// Stable member identifier, the join key for multi-match reduction
    pub id: String,
    pub mailing: MailingAddress,
    /// Derived from the address parts on every run, never read back
    pub full_address: String,
    pub geocode: GeocodeState,
    /// Ordinary layer output field -> matched feature value ("" when outside every polygon)
    pub district_assignments: HashMap<String, String>,
    /// Values matched on the multi-match layer, in discovery order
    pub multi_matches: Vec<String>,
    pub branch: Option<String>,
    /// Cells of columns the pipeline does not manage, aligned with the roster's pass-through headers
    pub passthrough: Vec<String>,
}

impl AddressRecord {
    pub fn multi_match_list(&self) -> String {
        self.multi_matches
            .join(crate::constants::MULTI_MATCH_DELIMITER)
    }

    pub fn assignment(&self, field: &str) -> &str {
        self.district_assignments
            .get(field)
            .map(String::as_str)
            .unwrap_or("")
    }
}
