use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::constants::{branch_display_name, BRANCH_TABLE_CODE, BRANCH_TABLE_ZIP, OUTSIDE_CHAPTER};
use crate::error::{GeocoderError, Result};
use crate::types::AddressRecord;

fn base_zip_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{5})(?:-\d{4})?$").expect("static regex"))
}

/// The 5-digit zip at the front of a zip or zip+4, if it looks like one
pub fn base_zip(zip: &str) -> Option<&str> {
    base_zip_pattern()
        .captures(zip.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Zip code -> branch display name
#[derive(Debug, Clone, Default)]
pub struct BranchMap {
    by_zip: HashMap<String, String>,
}

impl BranchMap {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let map = Self::from_reader(File::open(path)?)?;
        info!("🏷️ Loaded {} branch zips from {}", map.len(), path.display());
        Ok(map)
    }

    /// Read a `zip,branch` table; raw branch codes are mapped to display names here.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    GeocoderError::Schema(format!("branch table is missing the '{}' column", name))
                })
        };
        let zip_col = column(BRANCH_TABLE_ZIP)?;
        let code_col = column(BRANCH_TABLE_CODE)?;

        let mut by_zip = HashMap::new();
        for (line, row) in rdr.records().enumerate() {
            let row = row?;
            let raw_zip = row.get(zip_col).unwrap_or("");
            let code = row.get(code_col).unwrap_or("");
            let Some(zip) = normalize_table_zip(raw_zip) else {
                warn!(line = line + 2, zip = raw_zip, "Skipping branch row with unusable zip");
                continue;
            };
            // Unknown codes fall through to the fallback rather than leaking the raw code
            let display = match branch_display_name(code) {
                Some(display) => display.to_string(),
                None => {
                    warn!(line = line + 2, code, "Unrecognized branch code");
                    OUTSIDE_CHAPTER.to_string()
                }
            };
            by_zip.insert(zip, display);
        }
        Ok(Self { by_zip })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            by_zip: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Branch for a normalized zip; anything unmapped or malformed is outside the chapter
    pub fn resolve(&self, normalized_zip: &str) -> &str {
        base_zip(normalized_zip)
            .and_then(|zip| self.by_zip.get(zip))
            .map(String::as_str)
            .unwrap_or(OUTSIDE_CHAPTER)
    }

    pub fn len(&self) -> usize {
        self.by_zip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_zip.is_empty()
    }
}

/// Table zips may be zip+4 or have lost leading zeros in a spreadsheet
fn normalize_table_zip(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Some(base) = base_zip(raw) {
        return Some(base.to_string());
    }
    if !raw.is_empty() && raw.len() < 5 && raw.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("{:0>5}", raw));
    }
    None
}

/// Set `branch` on every record, returning (assigned, fallback) counts
pub fn tag_branches(records: &mut [AddressRecord], branches: &BranchMap) -> (usize, usize) {
    let mut fallback = 0usize;
    for record in records.iter_mut() {
        let branch = branches.resolve(record.geocode.normalized_zip());
        if branch == OUTSIDE_CHAPTER {
            fallback += 1;
        }
        record.branch = Some(branch.to_string());
    }
    let assigned = records.len() - fallback;
    info!("🏷️ Tagged branches: {} assigned, {} outside chapter", assigned, fallback);
    (assigned, fallback)
}
