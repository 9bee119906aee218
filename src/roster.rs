//! Tabular roster input and output.
//!
//! Input columns the pipeline does not manage are carried through untouched
//! and in their original order. Managed columns are always written after them
//! in a fixed order, so an output file is also a valid input for a resumed run.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::boundaries::BoundaryLayerCatalog;
use crate::constants::{
    BILLING_COLUMNS, BRANCH, FULL_ADDRESS, GEOCODE_ERROR, LAT, LON, MAILING_COLUMNS,
    MULTI_MATCH_LIST_FIELD, NORMALIZED_ADDRESS, NORMALIZED_ZIP,
};
use crate::error::{GeocoderError, Result};
use crate::types::AddressRecord;

/// Rows exactly as read, before preprocessing
#[derive(Debug, Clone, Default)]
pub struct RawRoster {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawRoster {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let roster = Self::from_reader(file)?;
        info!("📥 Read {} roster rows from {}", roster.rows.len(), path.display());
        Ok(roster)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let mut headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if headers.is_empty() {
            return Err(GeocoderError::Schema("roster has no header row".to_string()));
        }
        // Spreadsheet exports often start with a UTF-8 byte order mark
        if let Some(first) = headers.first_mut() {
            if let Some(stripped) = first.strip_prefix('\u{feff}') {
                *first = stripped.to_string();
            }
        }

        let width = headers.len();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            // Short rows are padded, long rows keep only the declared columns
            row.resize(width, String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Where each column the pipeline cares about sits in a raw row
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    pub id: usize,
    pub mailing: [usize; 5],
    pub billing: Option<[usize; 5]>,
    pub lat: Option<usize>,
    pub lon: Option<usize>,
    pub geocode_error: Option<usize>,
    pub normalized_address: Option<usize>,
    pub normalized_zip: Option<usize>,
    /// Columns copied verbatim to the output
    pub passthrough: Vec<usize>,
}

impl ColumnIndex {
    /// Locate required and optional columns. `recomputed` names columns a
    /// previous run produced that this run derives again and must not carry over.
    pub fn resolve(raw: &RawRoster, id_column: &str, recomputed: &[&str]) -> Result<Self> {
        // A layer writing over an input column would erase the address it was derived from
        if let Some(clash) = recomputed.iter().find(|field| {
            **field == id_column
                || MAILING_COLUMNS.contains(*field)
                || BILLING_COLUMNS.contains(*field)
        }) {
            return Err(GeocoderError::Config(format!(
                "layer output field '{}' would overwrite roster input column",
                clash
            )));
        }

        let mut missing = Vec::new();
        let id = raw.position(id_column);
        if id.is_none() {
            missing.push(id_column.to_string());
        }
        let mailing: Vec<Option<usize>> = MAILING_COLUMNS.iter().map(|c| raw.position(c)).collect();
        for (col, pos) in MAILING_COLUMNS.iter().zip(&mailing) {
            if pos.is_none() {
                missing.push(col.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(GeocoderError::Schema(format!(
                "roster is missing required columns: {}",
                missing.join(", ")
            )));
        }

        let billing: Option<Vec<usize>> = BILLING_COLUMNS.iter().map(|c| raw.position(c)).collect();

        let stateful = [LAT, LON, GEOCODE_ERROR, NORMALIZED_ADDRESS, NORMALIZED_ZIP];
        let passthrough = raw
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| {
                let h = h.as_str();
                !stateful.contains(&h)
                    && h != FULL_ADDRESS
                    && h != BRANCH
                    && h != MULTI_MATCH_LIST_FIELD
                    && !recomputed.contains(&h)
            })
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        debug!(
            passthrough = passthrough.len(),
            resumed = raw.position(LAT).is_some(),
            "Resolved roster columns"
        );

        Ok(Self {
            id: id.unwrap_or_default(),
            mailing: to_array(mailing.into_iter().flatten().collect()),
            billing: billing.map(to_array),
            lat: raw.position(LAT),
            lon: raw.position(LON),
            geocode_error: raw.position(GEOCODE_ERROR),
            normalized_address: raw.position(NORMALIZED_ADDRESS),
            normalized_zip: raw.position(NORMALIZED_ZIP),
            passthrough,
        })
    }
}

fn to_array(v: Vec<usize>) -> [usize; 5] {
    let mut out = [0usize; 5];
    for (slot, value) in out.iter_mut().zip(v) {
        *slot = value;
    }
    out
}

/// The working record set, one entry per roster row until reduction
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub passthrough_headers: Vec<String>,
    pub records: Vec<AddressRecord>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Header row: pass-through columns, then the managed ones
    pub fn output_headers(&self, catalog: &BoundaryLayerCatalog) -> Vec<String> {
        let mut headers = self.passthrough_headers.clone();
        headers.extend(
            [FULL_ADDRESS, LAT, LON, GEOCODE_ERROR, NORMALIZED_ADDRESS, NORMALIZED_ZIP]
                .iter()
                .map(|s| s.to_string()),
        );
        headers.extend(catalog.ordinary_fields().into_iter().map(str::to_string));
        if catalog.multi_match_layer().is_some() {
            headers.push(MULTI_MATCH_LIST_FIELD.to_string());
        }
        headers.push(BRANCH.to_string());
        headers
    }

    fn output_row(&self, record: &AddressRecord, catalog: &BoundaryLayerCatalog) -> Vec<String> {
        let mut row = record.passthrough.clone();
        row.push(record.full_address.clone());
        row.push(record.geocode.lat_cell());
        row.push(record.geocode.lon_cell());
        row.push(record.geocode.is_error().to_string());
        row.push(record.geocode.normalized_address().to_string());
        row.push(record.geocode.normalized_zip().to_string());
        for field in catalog.ordinary_fields() {
            row.push(record.assignment(field).to_string());
        }
        if catalog.multi_match_layer().is_some() {
            row.push(record.multi_match_list());
        }
        row.push(record.branch.clone().unwrap_or_default());
        row
    }

    pub fn write(&self, path: impl AsRef<Path>, catalog: &BoundaryLayerCatalog) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        self.to_writer(file, catalog)?;
        info!("💾 Wrote {} records to {}", self.records.len(), path.display());
        Ok(())
    }

    pub fn to_writer<W: Write>(&self, writer: W, catalog: &BoundaryLayerCatalog) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.output_headers(catalog))?;
        for record in &self.records {
            wtr.write_record(self.output_row(record, catalog))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "id,first_name,Mailing_Address1,Mailing_Address2,Mailing_City,Mailing_State,Mailing_Zip";

    #[test]
    fn test_read_pads_short_rows() {
        let csv = format!("{HEADER}\n1,Ana,100 Main St,,Chicago,IL,60601\n2,Bo\n");
        let raw = RawRoster::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(raw.rows.len(), 2);
        assert_eq!(raw.rows[1].len(), raw.headers.len());
        assert_eq!(raw.rows[1][2], "");
    }

    #[test]
    fn test_bom_is_stripped_from_first_header() {
        let csv = format!("\u{feff}{HEADER}\n");
        let raw = RawRoster::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(raw.headers[0], "id");
    }

    #[test]
    fn test_missing_required_columns_is_schema_violation() {
        let csv = "id,Mailing_Address1\n1,100 Main St\n";
        let raw = RawRoster::from_reader(csv.as_bytes()).unwrap();
        let err = ColumnIndex::resolve(&raw, "id", &[]).unwrap_err();
        match err {
            GeocoderError::Schema(msg) => {
                assert!(msg.contains("Mailing_City"));
                assert!(!msg.contains("Mailing_Address1"));
            }
            other => panic!("expected schema violation, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_id_column_is_schema_violation() {
        let raw = RawRoster::from_reader(format!("{HEADER}\n").as_bytes()).unwrap();
        assert!(matches!(
            ColumnIndex::resolve(&raw, "AK_ID", &[]),
            Err(GeocoderError::Schema(_))
        ));
    }

    #[test]
    fn test_managed_columns_are_not_passed_through() {
        let csv = format!("{HEADER},full_address,lat,lon,geocode_error,normalized_address,normalized_zip,ward,school_list,branch\n");
        let raw = RawRoster::from_reader(csv.as_bytes()).unwrap();
        let index = ColumnIndex::resolve(&raw, "id", &["ward"]).unwrap();
        assert_eq!(index.passthrough, (0..7).collect::<Vec<_>>());
        assert_eq!(index.lat, Some(8));
        assert!(index.billing.is_none());
    }

    #[test]
    fn test_layer_field_may_not_shadow_input_columns() {
        let csv = format!("{HEADER}\n1,Ana,100 Main St,,Chicago,IL,60601\n");
        let raw = RawRoster::from_reader(csv.as_bytes()).unwrap();
        for field in ["Mailing_City", "id", "Billing_Zip"] {
            let err = ColumnIndex::resolve(&raw, "id", &["ward", field]).unwrap_err();
            match err {
                GeocoderError::Config(msg) => assert!(msg.contains(field)),
                other => panic!("expected config error for {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_billing_columns_detected_when_all_present() {
        let csv = format!("{HEADER},Billing_Address_Line_1,Billing_Address_Line_2,Billing_City,Billing_State,Billing_Zip\n");
        let raw = RawRoster::from_reader(csv.as_bytes()).unwrap();
        let index = ColumnIndex::resolve(&raw, "id", &[]).unwrap();
        assert_eq!(index.billing, Some([7, 8, 9, 10, 11]));
    }
}
