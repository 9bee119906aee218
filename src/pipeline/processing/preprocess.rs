use tracing::{debug, warn};

use crate::constants::NAN_CELL;
use crate::roster::{ColumnIndex, RawRoster, Roster};
use crate::types::{AddressRecord, GeocodeState, GeocodedLocation, MailingAddress};

/// Turn raw roster rows into address records.
///
/// Geocoding results already present on the row (a previous run's output fed
/// back in) are kept, which is what makes a re-run skip those rows.
pub fn preprocess(raw: RawRoster, columns: &ColumnIndex) -> Roster {
    let passthrough_headers = columns
        .passthrough
        .iter()
        .map(|&i| raw.headers[i].clone())
        .collect();

    let mut resumed = 0usize;
    let records: Vec<AddressRecord> = raw
        .rows
        .into_iter()
        .enumerate()
        .map(|(row_index, row)| {
            let record = build_record(row_index, &row, columns);
            if record.geocode.is_processed() {
                resumed += 1;
            }
            record
        })
        .collect();

    if resumed > 0 {
        debug!("{} of {} records carry a prior geocoding result", resumed, records.len());
    }

    Roster {
        passthrough_headers,
        records,
    }
}

fn build_record(row_index: usize, row: &[String], columns: &ColumnIndex) -> AddressRecord {
    let mailing = address_from(row, &columns.mailing);
    let mailing = match &columns.billing {
        Some(billing) if cell(row, Some(columns.mailing[0])).is_empty() => {
            let fallback = address_from(row, billing);
            if fallback.is_blank() {
                mailing
            } else {
                debug!(row_index, "Mailing address blank, using billing address");
                fallback
            }
        }
        _ => mailing,
    };

    AddressRecord {
        id: cell(row, Some(columns.id)).to_string(),
        full_address: mailing.compose(),
        mailing,
        geocode: prior_state(row_index, row, columns),
        passthrough: columns.passthrough.iter().map(|&i| row[i].clone()).collect(),
        ..Default::default()
    }
}

fn address_from(row: &[String], idx: &[usize; 5]) -> MailingAddress {
    MailingAddress {
        line1: cell(row, Some(idx[0])).to_string(),
        line2: cell(row, Some(idx[1])).to_string(),
        city: cell(row, Some(idx[2])).to_string(),
        state: cell(row, Some(idx[3])).to_string(),
        zip: cell(row, Some(idx[4])).to_string(),
    }
}

/// Trimmed cell value; absent columns and literal `nan` read as empty
fn cell(row: &[String], index: Option<usize>) -> &str {
    let value = index.and_then(|i| row.get(i)).map(|s| s.trim()).unwrap_or("");
    if value.eq_ignore_ascii_case(NAN_CELL) {
        ""
    } else {
        value
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn prior_state(row_index: usize, row: &[String], columns: &ColumnIndex) -> GeocodeState {
    let lat = cell(row, columns.lat);
    if lat.is_empty() {
        return GeocodeState::Pending;
    }
    let lon = cell(row, columns.lon);
    let (Ok(lat), Ok(lon)) = (lat.parse::<f64>(), lon.parse::<f64>()) else {
        warn!(row_index, lat, lon, "Unreadable prior coordinates, record will be geocoded again");
        return GeocodeState::Pending;
    };

    // Older outputs wrote 0,0 for failures without always setting the flag
    if parse_flag(cell(row, columns.geocode_error)) || (lat == 0.0 && lon == 0.0) {
        return GeocodeState::Failed;
    }

    GeocodeState::Resolved(GeocodedLocation {
        lat,
        lon,
        normalized_address: cell(row, columns.normalized_address).to_string(),
        normalized_zip: cell(row, columns.normalized_zip).to_string(),
    })
}
