/// Column names, fixed lookup tables and other values shared across the pipeline.

// Roster mailing-address columns (required)
pub const MAILING_ADDRESS1: &str = "Mailing_Address1";
pub const MAILING_ADDRESS2: &str = "Mailing_Address2";
pub const MAILING_CITY: &str = "Mailing_City";
pub const MAILING_STATE: &str = "Mailing_State";
pub const MAILING_ZIP: &str = "Mailing_Zip";

pub const MAILING_COLUMNS: [&str; 5] = [
    MAILING_ADDRESS1,
    MAILING_ADDRESS2,
    MAILING_CITY,
    MAILING_STATE,
    MAILING_ZIP,
];

// Billing-address columns used when the mailing address is blank
pub const BILLING_COLUMNS: [&str; 5] = [
    "Billing_Address_Line_1",
    "Billing_Address_Line_2",
    "Billing_City",
    "Billing_State",
    "Billing_Zip",
];

pub const DEFAULT_ID_COLUMN: &str = "id";

// Columns owned by the pipeline, in output order
pub const FULL_ADDRESS: &str = "full_address";
pub const LAT: &str = "lat";
pub const LON: &str = "lon";
pub const GEOCODE_ERROR: &str = "geocode_error";
pub const NORMALIZED_ADDRESS: &str = "normalized_address";
pub const NORMALIZED_ZIP: &str = "normalized_zip";
pub const BRANCH: &str = "branch";

/// Output field of the layer that may match several polygons per record
pub const MULTI_MATCH_LAYER_FIELD: &str = "school_boundary";
/// Column carrying the aggregated multi-match values
pub const MULTI_MATCH_LIST_FIELD: &str = "school_list";
pub const MULTI_MATCH_DELIMITER: &str = ", ";

/// Spreadsheet exports sometimes leave this literal in empty cells
pub const NAN_CELL: &str = "nan";

pub const PARTIAL_OUTPUT_PREFIX: &str = "partial_";

pub const DEFAULT_GEOCODE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";
pub const GEOCODE_STATUS_OK: &str = "OK";
pub const DEFAULT_GEOCODE_TIMEOUT_SECS: u64 = 30;

pub const API_KEY_ENV: &str = "GEOCODER_API_KEY";

// Branch lookup table columns
pub const BRANCH_TABLE_ZIP: &str = "zip";
pub const BRANCH_TABLE_CODE: &str = "branch";

pub const UNKNOWN_BRANCH_CODE: &str = "Unknown";
pub const OUTSIDE_CHAPTER: &str = "Outside Chapter";

/// Raw branch codes from the lookup table and the names shown to organizers.
pub const BRANCH_DISPLAY_NAMES: &[(&str, &str)] = &[
    ("NSB", "North Side Blue"),
    ("NSR", "North Side Red"),
    ("NW", "Northwest Side"),
    ("SS", "South Side"),
    ("SW", "Southwest Side"),
    ("WS", "West Side"),
    ("EV", "Evanston"),
    (UNKNOWN_BRANCH_CODE, OUTSIDE_CHAPTER),
];

/// Map a raw branch code to its display name
pub fn branch_display_name(code: &str) -> Option<&'static str> {
    BRANCH_DISPLAY_NAMES
        .iter()
        .find(|(raw, _)| raw.eq_ignore_ascii_case(code.trim()))
        .map(|(_, display)| *display)
}
