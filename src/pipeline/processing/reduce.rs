use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::types::AddressRecord;

/// Collapse records to one per `id`, merging multi-match values.
///
/// The first row seen for an id supplies every other field. Matched values
/// from all of that id's rows are concatenated and deduplicated in first-seen
/// order. Applying this to already-reduced records changes nothing.
pub fn reduce_multi_matches(records: Vec<AddressRecord>) -> Vec<AddressRecord> {
    let input_len = records.len();
    let mut position: HashMap<String, usize> = HashMap::with_capacity(input_len);
    let mut reduced: Vec<AddressRecord> = Vec::with_capacity(input_len);

    for record in records {
        match position.get(&record.id) {
            Some(&i) => reduced[i].multi_matches.extend(record.multi_matches),
            None => {
                position.insert(record.id.clone(), reduced.len());
                reduced.push(record);
            }
        }
    }

    for record in &mut reduced {
        dedup_in_order(&mut record.multi_matches);
    }

    if reduced.len() != input_len {
        warn!(
            "Collapsed {} rows sharing an id into {} records",
            input_len,
            reduced.len()
        );
    }
    info!("🧮 Reduced multi-match values for {} records", reduced.len());
    reduced
}

/// Drop repeats and empty values, keeping the first occurrence of each
fn dedup_in_order(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain(|v| !v.is_empty() && seen.insert(v.clone()));
}
