use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::apis::Geocoder;
use crate::boundaries::{BoundaryGeometry, BoundaryLayerCatalog};
use crate::constants::PARTIAL_OUTPUT_PREFIX;
use crate::error::{GeocoderError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::{
    preprocess, reduce_multi_matches, tag_branches, BranchMap, SpatialAttributor,
};
use crate::roster::{ColumnIndex, RawRoster, Roster};
use crate::types::{AddressRecord, GeocodeResult};

/// Stages of a run, in order. `PartialFailure` is only reachable from `Geocoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Preprocessing,
    Geocoding,
    Attributing,
    Reducing,
    Tagging,
    Done,
    PartialFailure,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Preprocessing => "preprocessing",
            PipelineStage::Geocoding => "geocoding",
            PipelineStage::Attributing => "attributing",
            PipelineStage::Reducing => "reducing",
            PipelineStage::Tagging => "tagging",
            PipelineStage::Done => "done",
            PipelineStage::PartialFailure => "partial_failure",
        };
        write!(f, "{}", name)
    }
}

/// Everything a run needs besides the geocoder, loaded once up front
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub api_key: String,
    pub id_column: String,
    pub catalog: BoundaryLayerCatalog,
    pub branches: BranchMap,
}

/// Counts from the geocoding loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeocodeStats {
    /// Requests issued this run
    pub calls: usize,
    pub rejections: usize,
    /// Records already geocoded by an earlier run
    pub skipped: usize,
}

/// Result of a complete run
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub stage: PipelineStage,
    pub input_records: usize,
    pub output_records: usize,
    pub geocode: GeocodeStats,
    pub branch_assigned: usize,
    pub branch_fallback: usize,
    pub output_file: String,
    pub output_sha256: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Where a run that stopped during geocoding leaves its records
pub fn partial_output_path(output: &Path) -> PathBuf {
    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.csv".to_string());
    output.with_file_name(format!("{}{}", PARTIAL_OUTPUT_PREFIX, file_name))
}

/// Sequences preprocessing, geocoding, attribution, reduction and tagging
pub struct PipelineOrchestrator<'a, G: Geocoder + ?Sized> {
    geocoder: &'a G,
    inputs: PipelineInputs,
    stage: PipelineStage,
}

impl<'a, G: Geocoder + ?Sized> PipelineOrchestrator<'a, G> {
    pub fn new(geocoder: &'a G, inputs: PipelineInputs) -> Self {
        Self {
            geocoder,
            inputs,
            stage: PipelineStage::Preprocessing,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    fn transition(&mut self, next: PipelineStage) {
        info!("🔄 Pipeline stage {} -> {}", self.stage, next);
        self.stage = next;
    }

    /// Run the whole pipeline from `input` to `output`.
    ///
    /// If a geocoding call fails outright, every record (finished or not) is
    /// written next to `output` under a `partial_` name and
    /// [`GeocoderError::PartialRun`] is returned; feeding that file back in
    /// resumes without repeating finished lookups.
    #[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
    pub fn run(&mut self, input: &Path, output: &Path) -> Result<PipelineSummary> {
        let started_at = Utc::now();
        let timer = Instant::now();
        metrics::pipeline::run_started();
        info!("🚀 Starting roster pipeline");

        // Preprocessing
        self.stage = PipelineStage::Preprocessing;
        let mut roster = self.load_roster(input)?;
        let input_records = roster.len();

        // Geocoding
        self.transition(PipelineStage::Geocoding);
        let geocode = match self.geocode_pending(&mut roster.records) {
            Ok(stats) => stats,
            Err((stats, cause)) => {
                return Err(self.write_partial(&roster, output, stats, cause));
            }
        };
        debug_assert!(roster.records.iter().all(|r| r.geocode.is_processed()));

        // Attributing
        self.transition(PipelineStage::Attributing);
        self.attribute_layers(&mut roster.records)?;

        // Reducing
        self.transition(PipelineStage::Reducing);
        if self.inputs.catalog.multi_match_layer().is_some() {
            let records = std::mem::take(&mut roster.records);
            roster.records = reduce_multi_matches(records);
        } else {
            debug!("No multi-match layer configured, nothing to reduce");
        }

        // Tagging
        self.transition(PipelineStage::Tagging);
        let (branch_assigned, branch_fallback) =
            tag_branches(&mut roster.records, &self.inputs.branches);
        metrics::branch::tagged(branch_assigned, branch_fallback);

        // Done
        roster.write(output, &self.inputs.catalog)?;
        let output_sha256 = file_sha256(output)?;
        self.transition(PipelineStage::Done);
        metrics::pipeline::duration(timer.elapsed().as_secs_f64());

        let summary = PipelineSummary {
            stage: self.stage,
            input_records,
            output_records: roster.len(),
            geocode,
            branch_assigned,
            branch_fallback,
            output_file: output.display().to_string(),
            output_sha256,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "✅ Pipeline finished: {} records written, {} geocode calls ({} skipped, {} rejected)",
            summary.output_records,
            summary.geocode.calls,
            summary.geocode.skipped,
            summary.geocode.rejections
        );
        Ok(summary)
    }

    fn load_roster(&self, input: &Path) -> Result<Roster> {
        let raw = RawRoster::read(input)?;
        let recomputed: Vec<&str> = self
            .inputs
            .catalog
            .layers()
            .iter()
            .map(|l| l.output_field_name.as_str())
            .collect();
        let columns = ColumnIndex::resolve(&raw, &self.inputs.id_column, &recomputed)?;
        let roster = preprocess(raw, &columns);

        let (blank, duplicates) = id_collisions(&roster.records);
        if blank > 1 {
            warn!(
                "{} roster rows have a blank '{}' and count as one member when matches are reduced",
                blank, self.inputs.id_column
            );
        }
        if duplicates > 0 {
            warn!(
                "{} roster rows repeat an existing '{}' value",
                duplicates, self.inputs.id_column
            );
        }
        Ok(roster)
    }

    /// Geocode records that have no result yet, strictly one at a time and in roster order.
    ///
    /// A provider rejection is recorded on the record and the loop continues.
    /// Any error from the geocoder stops the loop at once; the records already
    /// handled keep their results.
    pub fn geocode_pending(
        &self,
        records: &mut [AddressRecord],
    ) -> std::result::Result<GeocodeStats, (GeocodeStats, GeocoderError)> {
        let mut stats = GeocodeStats::default();
        let total = records.len();

        for (row, record) in records.iter_mut().enumerate() {
            if record.geocode.is_processed() {
                stats.skipped += 1;
                continue;
            }

            let started = Instant::now();
            let outcome = self.geocoder.geocode(&record.full_address, &self.inputs.api_key);
            metrics::geocode::request_duration(started.elapsed().as_secs_f64());

            match outcome {
                Ok(result) => {
                    stats.calls += 1;
                    match &result {
                        GeocodeResult::Success(_) => metrics::geocode::request_success(),
                        GeocodeResult::Rejected { status } => {
                            stats.rejections += 1;
                            metrics::geocode::request_rejected(status);
                            warn!(
                                row,
                                id = %record.id,
                                status = %status,
                                "Geocoding rejected for address '{}'",
                                record.full_address
                            );
                        }
                    }
                    record.geocode = result.into();
                }
                Err(e) => {
                    metrics::geocode::request_error();
                    if e.is_transport() {
                        error!(row, id = %record.id, "Geocoding transport failure: {}", e);
                    } else {
                        error!(row, id = %record.id, "Geocoder failed: {}", e);
                    }
                    return Err((stats, e));
                }
            }

            if stats.calls % 100 == 0 {
                info!("Geocoded {} records ({}/{})", stats.calls, row + 1, total);
            }
        }

        metrics::geocode::records_skipped(stats.skipped);
        info!(
            "🌐 Geocoding complete: {} calls, {} rejected, {} already geocoded",
            stats.calls, stats.rejections, stats.skipped
        );
        Ok(stats)
    }

    fn write_partial(
        &mut self,
        roster: &Roster,
        output: &Path,
        stats: GeocodeStats,
        cause: GeocoderError,
    ) -> GeocoderError {
        self.transition(PipelineStage::PartialFailure);
        metrics::pipeline::run_partial();
        let partial_path = partial_output_path(output);

        if let Err(write_err) = roster.write(&partial_path, &self.inputs.catalog) {
            error!(
                "Could not write partial output {} after geocoding failure ({}): {}",
                partial_path.display(),
                cause,
                write_err
            );
            return write_err;
        }

        let remaining = roster.records.iter().filter(|r| !r.geocode.is_processed()).count();
        error!(
            "⛔ Geocoding halted after {} calls; {} records still pending. Re-run with {} as input to resume",
            stats.calls,
            remaining,
            partial_path.display()
        );
        GeocoderError::PartialRun {
            partial_path,
            source: Box::new(cause),
        }
    }

    fn attribute_layers(&self, records: &mut [AddressRecord]) -> Result<()> {
        for layer in self.inputs.catalog.layers() {
            let geometry = BoundaryGeometry::load(layer)?;
            metrics::attribution::layer_loaded(&layer.output_field_name, geometry.len());
            let stats = SpatialAttributor::new(layer, &geometry).attribute(records);
            metrics::attribution::layer_attributed(
                &layer.output_field_name,
                stats.matched,
                stats.unmatched,
            );
        }
        Ok(())
    }
}

/// (rows with a blank id, rows repeating a non-blank id seen earlier)
fn id_collisions(records: &[AddressRecord]) -> (usize, usize) {
    let mut seen = HashSet::new();
    let mut blank = 0usize;
    let mut duplicates = 0usize;
    for record in records {
        if record.id.is_empty() {
            blank += 1;
        } else if !seen.insert(record.id.as_str()) {
            duplicates += 1;
        }
    }
    (blank, duplicates)
}

fn file_sha256(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeocodeState, GeocodedLocation};
    use std::cell::RefCell;

    /// Answers from a fixed script and remembers every address it was asked for
    struct ScriptedGeocoder {
        script: RefCell<Vec<Result<GeocodeResult>>>,
        asked: RefCell<Vec<String>>,
    }

    impl ScriptedGeocoder {
        fn new(script: Vec<Result<GeocodeResult>>) -> Self {
            Self {
                script: RefCell::new(script.into_iter().rev().collect()),
                asked: RefCell::new(Vec::new()),
            }
        }
    }

    impl Geocoder for ScriptedGeocoder {
        fn geocode(&self, full_address: &str, _api_key: &str) -> Result<GeocodeResult> {
            self.asked.borrow_mut().push(full_address.to_string());
            self.script
                .borrow_mut()
                .pop()
                .unwrap_or_else(|| Err(GeocoderError::MalformedResponse("script exhausted".into())))
        }
    }

    fn inputs() -> PipelineInputs {
        PipelineInputs {
            api_key: "test-key".into(),
            id_column: "id".into(),
            catalog: BoundaryLayerCatalog::default(),
            branches: BranchMap::default(),
        }
    }

    fn pending(id: &str) -> AddressRecord {
        AddressRecord {
            id: id.into(),
            full_address: format!("{id} Main St, Chicago, IL 60601, USA"),
            ..Default::default()
        }
    }

    fn success() -> Result<GeocodeResult> {
        Ok(GeocodeResult::Success(GeocodedLocation {
            lat: 41.88,
            lon: -87.63,
            normalized_address: "x".into(),
            normalized_zip: "60601".into(),
        }))
    }

    #[test]
    fn test_partial_output_path_prefixes_file_name() {
        assert_eq!(
            partial_output_path(Path::new("out/members.csv")),
            PathBuf::from("out/partial_members.csv")
        );
        assert_eq!(partial_output_path(Path::new("output.csv")), PathBuf::from("partial_output.csv"));
    }

    #[test]
    fn test_geocode_skips_processed_records() {
        let geocoder = ScriptedGeocoder::new(vec![success()]);
        let orchestrator = PipelineOrchestrator::new(&geocoder, inputs());
        let mut records = vec![
            AddressRecord {
                geocode: GeocodeState::Failed,
                ..pending("1")
            },
            pending("2"),
        ];

        let stats = orchestrator.geocode_pending(&mut records).unwrap();

        assert_eq!(stats, GeocodeStats { calls: 1, rejections: 0, skipped: 1 });
        assert_eq!(geocoder.asked.borrow().as_slice(), ["2 Main St, Chicago, IL 60601, USA"]);
        assert!(records[1].geocode.point().is_some());
    }

    #[test]
    fn test_rejection_is_recorded_and_loop_continues() {
        let geocoder = ScriptedGeocoder::new(vec![
            Ok(GeocodeResult::Rejected { status: "ZERO_RESULTS".into() }),
            success(),
        ]);
        let orchestrator = PipelineOrchestrator::new(&geocoder, inputs());
        let mut records = vec![pending("1"), pending("2")];

        let stats = orchestrator.geocode_pending(&mut records).unwrap();

        assert_eq!(stats.rejections, 1);
        assert_eq!(records[0].geocode, GeocodeState::Failed);
        assert!(records[1].geocode.point().is_some());
    }

    #[test]
    fn test_transport_failure_stops_loop_immediately() {
        let geocoder = ScriptedGeocoder::new(vec![
            success(),
            Err(GeocoderError::MalformedResponse("truncated".into())),
            success(),
        ]);
        let orchestrator = PipelineOrchestrator::new(&geocoder, inputs());
        let mut records = vec![pending("1"), pending("2"), pending("3")];

        let (stats, err) = orchestrator.geocode_pending(&mut records).unwrap_err();

        assert!(err.is_transport());
        assert_eq!(stats.calls, 1);
        assert_eq!(geocoder.asked.borrow().len(), 2);
        assert!(records[0].geocode.is_processed());
        assert_eq!(records[1].geocode, GeocodeState::Pending);
        assert_eq!(records[2].geocode, GeocodeState::Pending);
    }

    #[test]
    fn test_blank_ids_counted_apart_from_repeats() {
        let records = vec![pending(""), pending("1"), pending(""), pending("1"), pending("2")];
        assert_eq!(id_collisions(&records), (2, 1));
        assert_eq!(id_collisions(&[pending("1"), pending("2")]), (0, 0));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::PartialFailure.to_string(), "partial_failure");
        let geocoder = ScriptedGeocoder::new(vec![]);
        assert_eq!(
            PipelineOrchestrator::new(&geocoder, inputs()).stage(),
            PipelineStage::Preprocessing
        );
    }
}
