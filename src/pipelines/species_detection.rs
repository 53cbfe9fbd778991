use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::audio::{read_clip, trim, write_clip};
use crate::config::BirdnetConfig;
use crate::data::filter::isin;
use crate::data::model::{Table, Value, format_float};
use crate::data::ops::{group_indices, left_join, round_to};
use crate::pamdp::observations::OBSERVATIONS;
use crate::parallel::{Outcome, map_parallel};

/// Domain preconditions that stop the species detection steps.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error(
        "Number of segments per species ({segment_size}) is greater than minimum number of \
         observations per species ({minimum_observations}). Change segment_size or \
         minimum_observations in the configuration."
    )]
    SegmentSizeTooLarge { segment_size: usize, minimum_observations: usize },

    #[error(
        "None of the {n_targets} target species are among the detected species. The observations \
         table would be empty; include more or different target species."
    )]
    NoTargetSpeciesDetected { n_targets: usize },

    #[error(
        "No species has at least {minimum_observations} observations. The observations table \
         would be empty; include more target species or lower minimum_observations."
    )]
    NoSpeciesAboveMinimum { minimum_observations: usize },

    #[error("Species {species} has {available} observations, cannot sample {requested} segments")]
    NotEnoughObservations { species: String, available: usize, requested: usize },
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

/// One file to classify, with the deployment coordinates when known.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRequest {
    pub media_id: String,
    pub deployment_id: String,
    pub file_path: PathBuf,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// One classifier hit inside a recording. Times are seconds from the start
/// of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub scientific_name: String,
    pub common_name: String,
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

/// A species classifier run once per recording. Implementations are shared
/// across worker threads.
pub trait SpeciesDetector: Sync {
    /// Value of `classifiedBy` on the produced observations.
    fn classified_by(&self) -> String;

    fn detect(&self, request: &DetectionRequest) -> Result<Vec<Detection>>;
}

/// Runs the BirdNET-Analyzer command line once per file and reads back its
/// CSV result table.
#[derive(Debug, Clone)]
pub struct BirdnetAnalyzer {
    pub config: BirdnetConfig,
}

impl BirdnetAnalyzer {
    pub fn new(config: BirdnetConfig) -> Self {
        BirdnetAnalyzer { config }
    }
}

impl SpeciesDetector for BirdnetAnalyzer {
    fn classified_by(&self) -> String {
        format!("BirdNET {}", self.config.version)
    }

    fn detect(&self, request: &DetectionRequest) -> Result<Vec<Detection>> {
        let out_dir = tempfile::tempdir().context("creating BirdNET output directory")?;
        let output = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg("--i")
            .arg(&request.file_path)
            .arg("--o")
            .arg(out_dir.path())
            .arg("--lat")
            .arg(request.latitude.unwrap_or(-1.0).to_string())
            .arg("--lon")
            .arg(request.longitude.unwrap_or(-1.0).to_string())
            .arg("--min_conf")
            .arg(self.config.min_confidence.to_string())
            .arg("--rtype")
            .arg("csv")
            .output()
            .with_context(|| format!("running {}", self.config.program))?;
        if !output.status.success() {
            bail!(
                "BirdNET failed on {} ({}): {}",
                request.file_path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let mut detections = Vec::new();
        for entry in WalkDir::new(out_dir.path()).into_iter().filter_map(|e| e.ok()) {
            let is_csv = entry.path().extension().is_some_and(|e| e.eq_ignore_ascii_case("csv"));
            if entry.file_type().is_file() && is_csv {
                detections.extend(parse_birdnet_csv(entry.path())?);
            }
        }
        log::debug!("{}: {} detections", request.media_id, detections.len());
        Ok(detections)
    }
}

#[derive(Debug, Deserialize)]
struct BirdnetRow {
    #[serde(rename = "Start (s)")]
    start: f64,
    #[serde(rename = "End (s)")]
    end: f64,
    #[serde(rename = "Scientific name")]
    scientific_name: String,
    #[serde(rename = "Common name")]
    common_name: String,
    #[serde(rename = "Confidence")]
    confidence: f64,
}

/// Read a BirdNET-Analyzer CSV result table.
pub fn parse_birdnet_csv(path: &Path) -> Result<Vec<Detection>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let mut detections = Vec::new();
    for row in reader.deserialize::<BirdnetRow>() {
        let row = row.with_context(|| format!("parsing {}", path.display()))?;
        detections.push(Detection {
            scientific_name: row.scientific_name,
            common_name: row.common_name,
            start: row.start,
            end: row.end,
            confidence: row.confidence,
        });
    }
    Ok(detections)
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// Classify every recording in `media` on the worker pool and return the
/// pamDP.Observations table. Files that fail are logged and skipped.
pub fn species_detection_parallel(
    media: &Table,
    deployments: &Table,
    n_jobs: i32,
    detector: &dyn SpeciesDetector,
    now: DateTime<FixedOffset>,
) -> Result<Table> {
    let coordinates = deployments.select(&["deploymentID", "latitude", "longitude"]);
    let joined = left_join(media, &coordinates, "deploymentID");

    let requests: Vec<Result<DetectionRequest>> = (0..joined.len())
        .map(|r| {
            Ok(DetectionRequest {
                media_id: required_text(&joined, r, "mediaID")?,
                deployment_id: required_text(&joined, r, "deploymentID")?,
                file_path: PathBuf::from(required_text(&joined, r, "filePath")?),
                latitude: joined.get(r, "latitude").as_f64(),
                longitude: joined.get(r, "longitude").as_f64(),
            })
        })
        .collect();
    log::info!("Computing species detection for {} files", requests.len());

    let outcome = map_parallel(&requests, n_jobs, "species detection", |req| match req {
        Ok(req) => detector.detect(req),
        Err(e) => bail!("{e:#}"),
    })?;

    let mut hits: Vec<(&DetectionRequest, Detection)> = Vec::new();
    for (idx, detections) in outcome.results {
        if let Ok(req) = &requests[idx] {
            hits.extend(detections.into_iter().map(|d| (req, d)));
        }
    }
    hits.sort_by(|(ra, a), (rb, b)| {
        ra.media_id
            .cmp(&rb.media_id)
            .then(a.start.total_cmp(&b.start))
            .then_with(|| a.scientific_name.cmp(&b.scientific_name))
    });

    let classified_by = detector.classified_by();
    let records = hits
        .into_iter()
        .enumerate()
        .map(|(i, (req, det))| {
            let mut rec = BTreeMap::new();
            rec.insert("observationID".to_string(), Value::String(i.to_string()));
            rec.insert("deploymentID".to_string(), Value::String(req.deployment_id.clone()));
            rec.insert("mediaID".to_string(), Value::String(req.media_id.clone()));
            rec.insert("eventStart".to_string(), Value::Float(det.start));
            rec.insert("eventEnd".to_string(), Value::Float(det.end));
            rec.insert("observationLevel".to_string(), Value::from("media"));
            rec.insert("observationType".to_string(), Value::from("animal"));
            rec.insert("scientificName".to_string(), Value::String(det.scientific_name));
            rec.insert("classificationMethod".to_string(), Value::from("machine"));
            rec.insert("classifiedBy".to_string(), Value::String(classified_by.clone()));
            rec.insert("classificationTimestamp".to_string(), Value::Timestamp(now));
            rec.insert(
                "classificationProbability".to_string(),
                Value::Float(round_to(det.confidence, 3)),
            );
            rec
        })
        .collect();

    let observations = OBSERVATIONS.validate(
        &Table::from_records(&OBSERVATIONS.column_names(), records),
        *now.offset(),
    )?;
    log::info!("Species detection completed! Detected {} observations.", observations.len());
    Ok(observations)
}

/// Keep target species (all species when `target_species` is empty) that
/// reach `minimum_observations` detections.
pub fn filter_observations(
    observations: &Table,
    target_species: &Table,
    minimum_observations: usize,
    segment_size: usize,
) -> Result<Table, PipelineError> {
    if segment_size > minimum_observations {
        return Err(PipelineError::SegmentSizeTooLarge { segment_size, minimum_observations });
    }

    let targets: BTreeSet<Value> =
        target_species.column("scientificName").filter(|v| !v.is_null()).cloned().collect();
    let selected = if targets.is_empty() {
        log::info!("Observations were not filtered as no target species were provided.");
        observations.clone()
    } else {
        isin(observations, "scientificName", &targets)
    };
    if selected.is_empty() {
        return Err(PipelineError::NoTargetSpeciesDetected { n_targets: targets.len() });
    }

    let frequent: BTreeSet<Value> = group_indices(&selected, "scientificName")
        .into_iter()
        .filter(|(_, rows)| rows.len() >= minimum_observations)
        .map(|(species, _)| species)
        .collect();
    let kept = isin(&selected, "scientificName", &frequent);
    if kept.is_empty() {
        return Err(PipelineError::NoSpeciesAboveMinimum { minimum_observations });
    }
    log::info!(
        "Kept {} of {} observations from {} species",
        kept.len(),
        observations.len(),
        frequent.len()
    );
    Ok(kept)
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// `Genus species` → `Genus_species`.
pub fn species_folder_name(scientific_name: &str) -> String {
    scientific_name.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Sample `segment_size` observations per species, without replacement, and
/// name the audio segment each one becomes.
pub fn create_segments<R: Rng + ?Sized>(
    observations: &Table,
    media: &Table,
    segment_size: usize,
    rng: &mut R,
) -> Result<Table, PipelineError> {
    let joined = left_join(observations, &media.select(&["mediaID", "filePath"]), "mediaID");

    let mut picked = Vec::new();
    for (species, rows) in group_indices(&joined, "scientificName") {
        if rows.len() < segment_size {
            return Err(PipelineError::NotEnoughObservations {
                species: species.to_string(),
                available: rows.len(),
                requested: segment_size,
            });
        }
        picked.extend(rows.choose_multiple(&mut *rng, segment_size).copied());
    }

    let mut segments = joined.take_rows(&picked);
    segments.derive_column("classificationProbabilityRounded", |t, r| {
        match t.get(r, "classificationProbability").as_f64() {
            Some(p) => Value::String(format!("{:0<5}", format_float(round_to(p, 3)))),
            None => Value::Null,
        }
    });
    segments.derive_column("segmentsFilePath", |t, r| {
        let media_id = t.get(r, "mediaID").as_text().unwrap_or_default();
        let number = |c: &str| t.get(r, c).as_f64().map(format_float).unwrap_or_default();
        Value::String(format!(
            "{}_{}_{}_{}.WAV",
            t.get(r, "classificationProbabilityRounded"),
            media_id.trim_end_matches(".WAV"),
            number("eventStart"),
            number("eventEnd"),
        ))
    });
    log::info!("Created {} segments", segments.len());
    Ok(segments)
}

/// Cut every segment out of its recording into
/// `<out_dir>/<Genus_species>/<segmentsFilePath>`, on the worker pool.
pub fn create_segments_folder(segments: &Table, out_dir: &Path, n_jobs: i32) -> Result<Outcome<PathBuf>> {
    struct Job {
        source: PathBuf,
        start: f64,
        end: f64,
        target: PathBuf,
    }

    let jobs: Vec<Result<Job>> = (0..segments.len())
        .map(|r| {
            let species = required_text(segments, r, "scientificName")?;
            Ok(Job {
                source: PathBuf::from(required_text(segments, r, "filePath")?),
                start: required_f64(segments, r, "eventStart")?,
                end: required_f64(segments, r, "eventEnd")?,
                target: out_dir
                    .join(species_folder_name(&species))
                    .join(required_text(segments, r, "segmentsFilePath")?),
            })
        })
        .collect();
    log::info!("Writing {} audio segments to disk...", jobs.len());

    map_parallel(&jobs, n_jobs, "segment extraction", |job| {
        let job = match job {
            Ok(job) => job,
            Err(e) => bail!("{e:#}"),
        };
        let clip = read_clip(&job.source)?;
        write_clip(&trim(&clip, job.start, job.end), &job.target)?;
        Ok(job.target.clone())
    })
}

fn required_text(table: &Table, row: usize, column: &str) -> Result<String> {
    table.get(row, column).as_text().with_context(|| format!("row {row} has no {column}"))
}

fn required_f64(table: &Table, row: usize, column: &str) -> Result<f64> {
    table.get(row, column).as_f64().with_context(|| format!("row {row} has no numeric {column}"))
}

/// One annotation sheet per species, keyed by the file name built from
/// `file_name_template` (`species` is replaced by `Genus_species`).
pub fn create_manual_annotation_formats(segments: &Table, file_name_template: &str) -> BTreeMap<String, Table> {
    let mut sheet = segments.select(&[
        "segmentsFilePath",
        "filePath",
        "classificationProbability",
        "eventStart",
        "eventEnd",
        "scientificName",
    ]);
    sheet.fill_column("positive", Value::Null);
    sheet.fill_column("detectedSpecies", Value::Null);

    let mut formats = BTreeMap::new();
    for (species, rows) in group_indices(&sheet, "scientificName") {
        let name = file_name_template.replace("species", &species_folder_name(&species.to_string()));
        let mut table = sheet.take_rows(&rows);
        table.sort_by_column("segmentsFilePath", true);
        formats.insert(name, table);
    }
    formats
}
