//! Pipeline parameters, read from a TOML file. Every section and key has a
//! default so a partial (or empty) file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("n_jobs must be -1 (all cores) or a positive number, got {0}")]
    InvalidJobs(i32),

    #[error("Invalid period '{0}', expected a count and a unit such as 5min, 1h, 30s or 5T")]
    InvalidPeriod(String),

    #[error("Invalid UTC offset '{0}', expected the form -05:00")]
    InvalidOffset(String),

    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub time: TimeConfig,
    pub species_detection: SpeciesDetectionConfig,
    pub timelapse: TimelapseConfig,
    pub data_science: DataScienceConfig,
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// One folder per deployment, holding that deployment's recordings.
    pub audio_root: PathBuf,
    pub field_deployments: PathBuf,
    pub target_species: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            audio_root: PathBuf::from("data/input/audio"),
            field_deployments: PathBuf::from("data/input/field_deployments/field_deployments.csv"),
            target_species: PathBuf::from("data/input/target_species/target_species.csv"),
            output_dir: PathBuf::from("data/output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub utc_offset: String,
}

impl Default for TimeConfig {
    fn default() -> Self {
        TimeConfig { utc_offset: "-05:00".to_string() }
    }
}

impl TimeConfig {
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_utc_offset(&self.utc_offset)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciesDetectionConfig {
    pub n_jobs: i32,
    pub minimum_observations: usize,
    pub segment_size: usize,
    /// Annotation sheet name; `species` is replaced by `Genus_species`.
    pub manual_annotations_file_name: String,
    pub seed: u64,
    pub birdnet: BirdnetConfig,
}

impl Default for SpeciesDetectionConfig {
    fn default() -> Self {
        SpeciesDetectionConfig {
            n_jobs: -1,
            minimum_observations: 10,
            segment_size: 10,
            manual_annotations_file_name: "annotations_species.csv".to_string(),
            seed: 42,
            birdnet: BirdnetConfig::default(),
        }
    }
}

/// How to run the external BirdNET-Analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BirdnetConfig {
    pub program: String,
    /// Arguments placed before the per-file ones.
    pub args: Vec<String>,
    pub min_confidence: f64,
    pub version: String,
}

impl Default for BirdnetConfig {
    fn default() -> Self {
        BirdnetConfig {
            program: "python".to_string(),
            args: vec!["-m".to_string(), "birdnet_analyzer.analyze".to_string()],
            min_confidence: 0.1,
            version: "2.4".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelapseConfig {
    /// Seconds taken from the start of each selected recording.
    pub sample_length: f64,
    pub sample_period: String,
    /// Day to build the timelapse for; chosen from the data when absent.
    pub sample_date: Option<String>,
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        TimelapseConfig { sample_length: 5.0, sample_period: "5min".to_string(), sample_date: None }
    }
}

impl TimelapseConfig {
    pub fn period(&self) -> Result<Duration, ConfigError> {
        parse_period(&self.sample_period)
    }

    pub fn date(&self) -> Result<Option<NaiveDate>, ConfigError> {
        self.sample_date
            .as_deref()
            .map(|d| {
                NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
                    .map_err(|_| ConfigError::InvalidDate(d.to_string()))
            })
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataScienceConfig {
    pub correct_column: String,
    pub confidence_column: String,
    /// Target probability of a correct detection at the threshold.
    pub probability: f64,
    pub n_jobs: i32,
}

impl Default for DataScienceConfig {
    fn default() -> Self {
        DataScienceConfig {
            correct_column: "positive".to_string(),
            confidence_column: "classificationProbability".to_string(),
            probability: 0.9,
            n_jobs: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub n_jobs: i32,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        MetadataConfig { n_jobs: -1 }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: PipelineConfig = toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => {
                log::info!("No configuration file given, using defaults");
                Ok(Self::default())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

/// Parse a pandas-style frequency alias: `30s`, `5min`, `5T`, `1h`, `1H`, `1d`.
pub fn parse_period(text: &str) -> Result<Duration, ConfigError> {
    let bad = || ConfigError::InvalidPeriod(text.to_string());
    let t = text.trim();
    let split = t.find(|c: char| !c.is_ascii_digit()).unwrap_or(t.len());
    let (count, unit) = t.split_at(split);
    let count: u64 = if count.is_empty() { 1 } else { count.parse().map_err(|_| bad())? };
    let seconds = match unit.trim() {
        "s" | "S" | "sec" => 1,
        "min" | "T" | "m" => 60,
        "h" | "H" => 3600,
        "d" | "D" => 86_400,
        _ => return Err(bad()),
    };
    if count == 0 {
        return Err(bad());
    }
    count.checked_mul(seconds).map(Duration::from_secs).ok_or_else(bad)
}

/// Parse `+HH:MM` / `-HH:MM` (also `Z` and `UTC`).
pub fn parse_utc_offset(text: &str) -> Result<FixedOffset, ConfigError> {
    let bad = || ConfigError::InvalidOffset(text.to_string());
    let t = text.trim();
    if t.eq_ignore_ascii_case("z") || t.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(bad);
    }
    let (sign, rest) = if let Some(rest) = t.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = t.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(bad());
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = h.parse().map_err(|_| bad())?;
    let minutes: i32 = m.parse().map_err(|_| bad())?;
    if hours > 23 || minutes > 59 {
        return Err(bad());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.species_detection.n_jobs, -1);
        assert_eq!(config.data_science.correct_column, "positive");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [species_detection]
            segment_size = 3

            [species_detection.birdnet]
            program = "birdnet"
            args = []

            [timelapse]
            sample_period = "1h"
            sample_date = "2024-03-02"
            "#,
        )
        .unwrap();
        assert_eq!(config.species_detection.segment_size, 3);
        assert_eq!(config.species_detection.minimum_observations, 10);
        assert_eq!(config.species_detection.birdnet.program, "birdnet");
        assert_eq!(config.species_detection.birdnet.min_confidence, 0.1);
        assert_eq!(config.timelapse.period().unwrap(), Duration::from_secs(3600));
        assert_eq!(config.timelapse.date().unwrap(), NaiveDate::from_ymd_opt(2024, 3, 2));
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pamflow.toml");
        std::fs::write(&path, "[time]\nutc_offset = 5").unwrap();
        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("pamflow.toml"));
    }

    #[test]
    fn period_aliases() {
        assert_eq!(parse_period("5min").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_period("5T").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_period("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_period("h").unwrap(), Duration::from_secs(3600));
        assert!(parse_period("0min").is_err());
        assert!(parse_period("5 fortnights").is_err());
    }

    #[test]
    fn oversized_period_is_rejected() {
        assert!(matches!(
            parse_period("300000000000000000d"),
            Err(ConfigError::InvalidPeriod(p)) if p == "300000000000000000d"
        ));
    }

    #[test]
    fn utc_offsets() {
        assert_eq!(parse_utc_offset("-05:00").unwrap().local_minus_utc(), -5 * 3600);
        assert_eq!(parse_utc_offset("+05:30").unwrap().local_minus_utc(), 5 * 3600 + 1800);
        assert_eq!(parse_utc_offset("UTC").unwrap().local_minus_utc(), 0);
        assert!(parse_utc_offset("05:00").is_err());
        assert!(parse_utc_offset("-25:00").is_err());
    }
}
