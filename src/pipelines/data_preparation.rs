use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::audio::{AudioMetadata, find_wav_files, read_metadata};
use crate::data::loader::ensure_parent;
use crate::data::model::{Table, Value};
use crate::data::ops::{group_indices, median, round_to};
use crate::pamdp::deployments::DEPLOYMENTS;
use crate::pamdp::media::MEDIA;
use crate::pamdp::parse_timestamp;
use crate::parallel::map_parallel;

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Scan `root` (one folder per deployment) and build the pamDP.Media table.
///
/// Files whose names do not follow the sensor/date/time convention, or whose
/// headers cannot be read, are logged and left out.
pub fn get_media_file(
    root: &Path,
    field_deployments: &Table,
    offset: FixedOffset,
    n_jobs: i32,
) -> Result<Table> {
    log::info!("Preparing data from {}...", root.display());

    let on_disk = deployment_folders(root)?;
    let in_sheet: BTreeSet<String> =
        field_deployments.column("deploymentID").filter_map(Value::as_text).collect();
    warn_sensor_mismatch(&on_disk, &in_sheet);

    let files = find_wav_files(root)?;
    let outcome = map_parallel(&files, n_jobs, "metadata extraction", |path| {
        read_metadata(path).map_err(anyhow::Error::from)
    })?;

    let mut media = Table::new(MEDIA.column_names());
    for meta in outcome.values() {
        match media_row(&meta, offset) {
            Some(row) => media.push_row(row),
            None => log::warn!("Cannot localize timestamp of {}", meta.path.display()),
        }
    }

    let produced: BTreeSet<String> = media.column("deploymentID").filter_map(Value::as_text).collect();
    let empty: Vec<&str> = on_disk.difference(&produced).map(String::as_str).collect();
    if !empty.is_empty() {
        log::warn!(
            "Deployments {} won't be processed as their folders were empty or none of the WAV \
             files within met the file name format.",
            empty.join(", ")
        );
    }
    log::info!("Found {} recordings from {} deployments", media.len(), produced.len());
    Ok(media)
}

fn deployment_folders(root: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let entries = std::fs::read_dir(root).with_context(|| format!("listing {}", root.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("listing {}", root.display()))?;
        if entry.path().is_dir() {
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

fn warn_sensor_mismatch(on_disk: &BTreeSet<String>, in_sheet: &BTreeSet<String>) {
    let not_in_sheet: Vec<&str> = on_disk.difference(in_sheet).map(String::as_str).collect();
    if !not_in_sheet.is_empty() {
        log::warn!(
            "Deployments {}, found on the audio root directory, won't be fully processed as they \
             are not listed on the field deployments sheet.",
            not_in_sheet.join(", ")
        );
    }
    let no_folder: Vec<&str> = in_sheet.difference(on_disk).map(String::as_str).collect();
    if !no_folder.is_empty() {
        log::warn!(
            "Deployments {}, found on the field deployments sheet, won't be fully processed \
             because they have no folder on the audio root directory.",
            no_folder.join(", ")
        );
    }
}

/// One Media row in canonical column order.
fn media_row(meta: &AudioMetadata, offset: FixedOffset) -> Option<Vec<Value>> {
    let timestamp = meta.timestamp.and_local_timezone(offset).single()?;
    let file_name = meta.path.file_name()?.to_string_lossy().into_owned();
    let media_id = meta.path.file_stem()?.to_string_lossy().into_owned();
    Some(vec![
        Value::String(media_id),
        Value::String(meta.sensor.clone()),
        Value::from("activityDetection"),
        Value::Timestamp(timestamp),
        Value::String(meta.path.display().to_string()),
        Value::Bool(false),
        Value::String(file_name),
        Value::from("audio/WAV"),
        Value::Float(meta.sample_rate as f64),
        Value::Integer(meta.bit_depth as i64),
        Value::Float(round_to(meta.length, 3)),
        Value::Integer(meta.channels as i64),
        Value::Null,
        Value::Null,
    ])
}

// ---------------------------------------------------------------------------
// Media summary
// ---------------------------------------------------------------------------

/// Sampling overview of one deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaSummary {
    #[serde(rename = "deploymentID")]
    pub deployment_id: String,
    pub date_ini: DateTime<FixedOffset>,
    pub date_end: DateTime<FixedOffset>,
    pub n_recordings: usize,
    /// Median gap between consecutive recordings, in seconds. `None` for a
    /// single recording.
    pub time_diff: Option<f64>,
    /// Median recording length, in seconds.
    pub sample_length: Option<f64>,
    pub sample_rate: Option<f64>,
    /// `date_end - date_ini`, in seconds.
    pub duration: f64,
}

/// Summarise the Media table per deployment, in deployment order.
pub fn get_media_summary(media: &Table) -> Vec<MediaSummary> {
    let mut summaries = Vec::new();
    for (deployment, rows) in group_indices(media, "deploymentID") {
        let mut stamps: Vec<DateTime<FixedOffset>> =
            rows.iter().filter_map(|&r| media.get(r, "timestamp").as_timestamp()).collect();
        stamps.sort();
        let (Some(&date_ini), Some(&date_end)) = (stamps.first(), stamps.last()) else {
            log::warn!("Deployment {deployment} has no valid timestamps");
            continue;
        };
        let gaps: Vec<f64> = stamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
            .collect();
        let column_median = |name: &str| {
            let values: Vec<f64> = rows.iter().filter_map(|&r| media.get(r, name).as_f64()).collect();
            median(&values)
        };

        summaries.push(MediaSummary {
            deployment_id: deployment.to_string(),
            date_ini,
            date_end,
            n_recordings: rows.len(),
            time_diff: median(&gaps),
            sample_length: column_median("fileLength"),
            sample_rate: column_median("sampleRate"),
            duration: (date_end - date_ini).num_milliseconds() as f64 / 1000.0,
        });
    }
    summaries
}

pub fn save_media_summary(summaries: &[MediaSummary], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating CSV {}", path.display()))?;
    for summary in summaries {
        writer.serialize(summary).context("writing media summary row")?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Deployments
// ---------------------------------------------------------------------------

/// Turn the validated field deployments sheet into pamDP.Deployments.
///
/// Start and end come from the sheet's date and time columns, localized to
/// `offset`; when missing they fall back to the first and last recording of
/// the deployment. Rows still lacking a start or an end are dropped.
pub fn field_deployments_sheet_to_deployments(
    sheet: &Table,
    summaries: &[MediaSummary],
    offset: FixedOffset,
) -> Result<Table> {
    let by_deployment: BTreeMap<&str, &MediaSummary> =
        summaries.iter().map(|s| (s.deployment_id.as_str(), s)).collect();
    let n_recordings: usize = summaries.iter().map(|s| s.n_recordings).sum();

    let mut records = Vec::with_capacity(sheet.len());
    for row in 0..sheet.len() {
        let Some(deployment_id) = sheet.get(row, "deploymentID").as_text() else {
            continue;
        };
        let summary = by_deployment.get(deployment_id.as_str());

        let start = sheet_timestamp(sheet, row, "deploymentStartDate", "deploymentStartTime", offset)
            .or_else(|| summary.map(|s| s.date_ini));
        let end = sheet_timestamp(sheet, row, "deploymentEndDate", "deploymentEndTime", offset)
            .or_else(|| summary.map(|s| s.date_end));
        let (Some(start), Some(end)) = (start, end) else {
            log::warn!("Dropping deployment {deployment_id}: no start or end date");
            continue;
        };

        let location_name = sheet.get(row, "locationName").clone();
        let location_id = match sheet.get(row, "locationID") {
            Value::Null => location_name.clone(),
            v => v.clone(),
        };
        let setup_by: Vec<String> = ["setupByName", "setupByLastName"]
            .iter()
            .filter_map(|c| sheet.get(row, c).as_text())
            .collect();

        let mut rec = BTreeMap::new();
        rec.insert("deploymentID".to_string(), Value::String(deployment_id));
        rec.insert("locationID".to_string(), location_id);
        rec.insert("locationName".to_string(), location_name);
        rec.insert("deploymentStart".to_string(), Value::Timestamp(start));
        rec.insert("deploymentEnd".to_string(), Value::Timestamp(end));
        if !setup_by.is_empty() {
            rec.insert("setupBy".to_string(), Value::String(setup_by.join(" ")));
        }
        for column in [
            "latitude",
            "longitude",
            "recorderID",
            "recorderModel",
            "recorderHeight",
            "recorderConfiguration",
            "habitat",
            "deploymentComments",
        ] {
            rec.insert(column.to_string(), sheet.get(row, column).clone());
        }
        records.push(rec);
    }

    let table = Table::from_records(&DEPLOYMENTS.column_names(), records);
    let deployments = DEPLOYMENTS.validate(&table, offset)?;
    log::info!(
        "Done! {} deployments with {} recordings saved to pamDP format.",
        deployments.len(),
        n_recordings
    );
    Ok(deployments)
}

fn sheet_timestamp(
    sheet: &Table,
    row: usize,
    date_column: &str,
    time_column: &str,
    offset: FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    let date = sheet.get(row, date_column).as_text()?;
    let time = sheet.get(row, time_column).as_text().unwrap_or_else(|| "00:00:00".to_string());
    let parsed = parse_timestamp(&format!("{date} {time}"), offset);
    if parsed.is_none() {
        log::warn!("Cannot parse '{date} {time}' from {date_column}/{time_column} on row {row}");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pamdp::field_deployments::FIELD_DEPLOYMENTS;

    fn bogota() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    fn ts(s: &str) -> Value {
        Value::Timestamp(DateTime::parse_from_str(s, crate::data::model::TIMESTAMP_FORMAT).unwrap())
    }

    fn media() -> Table {
        Table::from_rows(
            vec!["deploymentID".into(), "timestamp".into(), "fileLength".into(), "sampleRate".into()],
            vec![
                vec!["sensorA".into(), ts("2020-01-01T00:00:00+0000"), 1.0.into(), 44100.0.into()],
                vec!["sensorA".into(), ts("2020-01-01T00:00:20+0000"), 2.0.into(), 44100.0.into()],
                vec!["sensorA".into(), ts("2020-01-01T00:00:10+0000"), 1.5.into(), 44100.0.into()],
                vec!["sensorB".into(), ts("2020-02-01T12:00:00+0000"), 2.0.into(), 48000.0.into()],
                vec!["sensorB".into(), ts("2020-02-01T12:00:30+0000"), 2.5.into(), 48000.0.into()],
            ],
        )
    }

    #[test]
    fn media_summary_per_deployment() {
        let summary = get_media_summary(&media());
        assert_eq!(summary.len(), 2);
        let a = &summary[0];
        assert_eq!(a.deployment_id, "sensorA");
        assert_eq!(a.n_recordings, 3);
        assert_eq!(a.sample_length, Some(1.5));
        assert_eq!(a.sample_rate, Some(44100.0));
        assert_eq!(a.time_diff, Some(10.0));
        assert_eq!(a.duration, 20.0);

        let b = &summary[1];
        assert_eq!(b.sample_length, Some(2.25));
        assert_eq!(b.time_diff, Some(30.0));
        assert_eq!(b.duration, 30.0);
    }

    fn sheet(rows: Vec<Vec<&str>>) -> Table {
        let raw = Table::from_rows(
            FIELD_DEPLOYMENTS.column_names().iter().map(|c| c.to_string()).collect(),
            rows.into_iter()
                .map(|r| r.into_iter().map(|c| if c.is_empty() { Value::Null } else { c.into() }).collect())
                .collect(),
        );
        FIELD_DEPLOYMENTS.validate(&raw, bogota()).unwrap()
    }

    #[test]
    fn sheet_to_deployments_localizes_and_falls_back() {
        // deploymentID, startDate, startTime, endDate, endTime, locationID, locationName,
        // latitude, longitude, setupByName, setupByLastName, recorderID, recorderModel,
        // recorderHeight, recorderConfiguration, habitat, deploymentComments
        let sheet = sheet(vec![
            vec![
                "sensorA", "2020-01-01", "06:00", "2020-01-10", "18:00:00", "", "Finca",
                "4.6", "-74.1", "Ana", "Rojas", "", "AudioMoth", "1.5", "1 min / 5 min", "forest", "",
            ],
            vec![
                "sensorB", "", "", "", "", "L2", "Río",
                "4.7", "-74.2", "", "", "R2", "AudioMoth", "", "1 min / 5 min", "", "",
            ],
            vec![
                "sensorC", "", "", "", "", "L3", "",
                "4.8", "-74.3", "", "", "", "AudioMoth", "", "1 min / 5 min", "", "",
            ],
        ]);
        let summaries = get_media_summary(&media());
        let deployments = field_deployments_sheet_to_deployments(&sheet, &summaries, bogota()).unwrap();

        assert_eq!(deployments.columns().len(), 16);
        assert_eq!(deployments.len(), 2);
        assert_eq!(deployments.get(0, "deploymentStart").to_string(), "2020-01-01T06:00:00-0500");
        assert_eq!(deployments.get(0, "deploymentEnd").to_string(), "2020-01-10T18:00:00-0500");
        assert_eq!(deployments.get(0, "locationID"), &Value::from("Finca"));
        assert_eq!(deployments.get(0, "setupBy"), &Value::from("Ana Rojas"));
        assert_eq!(deployments.get(0, "recorderHeight"), &Value::Float(1.5));

        assert_eq!(deployments.get(1, "deploymentStart"), &ts("2020-02-01T12:00:00+0000"));
        assert_eq!(deployments.get(1, "locationID"), &Value::from("L2"));
        assert!(deployments.get(1, "setupBy").is_null());
    }
}
