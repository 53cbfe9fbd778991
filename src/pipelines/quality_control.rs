use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, Timelike};
use serde::Serialize;

use super::data_preparation::MediaSummary;
use crate::audio::{concat, read_clip, trim, write_clip};
use crate::data::model::{Table, Value};
use crate::data::ops::{group_indices, round_to};
use crate::geo::convex_hull_area_km2;

// ---------------------------------------------------------------------------
// Sensor performance
// ---------------------------------------------------------------------------

/// Number of recordings a deployment made on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRecordings {
    #[serde(rename = "deploymentID")]
    pub deployment_id: String,
    pub date: NaiveDate,
    pub count: usize,
}

/// Recordings per deployment per local calendar day, sorted by deployment
/// then date.
pub fn sensor_performance(media: &Table) -> Vec<DailyRecordings> {
    let mut counts: BTreeMap<(String, NaiveDate), usize> = BTreeMap::new();
    for row in 0..media.len() {
        let (Some(deployment), Some(ts)) =
            (media.get(row, "deploymentID").as_text(), media.get(row, "timestamp").as_timestamp())
        else {
            continue;
        };
        *counts.entry((deployment, ts.date_naive())).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((deployment_id, date), count)| DailyRecordings { deployment_id, date, count })
        .collect()
}

// ---------------------------------------------------------------------------
// Survey effort
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyEffort {
    pub n_deployments: usize,
    pub n_recordings: usize,
    /// Total recorded audio, in hours, one decimal.
    pub recording_hours: f64,
    pub survey_start: Option<NaiveDate>,
    pub survey_end: Option<NaiveDate>,
    pub temporal_coverage_days: Option<i64>,
    pub n_locations: usize,
    /// Convex hull of the deployment coordinates, whole km². Only computed
    /// with more than three locations.
    pub spatial_coverage_km2: Option<f64>,
}

pub fn survey_effort(summaries: &[MediaSummary], deployments: &Table, media: &Table) -> SurveyEffort {
    let total_seconds: f64 = media.column("fileLength").filter_map(Value::as_f64).sum();
    let survey_start = summaries.iter().map(|s| s.date_ini.date_naive()).min();
    let survey_end = summaries.iter().map(|s| s.date_end.date_naive()).max();
    let n_locations = deployments.column("locationID").filter(|v| !v.is_null()).collect::<BTreeSet<_>>().len();

    let spatial_coverage_km2 = (n_locations > 3).then(|| {
        let points: Vec<(f64, f64)> = (0..deployments.len())
            .filter_map(|r| Some((deployments.get(r, "latitude").as_f64()?, deployments.get(r, "longitude").as_f64()?)))
            .collect();
        convex_hull_area_km2(&points).round()
    });

    let effort = SurveyEffort {
        n_deployments: deployments.column("deploymentID").filter(|v| !v.is_null()).collect::<BTreeSet<_>>().len(),
        n_recordings: media.len(),
        recording_hours: round_to(total_seconds / 3600.0, 1),
        survey_start,
        survey_end,
        temporal_coverage_days: survey_start.zip(survey_end).map(|(s, e)| (e - s).num_days()),
        n_locations,
        spatial_coverage_km2,
    };
    log::info!(
        "Survey effort: {} deployments, {} recordings ({} h), {} locations",
        effort.n_deployments,
        effort.n_recordings,
        effort.recording_hours,
        effort.n_locations
    );
    effort
}

// ---------------------------------------------------------------------------
// Timelapse
// ---------------------------------------------------------------------------

/// The day covered by the most deployments; ties go to the higher mean
/// number of recordings per deployment, then to the earlier day.
pub fn select_timelapse_date(daily: &[DailyRecordings]) -> Option<NaiveDate> {
    let mut per_day: BTreeMap<NaiveDate, (BTreeSet<&str>, usize)> = BTreeMap::new();
    for d in daily {
        let entry = per_day.entry(d.date).or_default();
        entry.0.insert(&d.deployment_id);
        entry.1 += d.count;
    }

    let mut best: Option<(NaiveDate, usize, f64)> = None;
    for (date, (sensors, total)) in per_day {
        let n = sensors.len();
        let mean = total as f64 / n as f64;
        let better = match best {
            None => true,
            Some((_, bn, bmean)) => n > bn || (n == bn && mean > bmean),
        };
        if better {
            best = Some((date, n, mean));
        }
    }
    best.map(|(date, _, _)| date)
}

/// One written timelapse file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timelapse {
    #[serde(rename = "deploymentID")]
    pub deployment_id: String,
    pub date: NaiveDate,
    pub n_files: usize,
    pub duration: f64,
    pub path: PathBuf,
}

/// Build one timelapse WAV per deployment for a single day: the first
/// recording of every `sample_period` bucket (counted from midnight)
/// contributes its first `sample_length` seconds.
///
/// A deployment that fails is logged and skipped.
pub fn get_timelapse(
    media: &Table,
    daily: &[DailyRecordings],
    sample_length: f64,
    sample_period: Duration,
    sample_date: Option<NaiveDate>,
    out_dir: &Path,
) -> Result<Vec<Timelapse>> {
    let date = match sample_date {
        Some(d) => d,
        None => select_timelapse_date(daily).context("no recordings to build a timelapse from")?,
    };
    let period = sample_period.as_secs().max(1);

    let day = media.filter(|t, r| t.get(r, "timestamp").as_timestamp().is_some_and(|ts| ts.date_naive() == date));
    let groups = group_indices(&day, "deploymentID");
    log::info!("Processing audio timelapse for {} deployments on {date}", groups.len());

    let mut written = Vec::new();
    for (deployment, rows) in groups {
        log::info!("Processing deployment: {deployment}...");
        let mut files: Vec<(DateTime<FixedOffset>, String)> = rows
            .iter()
            .filter_map(|&r| Some((day.get(r, "timestamp").as_timestamp()?, day.get(r, "filePath").as_text()?)))
            .collect();
        files.sort();

        let mut buckets: BTreeMap<u64, &str> = BTreeMap::new();
        for (ts, path) in &files {
            let bucket = ts.num_seconds_from_midnight() as u64 / period;
            buckets.entry(bucket).or_insert(path.as_str());
        }
        let picked: Vec<&str> = buckets.into_values().collect();

        let path = out_dir.join(format!("{deployment}_timelapse_{date}.wav"));
        match build_timelapse(&picked, sample_length, &path) {
            Ok(duration) => written.push(Timelapse {
                deployment_id: deployment.to_string(),
                date,
                n_files: picked.len(),
                duration,
                path,
            }),
            Err(e) => log::error!("Timelapse for {deployment} failed: {e:#}"),
        }
    }
    Ok(written)
}

fn build_timelapse(files: &[&str], sample_length: f64, out: &Path) -> Result<f64> {
    let clips = files
        .iter()
        .map(|f| read_clip(Path::new(f)).map(|c| trim(&c, 0.0, sample_length)))
        .collect::<Result<Vec<_>, _>>()?;
    let joined = concat(&clips)?;
    write_clip(&joined, out)?;
    Ok(joined.duration())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Clip;
    use crate::data::model::TIMESTAMP_FORMAT;
    use hound::{SampleFormat, WavSpec};

    fn ts(s: &str) -> Value {
        Value::Timestamp(DateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap())
    }

    fn media(rows: Vec<(&str, &str, &str)>) -> Table {
        Table::from_rows(
            vec!["deploymentID".into(), "timestamp".into(), "filePath".into(), "fileLength".into()],
            rows.into_iter()
                .map(|(d, t, p)| vec![d.into(), ts(t), p.into(), 60.0.into()])
                .collect(),
        )
    }

    #[test]
    fn recordings_counted_per_local_day() {
        let m = media(vec![
            ("S2", "2024-03-01T23:30:00-0500", "a"),
            ("S1", "2024-03-01T06:00:00-0500", "b"),
            ("S1", "2024-03-01T07:00:00-0500", "c"),
            ("S1", "2024-03-02T06:00:00-0500", "d"),
        ]);
        let daily = sensor_performance(&m);
        let summary: Vec<(&str, String, usize)> =
            daily.iter().map(|d| (d.deployment_id.as_str(), d.date.to_string(), d.count)).collect();
        assert_eq!(
            summary,
            vec![("S1", "2024-03-01".into(), 2), ("S1", "2024-03-02".into(), 1), ("S2", "2024-03-01".into(), 1)]
        );
    }

    fn day(d: &str, date: &str, count: usize) -> DailyRecordings {
        DailyRecordings { deployment_id: d.into(), date: date.parse().unwrap(), count }
    }

    #[test]
    fn timelapse_day_prefers_coverage_then_mean() {
        let daily = vec![
            day("S1", "2024-03-01", 50),
            day("S1", "2024-03-02", 10),
            day("S2", "2024-03-02", 10),
            day("S1", "2024-03-03", 20),
            day("S2", "2024-03-03", 30),
            day("S1", "2024-03-04", 25),
            day("S2", "2024-03-04", 25),
        ];
        assert_eq!(select_timelapse_date(&daily), "2024-03-03".parse().ok());
        assert_eq!(select_timelapse_date(&[]), None);
    }

    #[test]
    fn spatial_coverage_needs_more_than_three_locations() {
        let deployments = Table::from_rows(
            vec!["deploymentID".into(), "locationID".into(), "latitude".into(), "longitude".into()],
            vec![
                vec!["S1".into(), "L1".into(), 0.0.into(), 0.0.into()],
                vec!["S2".into(), "L2".into(), 0.1.into(), 0.0.into()],
                vec!["S3".into(), "L3".into(), 0.1.into(), 0.1.into()],
                vec!["S4".into(), "L4".into(), 0.0.into(), 0.1.into()],
            ],
        );
        let m = media(vec![("S1", "2024-03-01T06:00:00-0500", "a"), ("S2", "2024-03-01T06:00:00-0500", "b")]);
        let effort = survey_effort(&[], &deployments, &m);
        assert_eq!(effort.n_deployments, 4);
        assert_eq!(effort.recording_hours, 0.0);
        assert_eq!(effort.spatial_coverage_km2, Some(124.0));
        assert_eq!(effort.temporal_coverage_days, None);

        let three = deployments.take_rows(&[0, 1, 2]);
        assert_eq!(survey_effort(&[], &three, &m).spatial_coverage_km2, None);
    }

    #[test]
    fn timelapse_takes_first_file_per_period() {
        let dir = tempfile::tempdir().unwrap();
        let spec = WavSpec { channels: 1, sample_rate: 100, bits_per_sample: 16, sample_format: SampleFormat::Int };
        let mut paths = Vec::new();
        for (i, name) in ["S1_0600.wav", "S1_0602.wav", "S1_0610.wav"].iter().enumerate() {
            let path = dir.path().join(name);
            write_clip(&Clip { spec, samples: vec![i as i32; 500] }, &path).unwrap();
            paths.push(path.display().to_string());
        }
        let m = media(vec![
            ("S1", "2024-03-01T06:00:00-0500", paths[0].as_str()),
            ("S1", "2024-03-01T06:02:00-0500", paths[1].as_str()),
            ("S1", "2024-03-01T06:10:00-0500", paths[2].as_str()),
            ("S1", "2024-03-02T06:00:00-0500", paths[0].as_str()),
        ]);
        let out = dir.path().join("timelapse");
        let date = "2024-03-01".parse().ok();
        let written =
            get_timelapse(&m, &[], 2.0, Duration::from_secs(300), date, &out).unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(written[0].n_files, 2);
        assert_eq!(written[0].duration, 4.0);
        let clip = read_clip(&out.join("S1_timelapse_2024-03-01.wav")).unwrap();
        assert_eq!(clip.samples[..200], vec![0; 200][..]);
        assert_eq!(clip.samples[200..], vec![2; 200][..]);
    }
}
