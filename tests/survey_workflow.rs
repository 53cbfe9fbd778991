use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use hound::{SampleFormat, WavSpec, WavWriter};
use rand::SeedableRng;
use rand::rngs::StdRng;

use pamflow::audio::read_clip;
use pamflow::data::loader::{load_file, save_csv};
use pamflow::data::model::{Table, Value};
use pamflow::pamdp::PamDataset;
use pamflow::pamdp::field_deployments::FIELD_DEPLOYMENTS;
use pamflow::pamdp::media::MEDIA;
use pamflow::pamdp::observations::OBSERVATIONS;
use pamflow::pipelines::data_preparation::{
    field_deployments_sheet_to_deployments, get_media_file, get_media_summary,
};
use pamflow::pipelines::data_science::{apply_thresholds, find_thresholds, load_thresholds, save_thresholds};
use pamflow::pipelines::quality_control::{get_timelapse, sensor_performance};
use pamflow::pipelines::species_detection::{
    Detection, DetectionRequest, SpeciesDetector, create_segments, create_segments_folder,
    filter_observations, species_detection_parallel,
};

const RATE: u32 = 8_000;

fn bogota() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).unwrap()
}

fn write_recording(path: &Path, seconds: u32) {
    let spec = WavSpec { channels: 1, sample_rate: RATE, bits_per_sample: 16, sample_format: SampleFormat::Int };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..RATE * seconds {
        writer.write_sample(((i % 200) as i16 - 100) * 50).unwrap();
    }
    writer.finalize().unwrap();
}

/// Two sensors, three 4 s recordings each, ten minutes apart.
fn build_survey(root: &Path) {
    for sensor in ["S1", "S2"] {
        let folder = root.join("audio").join(sensor);
        std::fs::create_dir_all(&folder).unwrap();
        for minute in ["00", "10", "20"] {
            write_recording(&folder.join(format!("{sensor}_20240301_06{minute}00.WAV")), 4);
        }
    }
    std::fs::write(
        root.join("field_deployments.csv"),
        "deploymentID,deploymentStartDate,deploymentStartTime,deploymentEndDate,deploymentEndTime,\
         locationID,locationName,latitude,longitude,setupByName,setupByLastName,recorderID,\
         recorderModel,recorderHeight,recorderConfiguration,habitat,deploymentComments\n\
         S1,2024-03-01,05:00:00,,,,north,4.61,-74.08,Ana,Rojas,,AudioMoth,,8 kHz,,\n\
         S2,,,,,,south,4.60,-74.07,Ana,,,AudioMoth,,8 kHz,,\n",
    )
    .unwrap();
}

/// Every recording from S1 holds a thrush and a sparrow; S2 only the thrush.
struct FakeDetector;

impl SpeciesDetector for FakeDetector {
    fn classified_by(&self) -> String {
        "Fake 0.1".into()
    }

    fn detect(&self, request: &DetectionRequest) -> Result<Vec<Detection>> {
        let hit = |name: &str, start: f64, confidence: f64| Detection {
            scientific_name: name.into(),
            common_name: String::new(),
            start,
            end: start + 3.0,
            confidence,
        };
        let mut hits = vec![hit("Turdus ignobilis", 0.0, 0.91)];
        if request.deployment_id == "S1" {
            hits.push(hit("Zonotrichia capensis", 1.0, 0.45));
        }
        Ok(hits)
    }
}

fn now() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2024-04-01T12:00:00-05:00").unwrap()
}

#[test]
fn survey_from_audio_folders_to_segments() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    build_survey(root);
    let offset = bogota();

    // data preparation
    let sheet = PamDataset::new(FIELD_DEPLOYMENTS, root.join("field_deployments.csv"), offset).load().unwrap();
    let media = get_media_file(&root.join("audio"), &sheet, offset, 2).unwrap();
    assert_eq!(media.len(), 6);
    assert!(media.column("mediaID").any(|v| v == &Value::from("S1_20240301_061000")));

    let media_csv = PamDataset::new(MEDIA, root.join("out/media.csv"), offset);
    media_csv.save(&media).unwrap();
    let media = media_csv.load().unwrap();
    assert_eq!(media.columns(), MEDIA.column_names().as_slice());

    let summaries = get_media_summary(&media);
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].n_recordings, 3);
    assert_eq!(summaries[0].time_diff, Some(600.0));
    assert_eq!(summaries[1].duration, 1200.0);

    let deployments = field_deployments_sheet_to_deployments(&sheet, &summaries, offset).unwrap();
    assert_eq!(deployments.len(), 2);
    let start = |r: usize| deployments.get(r, "deploymentStart").as_timestamp().unwrap();
    assert_eq!(start(0), DateTime::parse_from_rfc3339("2024-03-01T05:00:00-05:00").unwrap());
    assert_eq!(start(1), summaries[1].date_ini);
    assert_eq!(deployments.get(0, "setupBy"), &Value::from("Ana Rojas"));
    assert_eq!(deployments.get(1, "locationID"), &Value::from("south"));

    // quality control
    let daily = sensor_performance(&media);
    assert_eq!(daily.len(), 2);
    assert!(daily.iter().all(|d| d.count == 3));
    let timelapses = get_timelapse(
        &media,
        &daily,
        1.0,
        std::time::Duration::from_secs(300),
        None,
        &root.join("out/timelapse"),
    )
    .unwrap();
    assert_eq!(timelapses.len(), 2);
    for t in &timelapses {
        assert_eq!(t.n_files, 3);
        assert_eq!(read_clip(&t.path).unwrap().frames(), 3 * RATE as usize);
    }

    // species detection
    let observations = species_detection_parallel(&media, &deployments, 2, &FakeDetector, now()).unwrap();
    assert_eq!(observations.len(), 9);
    assert_eq!(observations.columns(), OBSERVATIONS.column_names().as_slice());

    let targets = Table::from_rows(
        vec!["scientificName".into()],
        vec![vec!["Turdus ignobilis".into()], vec!["Zonotrichia capensis".into()]],
    );
    let kept = filter_observations(&observations, &targets, 4, 2).unwrap();
    assert_eq!(kept.len(), 6);
    assert_eq!(kept.unique_values("scientificName").len(), 1);

    let mut rng = StdRng::seed_from_u64(42);
    let segments = create_segments(&kept, &media, 2, &mut rng).unwrap();
    assert_eq!(segments.len(), 2);

    let outcome = create_segments_folder(&segments, &root.join("out/segments"), 2).unwrap();
    assert!(outcome.failures.is_empty());
    let written: Vec<_> = outcome.values().collect();
    assert_eq!(written.len(), 2);
    for path in written {
        assert!(path.starts_with(root.join("out/segments/Turdus_ignobilis")));
        assert_eq!(read_clip(&path).unwrap().frames(), 3 * RATE as usize);
    }
}

#[test]
fn thresholds_fitted_from_annotation_sheets() {
    let dir = tempfile::tempdir().unwrap();

    // Labels mostly follow the confidence, with one miss on each side.
    let rows: Vec<Vec<Value>> = (1..=20)
        .map(|i| {
            let positive = (i >= 10 && i != 12) || i == 7;
            vec!["Turdus ignobilis".into(), Value::Float(f64::from(i) / 20.0), Value::Integer(i64::from(positive))]
        })
        .collect();
    let sheet = Table::from_rows(
        vec!["scientificName".into(), "classificationProbability".into(), "positive".into()],
        rows,
    );
    let sheet_path = dir.path().join("annotations_Turdus_ignobilis.csv");
    save_csv(&sheet, &sheet_path).unwrap();
    let annotations = load_file(&sheet_path).unwrap();

    let found = find_thresholds(&annotations, "positive", "classificationProbability", 0.9, 1).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].n_annotations, 20);
    assert!(found[0].threshold > 0.5 && found[0].threshold.is_finite());
    assert!(found[0].aic_confidence < found[0].aic_null);

    let thresholds_path = dir.path().join("thresholds.csv");
    save_thresholds(&found, &thresholds_path).unwrap();
    let loaded = load_thresholds(&thresholds_path).unwrap();
    assert_eq!(loaded, found);

    let observations = Table::from_rows(
        vec!["scientificName".into(), "classificationProbability".into()],
        vec![
            vec!["Turdus ignobilis".into(), Value::Float(0.99)],
            vec!["Turdus ignobilis".into(), Value::Float(0.2)],
            vec!["Zonotrichia capensis".into(), Value::Float(0.99)],
        ],
    );
    let by_species = apply_thresholds(&observations, &loaded);
    assert_eq!(by_species.len(), 1);
    assert_eq!(by_species["Turdus ignobilis"].len(), 1);
}
