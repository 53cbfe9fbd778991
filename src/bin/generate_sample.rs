//! Writes a small synthetic survey to `data/input` (or the folder given as
//! the first argument): one folder of WAV recordings per sensor, the field
//! deployments sheet and a target species list.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use hound::{SampleFormat, WavSpec, WavWriter};
use pamflow::pamdp::field_deployments::FIELD_DEPLOYMENTS;

const SAMPLE_RATE: u32 = 16_000;
const RECORDING_SECONDS: u32 = 3;
const RECORDINGS_PER_DAY: u32 = 24;
const DAYS: u32 = 2;

/// Sensor, latitude, longitude.
const SENSORS: &[(&str, f64, f64)] = &[
    ("G001", 4.6097, -74.0817),
    ("G002", 4.6120, -74.0790),
    ("G003", 4.6075, -74.0760),
    ("G004", 4.6140, -74.0840),
    ("G005", 4.6060, -74.0805),
];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Background noise with a tone burst in the middle second.
fn synth_recording(rng: &mut SimpleRng, tone_hz: f64) -> Vec<i16> {
    let n = (SAMPLE_RATE * RECORDING_SECONDS) as usize;
    let burst = (SAMPLE_RATE as usize)..(2 * SAMPLE_RATE as usize);
    (0..n)
        .map(|i| {
            let t = i as f64 / f64::from(SAMPLE_RATE);
            let tone = if burst.contains(&i) { 0.3 * (2.0 * std::f64::consts::PI * tone_hz * t).sin() } else { 0.0 };
            let sample = (tone + rng.gauss(0.0, 0.02)).clamp(-1.0, 1.0);
            (sample * f64::from(i16::MAX)) as i16
        })
        .collect()
}

fn write_wav(path: &Path, samples: &[i16]) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

fn write_recordings(audio_root: &Path, start: NaiveDateTime, rng: &mut SimpleRng) -> Result<usize> {
    let mut written = 0;
    for (k, &(sensor, _, _)) in SENSORS.iter().enumerate() {
        let folder = audio_root.join(sensor);
        std::fs::create_dir_all(&folder).with_context(|| format!("creating {}", folder.display()))?;
        for i in 0..DAYS * RECORDINGS_PER_DAY {
            let stamp = start + Duration::minutes(60 * i64::from(i));
            let name = format!("{sensor}_{}.WAV", stamp.format("%Y%m%d_%H%M%S"));
            let tone_hz = 1_000.0 + 500.0 * k as f64 + 200.0 * rng.next_f64();
            write_wav(&folder.join(name), &synth_recording(rng, tone_hz))?;
            written += 1;
        }
    }
    Ok(written)
}

fn write_field_deployments(path: &Path, start: NaiveDateTime) -> Result<()> {
    let end = start + Duration::days(i64::from(DAYS));
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(FIELD_DEPLOYMENTS.column_names())?;
    for (k, &(sensor, lat, lon)) in SENSORS.iter().enumerate() {
        writer.write_record([
            sensor.to_string(),
            start.format("%Y-%m-%d").to_string(),
            start.format("%H:%M:%S").to_string(),
            end.format("%Y-%m-%d").to_string(),
            end.format("%H:%M:%S").to_string(),
            format!("L{:02}", k + 1),
            format!("site_{}", k + 1),
            lat.to_string(),
            lon.to_string(),
            "Ana".to_string(),
            "Rojas".to_string(),
            format!("AM{:03}", k + 1),
            "AudioMoth".to_string(),
            "1.5".to_string(),
            format!("{SAMPLE_RATE} Hz, {RECORDING_SECONDS} s every hour"),
            "forest".to_string(),
            String::new(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn write_target_species(path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(["scientificName"])?;
    for species in ["Pitangus sulphuratus", "Turdus ignobilis", "Zonotrichia capensis"] {
        writer.write_record([species])?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let root = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data/input"));
    let start = NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .context("invalid survey start")?;
    let mut rng = SimpleRng::new(42);

    let audio_root = root.join("audio");
    let written = write_recordings(&audio_root, start, &mut rng)?;
    log::info!("Wrote {written} recordings under {}", audio_root.display());

    let sheet_dir = root.join("field_deployments");
    std::fs::create_dir_all(&sheet_dir)?;
    write_field_deployments(&sheet_dir.join("field_deployments.csv"), start)?;

    let species_dir = root.join("target_species");
    std::fs::create_dir_all(&species_dir)?;
    write_target_species(&species_dir.join("target_species.csv"))?;

    log::info!("Sample survey ready in {}", root.display());
    Ok(())
}
