//! WAV recordings: file-name convention, header metadata, discovery and the
//! small amount of sample editing the pipelines need (trim and concatenate).

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("File name {0} does not follow <sensor>_<YYYYMMDD>_<HHMMSS>.<ext>")]
    BadFileName(String),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("WAV error in {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}: floating point samples are not supported")]
    FloatSamples(PathBuf),

    #[error("Cannot concatenate clips with different formats ({0:?} vs {1:?})")]
    SpecMismatch(WavSpec, WavSpec),

    #[error("Nothing to concatenate")]
    NoClips,
}

fn wav_error(path: &Path) -> impl FnOnce(hound::Error) -> AudioError + '_ {
    move |source| AudioError::Wav { path: path.to_path_buf(), source }
}

// ---------------------------------------------------------------------------
// File names and metadata
// ---------------------------------------------------------------------------

/// Split `<sensor>_<YYYYMMDD>_<HHMMSS>.<ext>` into the sensor name and the
/// naive recording start. The sensor may itself contain underscores.
pub fn parse_file_name(name: &str) -> Result<(String, NaiveDateTime), AudioError> {
    let bad = || AudioError::BadFileName(name.to_string());
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);

    let mut parts = stem.rsplitn(3, '_');
    let (Some(time), Some(date), Some(sensor)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(bad());
    };
    if sensor.is_empty() || date.len() != 8 || time.len() != 6 {
        return Err(bad());
    }
    let timestamp = NaiveDateTime::parse_from_str(&format!("{date}{time}"), "%Y%m%d%H%M%S")
        .map_err(|_| bad())?;
    Ok((sensor.to_string(), timestamp))
}

/// Header information for one recording.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMetadata {
    pub path: PathBuf,
    pub sensor: String,
    pub timestamp: NaiveDateTime,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    /// Sample frames per channel.
    pub samples: u32,
    /// Seconds.
    pub length: f64,
    /// Bytes on disk.
    pub file_size: u64,
}

/// Parse the file name and read the WAV header. Samples are not decoded.
pub fn read_metadata(path: &Path) -> Result<AudioMetadata, AudioError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| AudioError::BadFileName(path.display().to_string()))?;
    let (sensor, timestamp) = parse_file_name(name)?;

    let file_size = std::fs::metadata(path)
        .map_err(|source| AudioError::Io { path: path.to_path_buf(), source })?
        .len();
    let reader = WavReader::open(path).map_err(wav_error(path))?;
    let spec = reader.spec();
    let samples = reader.duration();

    Ok(AudioMetadata {
        path: path.to_path_buf(),
        sensor,
        timestamp,
        sample_rate: spec.sample_rate,
        bit_depth: spec.bits_per_sample,
        channels: spec.channels,
        samples,
        length: samples as f64 / spec.sample_rate as f64,
        file_size,
    })
}

/// Every `.wav` file under `root` (any case), sorted. Unreadable entries are
/// logged and skipped.
pub fn find_wav_files(root: &Path) -> Result<Vec<PathBuf>, AudioError> {
    if !root.is_dir() {
        return Err(AudioError::NotADirectory(root.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        match entry {
            Ok(entry) => {
                let is_wav = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
                if entry.file_type().is_file() && is_wav {
                    files.push(entry.into_path());
                }
            }
            Err(e) => log::warn!("Skipping unreadable entry: {e}"),
        }
    }
    files.sort();
    log::debug!("Found {} WAV files under {}", files.len(), root.display());
    Ok(files)
}

// ---------------------------------------------------------------------------
// Clips
// ---------------------------------------------------------------------------

/// Decoded integer PCM: interleaved samples plus the format they came in.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub spec: WavSpec,
    pub samples: Vec<i32>,
}

impl Clip {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.spec.channels.max(1) as usize
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.spec.sample_rate as f64
    }
}

pub fn read_clip(path: &Path) -> Result<Clip, AudioError> {
    let mut reader = WavReader::open(path).map_err(wav_error(path))?;
    let spec = reader.spec();
    if spec.sample_format == SampleFormat::Float {
        return Err(AudioError::FloatSamples(path.to_path_buf()));
    }
    let samples = reader
        .samples::<i32>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(wav_error(path))?;
    Ok(Clip { spec, samples })
}

/// The frames in `[start_s, end_s)`, clamped to the clip.
pub fn trim(clip: &Clip, start_s: f64, end_s: f64) -> Clip {
    let rate = clip.spec.sample_rate as f64;
    let channels = clip.spec.channels.max(1) as usize;
    let frames = clip.frames();
    let to_frame = |t: f64| ((t.max(0.0) * rate).round() as usize).min(frames);
    let (start, end) = (to_frame(start_s), to_frame(end_s));
    let samples = if end > start {
        clip.samples[start * channels..end * channels].to_vec()
    } else {
        Vec::new()
    };
    Clip { spec: clip.spec, samples }
}

/// Join clips end to end. All clips must share the same format.
pub fn concat(clips: &[Clip]) -> Result<Clip, AudioError> {
    let first = clips.first().ok_or(AudioError::NoClips)?;
    let mut samples = Vec::with_capacity(clips.iter().map(|c| c.samples.len()).sum());
    for clip in clips {
        if clip.spec != first.spec {
            return Err(AudioError::SpecMismatch(first.spec, clip.spec));
        }
        samples.extend_from_slice(&clip.samples);
    }
    Ok(Clip { spec: first.spec, samples })
}

pub fn write_clip(clip: &Clip, path: &Path) -> Result<(), AudioError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|source| AudioError::Io { path: parent.to_path_buf(), source })?;
    }
    let mut writer = WavWriter::create(path, clip.spec).map_err(wav_error(path))?;
    for &s in &clip.samples {
        writer.write_sample(s).map_err(wav_error(path))?;
    }
    writer.finalize().map_err(wav_error(path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono(sample_rate: u32) -> WavSpec {
        WavSpec { channels: 1, sample_rate, bits_per_sample: 16, sample_format: SampleFormat::Int }
    }

    fn ramp(sample_rate: u32, frames: i32) -> Clip {
        Clip { spec: mono(sample_rate), samples: (0..frames).collect() }
    }

    #[test]
    fn file_name_with_underscored_sensor() {
        let (sensor, ts) = parse_file_name("G60_A_20240301_063000.WAV").unwrap();
        assert_eq!(sensor, "G60_A");
        assert_eq!(ts.to_string(), "2024-03-01 06:30:00");
    }

    #[test]
    fn malformed_file_names_are_rejected() {
        for name in ["20240301_063000.wav", "S1_2024031_063000.wav", "S1_20241301_063000.wav", "noise.wav"] {
            assert!(matches!(parse_file_name(name), Err(AudioError::BadFileName(_))), "{name}");
        }
    }

    #[test]
    fn metadata_from_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("S1_20240301_060000.wav");
        write_clip(&ramp(8000, 4000), &path).unwrap();

        let meta = read_metadata(&path).unwrap();
        assert_eq!(meta.sensor, "S1");
        assert_eq!(meta.sample_rate, 8000);
        assert_eq!(meta.bit_depth, 16);
        assert_eq!(meta.samples, 4000);
        assert_eq!(meta.length, 0.5);
        assert!(meta.file_size > 8000);
    }

    #[test]
    fn discovery_is_recursive_and_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let clip = ramp(8000, 10);
        write_clip(&clip, &dir.path().join("S2/S2_20240301_060000.WAV")).unwrap();
        write_clip(&clip, &dir.path().join("S1/day1/S1_20240301_060000.wav")).unwrap();
        std::fs::write(dir.path().join("S1/notes.txt"), "x").unwrap();

        let files = find_wav_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("S1/day1/S1_20240301_060000.wav"));
    }

    #[test]
    fn trim_clamps_to_clip() {
        let clip = ramp(10, 30);
        let cut = trim(&clip, 1.0, 2.0);
        assert_eq!(cut.samples, (10..20).collect::<Vec<_>>());
        assert_eq!(trim(&clip, 2.5, 9.0).frames(), 5);
        assert!(trim(&clip, 5.0, 6.0).samples.is_empty());
    }

    #[test]
    fn concat_rejects_mixed_formats() {
        let joined = concat(&[ramp(10, 3), ramp(10, 2)]).unwrap();
        assert_eq!(joined.samples, vec![0, 1, 2, 0, 1]);
        assert!(matches!(concat(&[ramp(10, 3), ramp(20, 3)]), Err(AudioError::SpecMismatch(..))));
        assert!(matches!(concat(&[]), Err(AudioError::NoClips)));
    }
}
