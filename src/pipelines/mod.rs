/// Pipeline steps. Each step is a plain function from tables to tables; the
/// CLI wires them to files.
///
/// ```text
///  audio root + field sheet
///        │
///        ▼
///   data_preparation ──► media, media summary, deployments ──► export
///        │                                                     (CSA, DwC events)
///        ├──────────────────────┐
///        ▼                      ▼
///   quality_control        species_detection ──► observations, segments,
///   (effort, timelapse)          │                annotation sheets
///                                ▼
///                           data_science ──► thresholds, filtered detections
/// ```

pub mod data_preparation;
pub mod data_science;
pub mod export;
pub mod quality_control;
pub mod species_detection;
