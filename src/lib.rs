//! pamflow: passive acoustic monitoring pipeline.
//!
//! Recordings laid out as `<root>/<deploymentID>/**/<sensor>_<YYYYMMDD>_<HHMMSS>.wav`
//! become schema-validated pamDP tables (Media, Deployments, Observations),
//! quality-control summaries, classifier detections, audio segments for
//! manual review and per-species confidence thresholds.

pub mod audio;
pub mod config;
pub mod data;
pub mod geo;
pub mod pamdp;
pub mod parallel;
pub mod pipelines;
