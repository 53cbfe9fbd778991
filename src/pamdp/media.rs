//! pamDP.Media: one row per audio recording.

use super::{ColumnSpec, Dtype, PamSchema};

pub const CAPTURE_METHODS: &[&str] = &["activityDetection", "timeLapse"];

pub const MEDIA: PamSchema = PamSchema {
    name: "Media",
    columns: &[
        ColumnSpec::new("mediaID", Dtype::Text).required().unique(),
        ColumnSpec::new("deploymentID", Dtype::Text).required(),
        ColumnSpec::new("captureMethod", Dtype::Text).one_of(CAPTURE_METHODS),
        ColumnSpec::new("timestamp", Dtype::Timestamp).required(),
        ColumnSpec::new("filePath", Dtype::Text).required(),
        ColumnSpec::new("filePublic", Dtype::Bool).required(),
        ColumnSpec::new("fileName", Dtype::Text).required(),
        ColumnSpec::new("fileMediatype", Dtype::Text).required(),
        ColumnSpec::new("sampleRate", Dtype::Float).required(),
        ColumnSpec::new("bitDepth", Dtype::Integer).required(),
        ColumnSpec::new("fileLength", Dtype::Float).required(),
        ColumnSpec::new("numChannels", Dtype::Integer).required(),
        ColumnSpec::new("favorite", Dtype::Bool),
        ColumnSpec::new("mediaComments", Dtype::Text),
    ],
    exact_columns: true,
};
