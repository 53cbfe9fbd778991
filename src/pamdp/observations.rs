//! pamDP.Observations: one row per detected sound event.

use super::{ColumnSpec, Dtype, PamSchema};

pub const OBSERVATION_TYPES: &[&str] = &[
    "animal",
    "rain",
    "flowing water",
    "wind",
    "human voice",
    "electro-mechanical",
    "silence",
    "unknown",
    "unclassified",
];

pub const CLASSIFICATION_METHODS: &[&str] = &["human", "machine"];

pub const OBSERVATION_LEVELS: &[&str] = &["media", "event"];

pub const OBSERVATIONS: PamSchema = PamSchema {
    name: "Observations",
    columns: &[
        ColumnSpec::new("observationID", Dtype::Text).required().unique(),
        ColumnSpec::new("deploymentID", Dtype::Text).required(),
        ColumnSpec::new("mediaID", Dtype::Text),
        ColumnSpec::new("eventID", Dtype::Text),
        ColumnSpec::new("eventStart", Dtype::Float).required(),
        ColumnSpec::new("eventEnd", Dtype::Float).required(),
        ColumnSpec::new("frequencyLow", Dtype::Float),
        ColumnSpec::new("frequencyHigh", Dtype::Float),
        ColumnSpec::new("observationLevel", Dtype::Text).required().one_of(OBSERVATION_LEVELS),
        ColumnSpec::new("observationType", Dtype::Text).required().one_of(OBSERVATION_TYPES),
        ColumnSpec::new("scientificName", Dtype::Text),
        ColumnSpec::new("count", Dtype::Integer),
        ColumnSpec::new("lifeStage", Dtype::Text),
        ColumnSpec::new("sex", Dtype::Text),
        ColumnSpec::new("behavior", Dtype::Text),
        ColumnSpec::new("individualID", Dtype::Text),
        ColumnSpec::new("individualPositionRadius", Dtype::Float),
        ColumnSpec::new("classificationMethod", Dtype::Text).one_of(CLASSIFICATION_METHODS),
        ColumnSpec::new("classifiedBy", Dtype::Text),
        ColumnSpec::new("classificationTimestamp", Dtype::Timestamp),
        ColumnSpec::new("classificationProbability", Dtype::Float),
        ColumnSpec::new("observationTags", Dtype::Text),
        ColumnSpec::new("observationComments", Dtype::Text),
    ],
    exact_columns: true,
};
