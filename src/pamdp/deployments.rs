//! pamDP.Deployments: one row per recorder placement.

use super::{ColumnSpec, Dtype, PamSchema};

pub const DEPLOYMENTS: PamSchema = PamSchema {
    name: "Deployments",
    columns: &[
        ColumnSpec::new("deploymentID", Dtype::Text).required().unique(),
        ColumnSpec::new("locationID", Dtype::Text),
        ColumnSpec::new("locationName", Dtype::Text),
        ColumnSpec::new("latitude", Dtype::Float).required(),
        ColumnSpec::new("longitude", Dtype::Float).required(),
        ColumnSpec::new("coordinateUncertainty", Dtype::Float),
        ColumnSpec::new("deploymentStart", Dtype::Timestamp).required(),
        ColumnSpec::new("deploymentEnd", Dtype::Timestamp).required(),
        ColumnSpec::new("setupBy", Dtype::Text),
        ColumnSpec::new("recorderID", Dtype::Text),
        ColumnSpec::new("recorderModel", Dtype::Text).required(),
        ColumnSpec::new("recorderHeight", Dtype::Float),
        ColumnSpec::new("recorderConfiguration", Dtype::Text).required(),
        ColumnSpec::new("habitat", Dtype::Text),
        ColumnSpec::new("deploymentGroups", Dtype::Text),
        ColumnSpec::new("deploymentComments", Dtype::Text),
    ],
    exact_columns: true,
};
