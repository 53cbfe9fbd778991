//! The field deployments sheet filled in by the survey team. Only the listed
//! columns are enforced; teams may carry extra columns of their own.

use super::{ColumnSpec, Dtype, PamSchema};

pub const FIELD_DEPLOYMENTS: PamSchema = PamSchema {
    name: "FieldDeployments",
    columns: &[
        ColumnSpec::new("deploymentID", Dtype::Text).required().unique(),
        ColumnSpec::new("deploymentStartDate", Dtype::Text),
        ColumnSpec::new("deploymentStartTime", Dtype::Text),
        ColumnSpec::new("deploymentEndDate", Dtype::Text),
        ColumnSpec::new("deploymentEndTime", Dtype::Text),
        ColumnSpec::new("locationID", Dtype::Text),
        ColumnSpec::new("locationName", Dtype::Text),
        ColumnSpec::new("latitude", Dtype::Float).required(),
        ColumnSpec::new("longitude", Dtype::Float).required(),
        ColumnSpec::new("setupByName", Dtype::Text),
        ColumnSpec::new("setupByLastName", Dtype::Text),
        ColumnSpec::new("recorderID", Dtype::Text),
        ColumnSpec::new("recorderModel", Dtype::Text).required(),
        ColumnSpec::new("recorderHeight", Dtype::Float),
        ColumnSpec::new("recorderConfiguration", Dtype::Text).required(),
        ColumnSpec::new("habitat", Dtype::Text),
        ColumnSpec::new("deploymentComments", Dtype::Text),
    ],
    exact_columns: false,
};
