//! Species of interest. An absent file means "keep every species".

use super::{ColumnSpec, Dtype, PamSchema};

pub const TARGET_SPECIES: PamSchema = PamSchema {
    name: "TargetSpecies",
    columns: &[ColumnSpec::new("scientificName", Dtype::Text)],
    exact_columns: false,
};
