use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::FixedOffset;

use super::PamSchema;
use super::target_species::TARGET_SPECIES;
use crate::data::loader::{read_text, save_csv};
use crate::data::model::Table;

/// A pamDP table stored as CSV. Reads and writes both go through
/// [`PamSchema::validate`].
#[derive(Debug, Clone)]
pub struct PamDataset {
    pub schema: PamSchema,
    pub path: PathBuf,
    /// Offset used to localize naive timestamps on load.
    pub offset: FixedOffset,
}

impl PamDataset {
    pub fn new(schema: PamSchema, path: impl Into<PathBuf>, offset: FixedOffset) -> Self {
        PamDataset { schema, path: path.into(), offset }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Table> {
        if self.schema.name == TARGET_SPECIES.name && !self.path.exists() {
            log::info!("No target species file at {}, keeping every species", self.path.display());
            return Ok(Table::new(self.schema.column_names()));
        }
        let raw = read_text(&self.path)?;
        let table = self
            .schema
            .validate(&raw, self.offset)
            .with_context(|| format!("validating {}", self.path.display()))?;
        log::debug!("Loaded {} rows of pamDP.{} from {}", table.len(), self.schema.name, self.path.display());
        Ok(table)
    }

    pub fn save(&self, table: &Table) -> Result<()> {
        let table = self
            .schema
            .validate(table, self.offset)
            .with_context(|| format!("refusing to write {}", self.path.display()))?;
        save_csv(&table, &self.path)?;
        log::info!("Wrote {} rows of pamDP.{} to {}", table.len(), self.schema.name, self.path.display());
        Ok(())
    }
}
