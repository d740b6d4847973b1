//! Typed wrapper over diff engine invocations.
//!
//! The orchestrator never talks to a [`DiffEngine`] directly: this driver
//! pairs each command with the file handling around it (loading the
//! changelog a `diffChangeLog` produced, pointing `update` at the changelog
//! to execute).

use camino::Utf8Path;
use tracing::debug;

use crate::changelog::Changelog;
use crate::engine::{DiffEngine, EngineCommand, EngineConfig};
use crate::Result;

pub struct DiffDriver<'a, E> {
    engine: &'a E,
}

impl<'a, E: DiffEngine> DiffDriver<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        DiffDriver { engine }
    }

    /// Diff the target schema against the reference schema, returning the
    /// changelog of operations that would turn target into reference.
    ///
    /// The engine writes the changelog to `changelog_file`; this loads it
    /// back through the store.
    pub async fn diff_changelog(
        &self,
        mut config: EngineConfig,
        changelog_file: &Utf8Path,
    ) -> Result<Changelog> {
        config.changelog_file = Some(changelog_file.to_owned());
        self.engine
            .run(&config, EngineCommand::DiffChangelog)
            .await?;
        let changelog = Changelog::from_file(changelog_file)?;
        debug!(
            operations = changelog.len(),
            file = %changelog_file,
            "loaded diff changelog"
        );
        Ok(changelog)
    }

    /// Apply a changelog to the target schema. Side-effecting; must only run
    /// after the changelog has been fully merged, reordered, and
    /// hook-processed.
    pub async fn update(&self, mut config: EngineConfig, changelog_file: &Utf8Path) -> Result<()> {
        config.changelog_file = Some(changelog_file.to_owned());
        self.engine.run(&config, EngineCommand::Update).await?;
        Ok(())
    }

    /// Render the SQL an `update` would execute, without applying it.
    pub async fn update_sql(
        &self,
        mut config: EngineConfig,
        changelog_file: &Utf8Path,
    ) -> Result<String> {
        config.changelog_file = Some(changelog_file.to_owned());
        self.engine.run(&config, EngineCommand::UpdateSql).await
    }

    /// Write a human-readable delta report to `output_file`.
    pub async fn diff_report(
        &self,
        mut config: EngineConfig,
        output_file: &Utf8Path,
    ) -> Result<()> {
        config.output_file = Some(output_file.to_owned());
        self.engine.run(&config, EngineCommand::Diff).await?;
        Ok(())
    }

    /// Drop everything in the target schema, including non-managed objects.
    pub async fn drop_all(&self, config: EngineConfig) -> Result<()> {
        self.engine.run(&config, EngineCommand::DropAll).await?;
        Ok(())
    }
}
