//! Migration orchestration.
//!
//! The [`Migrator`] owns one run against one service: it sequences clone
//! synchronization, the two diff passes, changelog merging and filtering,
//! undeploy injection, dependency reordering, hooks, and the final
//! apply-or-preview. Every step is awaited to completion before the next
//! begins; nothing here retries.
//!
//! We diff through a clone and a reference schema because the first thing a
//! delta computation needs is to drop all the views, and we are not doing
//! that to a potentially production database.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::adapter::Adapter;
use crate::changelog::{read_undeploy_list, Changelog, UndeployEntity};
use crate::config::MigrationsConfig;
use crate::driver::DiffDriver;
use crate::engine::{DiffEngine, EngineCommand};
use crate::model::{CompiledModel, EntityKind, ModelCompiler};
use crate::reorder::{reorder_changelog, ViewDefinition};
use crate::{Error, Result};

/// Options for [`Migrator::deploy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// Allow the delta to drop tables no longer in the model. Off by
    /// default: tables are never silently dropped.
    pub auto_undeploy: bool,
    /// Trigger a post-deploy data load.
    pub load_mode: Option<LoadMode>,
    /// Render the update SQL instead of applying it.
    pub dry_run: bool,
    /// Create the target database first if it does not exist.
    pub create_db: bool,
}

/// Options for [`Migrator::drop`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DropOptions {
    /// Drop the whole schema, including non-managed objects.
    pub drop_all: bool,
}

/// Options for [`Migrator::diff`].
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Persist the report here. Without it the report is logged and the
    /// transient file deleted.
    pub output_file: Option<Utf8PathBuf>,
}

/// Post-deploy data load semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Only load what changed.
    Delta,
    /// Truncate and reload everything.
    Full,
}

impl LoadMode {
    pub fn is_full(self) -> bool {
        self == LoadMode::Full
    }
}

/// How a deploy run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    /// The delta was applied to the live schema.
    Applied,
    /// Dry run: the SQL the engine would have executed. The live schema was
    /// not touched.
    Previewed { sql: String },
}

/// Extension point invoked with the final changelog, after reordering and
/// before it is persisted and applied.
pub trait BeforeDeploy {
    fn before_deploy(&self, changelog: &mut Changelog) -> Result<()> {
        let _ = changelog;
        Ok(())
    }
}

/// The default hook: does nothing.
pub struct NoopHook;

impl BeforeDeploy for NoopHook {}

/// Post-deploy data loading collaborator.
pub trait DataLoader {
    fn load_from(
        &self,
        model: &CompiledModel,
        sources: &[&str],
        full: bool,
    ) -> impl Future<Output = Result<()>>;
}

/// The default loader: does nothing.
pub struct NoopLoader;

impl DataLoader for NoopLoader {
    async fn load_from(&self, _model: &CompiledModel, _sources: &[&str], _full: bool) -> Result<()> {
        Ok(())
    }
}

/// Removes a temporary file when dropped, on success and failure alike.
/// Cleanup failure is logged, never allowed to mask the primary error.
struct TempFileGuard {
    path: Utf8PathBuf,
}

impl TempFileGuard {
    fn new(path: Utf8PathBuf) -> Self {
        TempFileGuard { path }
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path, error = %e, "failed to remove temporary changelog file");
            }
        }
    }
}

/// One migration run's worth of context: service key, schema/deploy
/// configuration, and the collaborators. No ambient globals - everything a
/// workflow needs is owned here.
pub struct Migrator<A, E, C, L = NoopLoader> {
    service: String,
    config: MigrationsConfig,
    adapter: A,
    engine: E,
    compiler: C,
    hook: Box<dyn BeforeDeploy + Send + Sync>,
    loader: L,
}

impl<A, E, C> Migrator<A, E, C, NoopLoader> {
    pub fn new(
        service: impl Into<String>,
        config: MigrationsConfig,
        adapter: A,
        engine: E,
        compiler: C,
    ) -> Self {
        Migrator {
            service: service.into(),
            config,
            adapter,
            engine,
            compiler,
            hook: Box::new(NoopHook),
            loader: NoopLoader,
        }
    }
}

impl<A, E, C, L> Migrator<A, E, C, L> {
    pub fn with_hook(mut self, hook: impl BeforeDeploy + Send + Sync + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn with_loader<L2>(self, loader: L2) -> Migrator<A, E, C, L2> {
        Migrator {
            service: self.service,
            config: self.config,
            adapter: self.adapter,
            engine: self.engine,
            compiler: self.compiler,
            hook: self.hook,
            loader,
        }
    }
}

impl<A, E, C, L> Migrator<A, E, C, L>
where
    A: Adapter,
    E: DiffEngine,
    C: ModelCompiler,
    L: DataLoader,
{
    /// Identify the delta between the model and the live database and apply
    /// (or preview) it.
    pub async fn deploy(&self, options: DeployOptions) -> Result<DeployOutcome> {
        info!(service = %self.service, "starting delta deployment");

        if options.create_db {
            self.adapter.create_database().await?;
        }

        // Bad model: fail before any schema is touched.
        let model = self.compiler.compile()?;

        let tmp_file = self.config.deploy.tmp_file.clone();
        prepare_tmp_file(&tmp_file)?;
        let _tmp_guard = TempFileGuard::new(tmp_file.clone());

        let driver = DiffDriver::new(&self.engine);

        // The clone mirrors what is live right now, independent of in-flight
        // changes; then its views go away so the first diff captures exactly
        // the view-drop operations.
        self.adapter.synchronize_clone(&driver, &tmp_file).await?;
        self.adapter.drop_views_from_clone(&model).await?;

        let mut config = self.adapter.engine_config_for(EngineCommand::DiffChangelog);
        config.default_schema_name = Some(self.config.schema.default.clone());
        config.reference_default_schema_name = Some(self.config.schema.clone.clone());
        let drop_views_log = driver.diff_changelog(config, &tmp_file).await?;
        fs::remove_file(&tmp_file).map_err(|e| Error::io(&tmp_file, e))?;

        self.adapter.deploy_to_reference(&model).await?;

        // Full structural delta: post-view-drop clone vs freshly built
        // reference.
        let mut config = self.adapter.engine_config_for(EngineCommand::DiffChangelog);
        config.default_schema_name = Some(self.config.schema.clone.clone());
        let delta_log = driver.diff_changelog(config, &tmp_file).await?;

        // View drops always precede the rest.
        let mut changelog = drop_views_log.concat(delta_log);

        if !options.auto_undeploy {
            changelog.remove_drop_table_statements();
        }

        if let Some(names) = read_undeploy_list(&self.config.deploy.undeploy_file)? {
            let mut entities = Vec::with_capacity(names.len());
            for name in names {
                let kind = match self.adapter.get_view_definition(&name).await? {
                    Some(_) => EntityKind::View,
                    None => EntityKind::Table,
                };
                entities.push(UndeployEntity { name, kind });
            }
            info!(count = entities.len(), "appending undeploy drops");
            changelog.append_undeploy_drops(&entities);
        }

        let views = self.resolve_view_definitions(&changelog).await?;
        reorder_changelog(&mut changelog, &views)?;

        self.hook.before_deploy(&mut changelog)?;

        changelog.to_file(&tmp_file)?;

        let command = if options.dry_run {
            EngineCommand::UpdateSql
        } else {
            EngineCommand::Update
        };
        let mut config = self.adapter.engine_config_for(command);
        config.default_schema_name = Some(self.config.schema.default.clone());

        if options.dry_run {
            let sql = driver.update_sql(config, &tmp_file).await?;
            info!(service = %self.service, "dry run, live schema untouched");
            Ok(DeployOutcome::Previewed { sql })
        } else {
            driver.update(config, &tmp_file).await?;
            info!(service = %self.service, "delta successfully deployed to the database");
            if let Some(mode) = options.load_mode {
                self.load(mode).await?;
            }
            Ok(DeployOutcome::Applied)
        }
    }

    /// Generate a delta report comparing the live database to the model.
    ///
    /// Returns the report text when no output file was requested (the
    /// transient file is deleted), `None` when it was written to
    /// `output_file`.
    pub async fn diff(&self, options: DiffOptions) -> Result<Option<String>> {
        let model = self.compiler.compile()?;
        self.adapter.deploy_to_reference(&model).await?;

        let driver = DiffDriver::new(&self.engine);
        let tmp_dir = tmp_dir_of(&self.config.deploy.tmp_file);
        fs::create_dir_all(&tmp_dir).map_err(|e| Error::io(&tmp_dir, e))?;

        // An update pass with an empty changelog materializes the engine's
        // own bookkeeping tables in the reference schema, so the diff below
        // does not report them.
        let empty_file = tmp_dir.join("molt-empty-changelog.json");
        let _empty_guard = TempFileGuard::new(empty_file.clone());
        Changelog::default().to_file(&empty_file)?;
        let mut config = self.adapter.engine_config_for(EngineCommand::Update);
        config.default_schema_name = Some(self.config.schema.reference.clone());
        driver.update(config, &empty_file).await?;

        let (output_file, keep) = match &options.output_file {
            Some(path) => (path.clone(), true),
            None => (tmp_dir.join("molt-diff.txt"), false),
        };
        let config = self.adapter.engine_config_for(EngineCommand::Diff);
        driver.diff_report(config, &output_file).await?;

        if keep {
            info!(file = %output_file, "diff file generated");
            Ok(None)
        } else {
            let _report_guard = TempFileGuard::new(output_file.clone());
            let report =
                fs::read_to_string(&output_file).map_err(|e| Error::io(&output_file, e))?;
            Ok(Some(report))
        }
    }

    /// Drop managed tables and views from the database - or, with
    /// `drop_all`, everything in the schema.
    pub async fn drop(&self, options: DropOptions) -> Result<()> {
        if options.drop_all {
            info!(service = %self.service, "dropping entire schema");
            let config = self.adapter.engine_config_for(EngineCommand::DropAll);
            DiffDriver::new(&self.engine).drop_all(config).await
        } else {
            info!(service = %self.service, "dropping managed entities");
            let model = self.compiler.compile()?;
            self.adapter.drop_entities(&model, false).await
        }
    }

    /// Load data from the configured sources.
    pub async fn load(&self, mode: LoadMode) -> Result<()> {
        let model = self.compiler.compile()?;
        self.loader
            .load_from(&model, &["data", "csv"], mode.is_full())
            .await
    }

    /// Build the view-definition map the reorderer needs: live lookups for
    /// drops (the drop operation carries no SQL text), select text for
    /// creates.
    async fn resolve_view_definitions(
        &self,
        changelog: &Changelog,
    ) -> Result<IndexMap<String, ViewDefinition>> {
        let mut pending: Vec<(String, Option<String>)> = Vec::new();
        for op in changelog.operations() {
            if op.is_drop_view() {
                if let Some(name) = op.entity_name() {
                    pending.push((name.to_string(), None));
                }
            } else if op.is_create_view() {
                if let Some(name) = op.entity_name() {
                    pending.push((name.to_string(), op.select_query().map(String::from)));
                }
            }
        }

        let mut views = IndexMap::new();
        for (name, select_query) in pending {
            match select_query {
                Some(definition) => {
                    views.insert(
                        name.clone(),
                        ViewDefinition {
                            name,
                            definition,
                        },
                    );
                }
                None => {
                    if let Some(definition) = self.adapter.get_view_definition(&name).await? {
                        views.insert(name, definition);
                    }
                }
            }
        }
        Ok(views)
    }
}

/// Remove a stale temp changelog and make sure its directory exists.
fn prepare_tmp_file(path: &Utf8Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| Error::io(path, e))?;
    }
    let dir = tmp_dir_of(path);
    fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    Ok(())
}

fn tmp_dir_of(path: &Utf8Path) -> Utf8PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_owned(),
        _ => Utf8PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_guard_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.json");
        std::fs::write(&path, "{}").unwrap();
        let utf8 = Utf8PathBuf::from_path_buf(path.clone()).unwrap();
        {
            let _guard = TempFileGuard::new(utf8);
        }
        assert!(!path.exists());
    }

    #[test]
    fn temp_file_guard_tolerates_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-created.json");
        let utf8 = Utf8PathBuf::from_path_buf(path).unwrap();
        let _guard = TempFileGuard::new(utf8);
        // Dropping must not panic.
    }

    #[test]
    fn prepare_tmp_file_creates_the_directory_and_clears_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/tmp/changelog.json");
        let utf8 = Utf8PathBuf::from_path_buf(path.clone()).unwrap();
        prepare_tmp_file(&utf8).unwrap();
        assert!(path.parent().unwrap().exists());

        std::fs::write(&path, "stale").unwrap();
        prepare_tmp_file(&utf8).unwrap();
        assert!(!path.exists());
    }
}
