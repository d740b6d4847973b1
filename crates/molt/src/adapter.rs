//! Database adapters.
//!
//! Everything database-specific lives behind the [`Adapter`] trait: building
//! engine connection descriptors, looking up live view definitions, and
//! managing the ephemeral clone/reference schemas. The orchestrator owns the
//! sequencing; adapters own the SQL.
//!
//! Selection happens on the [`Dialect`] tag from configuration, not on type
//! names.

pub mod postgres;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::driver::DiffDriver;
use crate::engine::{DiffEngine, EngineCommand, EngineConfig};
use crate::model::CompiledModel;
use crate::reorder::ViewDefinition;
use crate::Result;

/// Supported database dialects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Dialect {
    #[default]
    Postgres,
}

/// Database-specific capabilities a migration run needs.
pub trait Adapter {
    fn dialect(&self) -> Dialect;

    /// Connection descriptor for an engine invocation of `command`. Diff
    /// commands come pre-filled with the reference side; the caller adjusts
    /// schema names per pass.
    fn engine_config_for(&self, command: EngineCommand) -> EngineConfig;

    /// Look up a live view's definition in the default schema. `None` when
    /// no such view exists.
    fn get_view_definition(
        &self,
        view: &str,
    ) -> impl Future<Output = Result<Option<ViewDefinition>>>;

    /// Rebuild the clone schema as a structural copy of the default schema.
    ///
    /// Drop-and-recreate first, so a clone left behind by a failed run never
    /// leaks stale objects into the next diff.
    fn synchronize_clone<E: DiffEngine>(
        &self,
        driver: &DiffDriver<'_, E>,
        tmp_file: &Utf8Path,
    ) -> impl Future<Output = Result<()>>;

    /// Drop every model view from the clone schema. Views are always
    /// recomputed fresh; this isolates structural changes from view
    /// redefinitions in the following diff.
    fn drop_views_from_clone(&self, model: &CompiledModel) -> impl Future<Output = Result<()>>;

    /// Rebuild the reference schema from the compiled model.
    fn deploy_to_reference(&self, model: &CompiledModel) -> impl Future<Output = Result<()>>;

    /// Create the target database. "Already exists" and concurrent-creation
    /// races are success; anything else is fatal.
    fn create_database(&self) -> impl Future<Output = Result<()>>;

    /// Drop the managed entities from the default schema in one
    /// transaction: views first, then tables unless `views_only`.
    fn drop_entities(
        &self,
        model: &CompiledModel,
        views_only: bool,
    ) -> impl Future<Output = Result<()>>;
}
