//! Delta-based schema deployment for model-driven Postgres databases.
//!
//! molt computes the difference between a declarative data model and a live
//! database and applies it without downtime. It never diffs against the live
//! schema directly: each run stands up an ephemeral **clone** schema
//! (mirroring what is live right now) and a **reference** schema (rebuilt
//! from the model), lets an external diff engine compare them, then merges,
//! filters, and reorders the resulting change operations before applying
//! them - or rendering the SQL for review.
//!
//! # Workflows
//!
//! - [`Migrator::deploy`] - compute the delta and apply or preview it
//! - [`Migrator::diff`] - generate a human-readable delta report
//! - [`Migrator::drop`] - drop managed entities (or everything)
//! - [`Migrator::load`] - hand off to the data-loading collaborator
//!
//! # Example
//!
//! ```ignore
//! use camino::Utf8Path;
//! use molt::{Config, Migrator, DeployOptions, PostgresAdapter, ProcessEngine, SqlModelCompiler};
//!
//! let config = Config::load(Utf8Path::new("molt.json"))?;
//! let adapter = PostgresAdapter::new(
//!     config.service.credentials.clone(),
//!     config.migrations.schema.clone(),
//! );
//! let migrator = Migrator::new(
//!     config.service.name.clone(),
//!     config.migrations.clone(),
//!     adapter,
//!     ProcessEngine::new(config.engine.binary.clone()),
//!     SqlModelCompiler::new(config.service.model.clone()),
//! );
//! migrator.deploy(DeployOptions::default()).await?;
//! ```
//!
//! Ordering is the interesting part: views may reference other views, so
//! creates run in dependency order and drops in reverse dependency order -
//! see the [`reorder`] module.

pub mod adapter;
pub mod changelog;
pub mod config;
pub mod driver;
pub mod engine;
mod error;
pub mod migrator;
pub mod model;
pub mod reorder;

pub use adapter::postgres::PostgresAdapter;
pub use adapter::{Adapter, Dialect};
pub use changelog::{ChangeOperation, ChangeSet, Changelog, UndeployEntity};
pub use config::Config;
pub use driver::DiffDriver;
pub use engine::{DiffEngine, EngineCommand, EngineConfig, ProcessEngine};
pub use error::Error;
pub use migrator::{
    BeforeDeploy, DataLoader, DeployOptions, DeployOutcome, DiffOptions, DropOptions, LoadMode,
    Migrator,
};
pub use model::{CompiledModel, EntityKind, ModelCompiler, ModelEntity, SqlModelCompiler};
pub use reorder::{reorder_changelog, ViewDefinition};

/// Result type for molt operations.
pub type Result<T> = std::result::Result<T, Error>;
