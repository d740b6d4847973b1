//! Configuration records.
//!
//! Loaded from a JSON file (`molt.json` by default). Every field has a
//! default, so a missing file yields a usable local-development
//! configuration.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::adapter::Dialect;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub service: ServiceConfig,
    pub migrations: MigrationsConfig,
    pub engine: EngineSettings,
}

impl Config {
    /// Load configuration from a JSON file. A missing file yields the
    /// defaults.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| Error::Deserialization {
            path: path.to_owned(),
            source: e,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Service key, used for logging and to scope a run.
    pub name: String,
    /// Directory holding the declarative model.
    pub model: Utf8PathBuf,
    pub dialect: Dialect,
    pub credentials: Credentials,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            name: "db".to_string(),
            model: Utf8PathBuf::from("model"),
            dialect: Dialect::Postgres,
            credentials: Credentials::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Root certificate for TLS connections; forwarded to the diff engine's
    /// connection URL.
    pub sslrootcert: Option<String>,
}

impl Default for Credentials {
    fn default() -> Self {
        Credentials {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            sslrootcert: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MigrationsConfig {
    pub schema: SchemaNames,
    pub deploy: DeploySettings,
}

/// The three schemas a migration run touches: the live one plus the two
/// ephemeral working schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaNames {
    pub default: String,
    pub clone: String,
    pub reference: String,
}

impl Default for SchemaNames {
    fn default() -> Self {
        SchemaNames {
            default: "public".to_string(),
            clone: "_molt_clone".to_string(),
            reference: "_molt_reference".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeploySettings {
    /// Where the merged changelog is persisted for the duration of a run.
    pub tmp_file: Utf8PathBuf,
    /// Optional list of entities slated for forced removal.
    pub undeploy_file: Utf8PathBuf,
}

impl Default for DeploySettings {
    fn default() -> Self {
        DeploySettings {
            tmp_file: Utf8PathBuf::from("tmp/molt-changelog.json"),
            undeploy_file: Utf8PathBuf::from("undeploy.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    /// The diff engine binary to spawn.
    pub binary: Utf8PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            binary: Utf8PathBuf::from("liquibase"),
        }
    }
}
