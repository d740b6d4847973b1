//! Diff engine interface.
//!
//! The diff engine is an external collaborator: given two connection
//! descriptors it computes schema deltas, renders update SQL, or applies a
//! changelog. [`ProcessEngine`] drives it as a child process; tests drive
//! the orchestrator with in-memory engines instead.

use std::fmt;

use camino::Utf8PathBuf;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// The engine commands this crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Drop everything in the target schema, managed or not.
    DropAll,
    /// Apply a changelog to the target schema. Side-effecting.
    Update,
    /// Render the SQL `update` would execute, without applying it.
    UpdateSql,
    /// Write a human-readable delta report to the output file.
    Diff,
    /// Write a changelog of operations turning target into reference.
    DiffChangelog,
}

impl EngineCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineCommand::DropAll => "dropAll",
            EngineCommand::Update => "update",
            EngineCommand::UpdateSql => "updateSQL",
            EngineCommand::Diff => "diff",
            EngineCommand::DiffChangelog => "diffChangeLog",
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection descriptor for one engine invocation.
///
/// `url`/`username`/`password` describe the target database; the
/// `reference_*` fields describe the comparison side for diff commands (the
/// same database, different schema, in the usual setup).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub default_schema_name: Option<String>,
    pub reference_url: Option<String>,
    pub reference_username: Option<String>,
    pub reference_password: Option<String>,
    pub reference_default_schema_name: Option<String>,
    pub changelog_file: Option<Utf8PathBuf>,
    pub output_file: Option<Utf8PathBuf>,
}

impl EngineConfig {
    /// Render the invocation as `--key=value` flags followed by the command
    /// word.
    pub fn to_args(&self, command: EngineCommand) -> Vec<String> {
        let mut args = vec![
            format!("--url={}", self.url),
            format!("--username={}", self.username),
            format!("--password={}", self.password),
        ];
        if let Some(schema) = &self.default_schema_name {
            args.push(format!("--defaultSchemaName={schema}"));
        }
        if let Some(url) = &self.reference_url {
            args.push(format!("--referenceUrl={url}"));
        }
        if let Some(username) = &self.reference_username {
            args.push(format!("--referenceUsername={username}"));
        }
        if let Some(password) = &self.reference_password {
            args.push(format!("--referencePassword={password}"));
        }
        if let Some(schema) = &self.reference_default_schema_name {
            args.push(format!("--referenceDefaultSchemaName={schema}"));
        }
        if let Some(file) = &self.changelog_file {
            args.push(format!("--changeLogFile={file}"));
        }
        if let Some(file) = &self.output_file {
            args.push(format!("--outputFile={file}"));
        }
        args.push(command.as_str().to_string());
        args
    }
}

/// An engine capable of running diff/update commands.
///
/// Returns the engine's stdout. Failures carry the engine's raw diagnostic;
/// the orchestrator treats them as fatal for the current run - migrations
/// are not safely auto-retryable.
pub trait DiffEngine {
    fn run(
        &self,
        config: &EngineConfig,
        command: EngineCommand,
    ) -> impl Future<Output = Result<String>>;
}

/// Runs the diff engine as a child process.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    binary: Utf8PathBuf,
}

impl ProcessEngine {
    pub fn new(binary: impl Into<Utf8PathBuf>) -> Self {
        ProcessEngine {
            binary: binary.into(),
        }
    }
}

impl DiffEngine for ProcessEngine {
    async fn run(&self, config: &EngineConfig, command: EngineCommand) -> Result<String> {
        debug!(binary = %self.binary, %command, url = %config.url, "invoking diff engine");
        let args = config.to_args(command);
        let output = Command::new(self.binary.as_str())
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::Engine {
                command: command.as_str(),
                diagnostic: format!("failed to spawn {}: {e}", self.binary),
            })?;
        if !output.status.success() {
            return Err(Error::Engine {
                command: command.as_str(),
                diagnostic: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_for_a_diff_changelog_invocation() {
        let config = EngineConfig {
            url: "jdbc:postgresql://localhost:5432/app".to_string(),
            username: "app".to_string(),
            password: "secret".to_string(),
            default_schema_name: Some("public".to_string()),
            reference_url: Some("jdbc:postgresql://localhost:5432/app".to_string()),
            reference_username: Some("app".to_string()),
            reference_password: Some("secret".to_string()),
            reference_default_schema_name: Some("_molt_reference".to_string()),
            changelog_file: Some(Utf8PathBuf::from("tmp/molt-changelog.json")),
            output_file: None,
        };
        insta::assert_snapshot!(
            config.to_args(EngineCommand::DiffChangelog).join(" "),
            @"--url=jdbc:postgresql://localhost:5432/app --username=app --password=secret --defaultSchemaName=public --referenceUrl=jdbc:postgresql://localhost:5432/app --referenceUsername=app --referencePassword=secret --referenceDefaultSchemaName=_molt_reference --changeLogFile=tmp/molt-changelog.json diffChangeLog"
        );
    }

    #[test]
    fn optional_flags_are_omitted() {
        let config = EngineConfig {
            url: "jdbc:postgresql://db:5432/app".to_string(),
            username: "app".to_string(),
            password: String::new(),
            ..Default::default()
        };
        let args = config.to_args(EngineCommand::DropAll);
        assert_eq!(
            args,
            vec![
                "--url=jdbc:postgresql://db:5432/app".to_string(),
                "--username=app".to_string(),
                "--password=".to_string(),
                "dropAll".to_string(),
            ]
        );
    }

    #[test]
    fn command_words_match_the_engine_cli() {
        assert_eq!(EngineCommand::DropAll.as_str(), "dropAll");
        assert_eq!(EngineCommand::Update.as_str(), "update");
        assert_eq!(EngineCommand::UpdateSql.as_str(), "updateSQL");
        assert_eq!(EngineCommand::Diff.as_str(), "diff");
        assert_eq!(EngineCommand::DiffChangelog.as_str(), "diffChangeLog");
    }
}
