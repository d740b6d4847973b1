//! Changelog model and store.
//!
//! A changelog is the ordered list of schema change operations the diff
//! engine produced (or is about to execute). The persisted form mirrors the
//! engine's own JSON changelog:
//!
//! ```json
//! {
//!   "databaseChangeLog": [
//!     { "changeSet": { "id": "...", "author": "...", "changes": [
//!       { "createView": { "viewName": "v_new", "selectQuery": "SELECT ..." } }
//!     ] } }
//!   ]
//! }
//! ```
//!
//! Insertion order is execution order. Merging, filtering, and reordering all
//! preserve it unless they exist specifically to change it.
//!
//! Operations this crate does not model (column alters, index changes, the
//! engine's own bookkeeping) are kept as opaque [`ChangeOperation::Other`]
//! values and round-trip through the store unchanged.

use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::EntityKind;
use crate::{Error, Result};

/// A single schema change operation, tagged by the one key its persisted
/// object carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeOperation {
    #[serde(rename = "createTable")]
    CreateTable(CreateTable),
    #[serde(rename = "dropTable")]
    DropTable(DropTable),
    #[serde(rename = "createView")]
    CreateView(CreateView),
    #[serde(rename = "dropView")]
    DropView(DropView),
    /// Anything else the engine emitted. Round-trips unchanged.
    #[serde(untagged)]
    Other(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateTable {
    #[serde(rename = "tableName")]
    pub table_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropTable {
    #[serde(rename = "tableName")]
    pub table_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateView {
    #[serde(rename = "viewName")]
    pub view_name: String,
    #[serde(
        rename = "selectQuery",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub select_query: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropView {
    #[serde(rename = "viewName")]
    pub view_name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChangeOperation {
    pub fn is_create_table(&self) -> bool {
        matches!(self, ChangeOperation::CreateTable(_))
    }

    pub fn is_drop_table(&self) -> bool {
        matches!(self, ChangeOperation::DropTable(_))
    }

    pub fn is_create_view(&self) -> bool {
        matches!(self, ChangeOperation::CreateView(_))
    }

    pub fn is_drop_view(&self) -> bool {
        matches!(self, ChangeOperation::DropView(_))
    }

    /// The schema-qualified name of the entity this operation touches, if it
    /// is one of the modeled variants.
    pub fn entity_name(&self) -> Option<&str> {
        match self {
            ChangeOperation::CreateTable(c) => Some(&c.table_name),
            ChangeOperation::DropTable(c) => Some(&c.table_name),
            ChangeOperation::CreateView(c) => Some(&c.view_name),
            ChangeOperation::DropView(c) => Some(&c.view_name),
            ChangeOperation::Other(_) => None,
        }
    }

    /// The SELECT text of a create-view operation.
    pub fn select_query(&self) -> Option<&str> {
        match self {
            ChangeOperation::CreateView(c) => c.select_query.as_deref(),
            _ => None,
        }
    }
}

/// One changeset. The engine only ever acts on `changes[0]`; a changelog is
/// effectively one operation per entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub changes: Vec<ChangeOperation>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChangeSet {
    /// A changeset wrapping a single operation.
    pub fn single(id: impl Into<String>, op: ChangeOperation) -> Self {
        ChangeSet {
            id: Some(id.into()),
            author: Some("molt".to_string()),
            changes: vec![op],
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    #[serde(rename = "changeSet")]
    pub change_set: ChangeSet,
}

/// An entity slated for forced removal, classified by its live kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndeployEntity {
    pub name: String,
    pub kind: EntityKind,
}

/// An ordered sequence of changesets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changelog {
    #[serde(rename = "databaseChangeLog")]
    pub entries: Vec<ChangelogEntry>,
}

impl Changelog {
    /// Load a changelog from a JSON file.
    pub fn from_file(path: &Utf8Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| Error::Deserialization {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Write the changelog to a JSON file, overwriting any previous content.
    ///
    /// The parent directory must already exist; scoped directory creation is
    /// the orchestrator's job.
    pub fn to_file(&self, path: &Utf8Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(|e| Error::Deserialization {
            path: path.to_owned(),
            source: e,
        })?;
        fs::write(path, text).map_err(|e| Error::io(path, e))
    }

    /// Concatenate two changelogs: `self`'s entries followed by `other`'s,
    /// each side's internal order preserved.
    pub fn concat(mut self, other: Changelog) -> Changelog {
        self.entries.extend(other.entries);
        self
    }

    /// Remove every drop-table operation.
    ///
    /// Applied when automatic table undeploy is disabled: tables are never
    /// silently dropped unless explicitly opted in.
    pub fn remove_drop_table_statements(&mut self) {
        self.entries
            .retain(|entry| !matches!(entry.change_set.changes.first(), Some(op) if op.is_drop_table()));
    }

    /// Append one synthetic drop operation per undeploy entry.
    pub fn append_undeploy_drops(&mut self, entities: &[UndeployEntity]) {
        for entity in entities {
            let op = match entity.kind {
                EntityKind::View => ChangeOperation::DropView(DropView {
                    view_name: entity.name.clone(),
                    extra: serde_json::Map::new(),
                }),
                EntityKind::Table => ChangeOperation::DropTable(DropTable {
                    table_name: entity.name.clone(),
                    extra: serde_json::Map::new(),
                }),
            };
            self.entries.push(ChangelogEntry {
                change_set: ChangeSet::single(format!("undeploy-{}", entity.name), op),
            });
        }
    }

    /// The first operation of each changeset, in execution order.
    pub fn operations(&self) -> impl Iterator<Item = &ChangeOperation> {
        self.entries
            .iter()
            .filter_map(|entry| entry.change_set.changes.first())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read the undeploy spec file: a JSON string array or a line-delimited list
/// of entity names.
///
/// A missing file is a no-op (`None`) - undeploy is a configured optional
/// feature, not an error.
pub fn read_undeploy_list(path: &Utf8Path) -> Result<Option<Vec<String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let names = if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<String>>(&text).map_err(|e| Error::Deserialization {
            path: path.to_owned(),
            source: e,
        })?
    } else {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from)
            .collect()
    };
    Ok(Some(names))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_table(name: &str) -> ChangeOperation {
        ChangeOperation::CreateTable(CreateTable {
            table_name: name.to_string(),
            ..Default::default()
        })
    }

    fn drop_table(name: &str) -> ChangeOperation {
        ChangeOperation::DropTable(DropTable {
            table_name: name.to_string(),
            ..Default::default()
        })
    }

    fn log_of(ops: Vec<ChangeOperation>) -> Changelog {
        Changelog {
            entries: ops
                .into_iter()
                .enumerate()
                .map(|(i, op)| ChangelogEntry {
                    change_set: ChangeSet::single(format!("cs-{i}"), op),
                })
                .collect(),
        }
    }

    fn names(log: &Changelog) -> Vec<&str> {
        log.operations()
            .map(|op| op.entity_name().unwrap_or("?"))
            .collect()
    }

    #[test]
    fn parses_engine_changelog_shape() {
        let json = r#"{
            "databaseChangeLog": [
                { "changeSet": { "id": "1", "author": "diff", "changes": [
                    { "dropView": { "viewName": "v_old" } }
                ] } },
                { "changeSet": { "id": "2", "author": "diff", "changes": [
                    { "createView": { "viewName": "v_new", "selectQuery": "SELECT 1" } }
                ] } }
            ]
        }"#;
        let log: Changelog = serde_json::from_str(json).unwrap();
        assert_eq!(log.len(), 2);
        let ops: Vec<_> = log.operations().collect();
        assert!(ops[0].is_drop_view());
        assert_eq!(ops[0].entity_name(), Some("v_old"));
        assert!(ops[1].is_create_view());
        assert_eq!(ops[1].select_query(), Some("SELECT 1"));
    }

    #[test]
    fn missing_collection_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"somethingElse": []}"#).unwrap();
        let path = Utf8Path::from_path(&path).unwrap();
        let err = Changelog::from_file(path).unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }), "{err}");
    }

    #[test]
    fn unknown_operations_round_trip_unchanged() {
        let json = r#"{
            "databaseChangeLog": [
                { "changeSet": { "id": "1", "changes": [
                    { "addColumn": { "tableName": "t", "columns": [ { "column": { "name": "c", "type": "text" } } ] } }
                ] } }
            ]
        }"#;
        let log: Changelog = serde_json::from_str(json).unwrap();
        assert!(matches!(
            log.operations().next().unwrap(),
            ChangeOperation::Other(_)
        ));
        let reserialized = serde_json::to_value(&log).unwrap();
        let original: Value = serde_json::from_str(json).unwrap();
        assert_eq!(reserialized, original);
    }

    #[test]
    fn typed_operations_keep_extra_fields() {
        let json = r#"{
            "databaseChangeLog": [
                { "changeSet": { "id": "1", "changes": [
                    { "createTable": { "tableName": "t1", "schemaName": "public", "columns": [] } }
                ] } }
            ]
        }"#;
        let log: Changelog = serde_json::from_str(json).unwrap();
        let reserialized = serde_json::to_value(&log).unwrap();
        let original: Value = serde_json::from_str(json).unwrap();
        assert_eq!(reserialized, original);
    }

    #[test]
    fn concat_preserves_both_sides_order() {
        let a = log_of(vec![create_table("a1"), create_table("a2")]);
        let b = log_of(vec![create_table("b1"), create_table("b2")]);
        let merged = a.concat(b);
        assert_eq!(names(&merged), vec!["a1", "a2", "b1", "b2"]);
    }

    #[test]
    fn remove_drop_table_statements_keeps_everything_else() {
        let mut log = log_of(vec![
            create_table("t1"),
            drop_table("t_legacy"),
            create_table("t2"),
            drop_table("t_gone"),
        ]);
        log.remove_drop_table_statements();
        assert_eq!(names(&log), vec!["t1", "t2"]);
        assert!(log.operations().all(|op| !op.is_drop_table()));
    }

    #[test]
    fn append_undeploy_drops_by_kind() {
        let mut log = log_of(vec![create_table("t1")]);
        log.append_undeploy_drops(&[
            UndeployEntity {
                name: "entity_x".to_string(),
                kind: EntityKind::Table,
            },
            UndeployEntity {
                name: "v_stale".to_string(),
                kind: EntityKind::View,
            },
        ]);
        let ops: Vec<_> = log.operations().collect();
        assert_eq!(ops.len(), 3);
        assert!(ops[1].is_drop_table());
        assert_eq!(ops[1].entity_name(), Some("entity_x"));
        assert!(ops[2].is_drop_view());
        assert_eq!(ops[2].entity_name(), Some("v_stale"));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changelog.json");
        let path = Utf8Path::from_path(&path).unwrap();
        let log = log_of(vec![create_table("t1"), drop_table("t2")]);
        log.to_file(path).unwrap();
        let loaded = Changelog::from_file(path).unwrap();
        assert_eq!(loaded, log);
    }

    #[test]
    fn undeploy_list_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("undeploy.json");
        let path = Utf8Path::from_path(&path).unwrap();
        assert_eq!(read_undeploy_list(path).unwrap(), None);
    }

    #[test]
    fn undeploy_list_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("undeploy.json");
        std::fs::write(&path, r#"["a", "b"]"#).unwrap();
        let path = Utf8Path::from_path(&path).unwrap();
        assert_eq!(
            read_undeploy_list(path).unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn undeploy_list_line_delimited() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("undeploy.txt");
        std::fs::write(&path, "a\n\n# comment\n  b  \n").unwrap();
        let path = Utf8Path::from_path(&path).unwrap();
        assert_eq!(
            read_undeploy_list(path).unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }
}
