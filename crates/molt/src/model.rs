//! Model compilation.
//!
//! The declarative data model is an external collaborator: something that
//! produces an ordered list of `CREATE` statements. [`SqlModelCompiler`]
//! is the shipped implementation - it reads `.sql` files from a model
//! directory - but anything implementing [`ModelCompiler`] will do.
//!
//! The compiler gives us no structured metadata, so telling tables from
//! views is an explicit text scan over the generated DDL
//! ([`classify_create_statement`]); nothing may infer entity kinds from
//! connection metadata instead.

use std::fs;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::reorder::sql_references;
use crate::{Error, Result};

/// What a `CREATE` statement creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Table,
    View,
}

/// A managed entity, as classified from its generated `CREATE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntity {
    pub name: String,
    pub kind: EntityKind,
}

/// The compiled model: ordered `CREATE` statements, tables first, views in
/// dependency order.
#[derive(Debug, Clone, Default)]
pub struct CompiledModel {
    pub statements: Vec<String>,
}

impl CompiledModel {
    /// Every classifiable entity, in statement order.
    pub fn entities(&self) -> Vec<ModelEntity> {
        self.statements
            .iter()
            .filter_map(|sql| classify_create_statement(sql))
            .collect()
    }

    pub fn tables(&self) -> Vec<ModelEntity> {
        self.entities()
            .into_iter()
            .filter(|e| e.kind == EntityKind::Table)
            .collect()
    }

    pub fn views(&self) -> Vec<ModelEntity> {
        self.entities()
            .into_iter()
            .filter(|e| e.kind == EntityKind::View)
            .collect()
    }
}

fn create_statement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?im)^\s*CREATE\s+(?:(TABLE)|VIEW)\s+"?([^\s("]+)"?"#).unwrap()
    })
}

/// Classify a generated DDL statement as a table or view create.
///
/// Returns `None` for anything that is not a `CREATE TABLE`/`CREATE VIEW`
/// statement (indices, comments, engine bookkeeping).
pub fn classify_create_statement(sql: &str) -> Option<ModelEntity> {
    let captures = create_statement_regex().captures(sql)?;
    let kind = if captures.get(1).is_some() {
        EntityKind::Table
    } else {
        EntityKind::View
    };
    let name = captures.get(2)?.as_str().to_string();
    Some(ModelEntity { name, kind })
}

/// Order compiled statements so that every view follows the tables and views
/// it references: tables keep their original relative order, views cascade.
pub fn sort_by_cascading_views(statements: Vec<String>) -> Result<Vec<String>> {
    let mut tables = Vec::new();
    let mut other = Vec::new();
    let mut views: Vec<(String, String)> = Vec::new();
    for sql in statements {
        match classify_create_statement(&sql) {
            Some(entity) if entity.kind == EntityKind::View => views.push((entity.name, sql)),
            Some(_) => tables.push(sql),
            None => other.push(sql),
        }
    }

    // Stable pass: emit the first view whose referenced views are all
    // already emitted. Stalling means the model itself has a cycle.
    let n = views.len();
    let mut emitted = vec![false; n];
    let mut ordered_views = Vec::with_capacity(n);
    while ordered_views.len() < n {
        let next = (0..n).find(|&i| {
            !emitted[i]
                && (0..n).all(|j| {
                    emitted[j] || i == j || !sql_references(&views[i].1, &views[j].0)
                })
        });
        match next {
            Some(i) => {
                emitted[i] = true;
                ordered_views.push(views[i].1.clone());
            }
            None => {
                return Err(Error::CyclicViewDependency {
                    views: (0..n)
                        .filter(|&i| !emitted[i])
                        .map(|i| views[i].0.clone())
                        .collect(),
                });
            }
        }
    }

    let mut ordered = tables;
    ordered.extend(other);
    ordered.extend(ordered_views);
    Ok(ordered)
}

/// Compiles the declarative model into ordered `CREATE` statements.
pub trait ModelCompiler {
    fn compile(&self) -> Result<CompiledModel>;
}

/// Reads the model from a directory of `.sql` files, in lexical file order.
#[derive(Debug, Clone)]
pub struct SqlModelCompiler {
    model_dir: Utf8PathBuf,
}

impl SqlModelCompiler {
    pub fn new(model_dir: impl Into<Utf8PathBuf>) -> Self {
        SqlModelCompiler {
            model_dir: model_dir.into(),
        }
    }

    fn model_error(&self, reason: impl Into<String>) -> Error {
        Error::ModelLoad {
            path: self.model_dir.clone(),
            reason: reason.into(),
        }
    }
}

impl ModelCompiler for SqlModelCompiler {
    fn compile(&self) -> Result<CompiledModel> {
        let entries =
            fs::read_dir(&self.model_dir).map_err(|e| self.model_error(e.to_string()))?;
        let mut files: Vec<Utf8PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| self.model_error(e.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|p| self.model_error(format!("non-UTF-8 path {}", p.display())))?;
            if path.extension() == Some("sql") {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(self.model_error("no .sql files found"));
        }

        let mut statements = Vec::new();
        for file in &files {
            let text =
                fs::read_to_string(file).map_err(|e| self.model_error(format!("{file}: {e}")))?;
            statements.extend(split_statements(&text));
        }
        let statements = sort_by_cascading_views(statements)?;
        Ok(CompiledModel { statements })
    }
}

/// Split a DDL file into statements on terminating semicolons, dropping
/// whitespace- and comment-only fragments.
fn split_statements(text: &str) -> Vec<String> {
    text.split(';')
        .map(str::trim)
        .filter(|fragment| {
            fragment
                .lines()
                .map(str::trim)
                .any(|line| !line.is_empty() && !line.starts_with("--"))
        })
        .map(String::from)
        .collect()
}
