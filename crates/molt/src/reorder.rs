//! View-dependency reordering.
//!
//! Views may reference other views in their SELECT text. Applying a
//! changelog in diff order can create a view before its dependency exists,
//! or drop a view while a dependent still references it. This module
//! computes a safe execution order:
//!
//! 1. drop-view operations, dependents before their dependencies,
//! 2. every non-view operation, in original relative order,
//! 3. create-view operations, dependencies before their dependents.
//!
//! Dependencies are detected by scanning each view's definition text for the
//! other views' names on identifier boundaries, so `v_order` never matches
//! inside `v_order_items`. Where no edge exists between two views their
//! original relative order is preserved, which keeps the output
//! deterministic.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::changelog::{Changelog, ChangelogEntry};
use crate::{Error, Result};

/// A view name paired with its SELECT text.
///
/// For a view being created the definition comes straight from the
/// operation's `selectQuery`; for a view being dropped it has to be looked
/// up in the live database before the drop, since the drop operation itself
/// carries no SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub name: String,
    pub definition: String,
}

/// Does `definition` reference `name` (qualified or unqualified) on an
/// identifier boundary?
pub(crate) fn sql_references(definition: &str, name: &str) -> bool {
    if name.is_empty() || definition.is_empty() {
        return false;
    }
    let unqualified = name.rsplit('.').next().unwrap_or(name);
    let pattern = if unqualified == name {
        format!(r"(?i)\b{}\b", regex::escape(name))
    } else {
        format!(
            r"(?i)\b(?:{}|{})\b",
            regex::escape(name),
            regex::escape(unqualified)
        )
    };
    Regex::new(&pattern)
        .map(|re| re.is_match(definition))
        .unwrap_or(false)
}

/// Which way round the dependency edges constrain the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Dependencies first: if A depends on B, B is emitted before A.
    Create,
    /// Dependents first: if A depends on B, A is emitted before B.
    Drop,
}

/// Stable topological order over `names`, using `definitions[i]` as the SQL
/// text of `names[i]`.
///
/// Repeatedly emits the first not-yet-emitted item whose prerequisites are
/// all emitted, so items with no edge between them keep their original
/// relative order. Stalling means a cycle: fail, naming the views left.
fn stable_view_order(
    names: &[String],
    definitions: &[&str],
    direction: Direction,
) -> Result<Vec<usize>> {
    let n = names.len();
    // depends[i][j]: names[i]'s definition references names[j]
    let mut depends = vec![vec![false; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j {
                depends[i][j] = sql_references(definitions[i], &names[j]);
            }
        }
    }
    let prereq = |i: usize, j: usize| match direction {
        Direction::Create => depends[i][j],
        Direction::Drop => depends[j][i],
    };

    let mut emitted = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let next = (0..n).find(|&i| {
            !emitted[i] && (0..n).all(|j| emitted[j] || !prereq(i, j))
        });
        match next {
            Some(i) => {
                emitted[i] = true;
                order.push(i);
            }
            None => {
                let views = (0..n)
                    .filter(|&i| !emitted[i])
                    .map(|i| names[i].clone())
                    .collect();
                return Err(Error::CyclicViewDependency { views });
            }
        }
    }
    Ok(order)
}

/// Reorder a changelog so that view creates and drops respect dependency
/// order.
///
/// `views` maps every view name appearing in a drop-view or create-view
/// operation to its definition; a view with no known definition simply has
/// no outgoing edges.
pub fn reorder_changelog(
    changelog: &mut Changelog,
    views: &IndexMap<String, ViewDefinition>,
) -> Result<()> {
    let entries = std::mem::take(&mut changelog.entries);

    let mut drops: Vec<(String, ChangelogEntry)> = Vec::new();
    let mut creates: Vec<(String, ChangelogEntry)> = Vec::new();
    let mut others: Vec<ChangelogEntry> = Vec::new();
    for entry in entries {
        match entry.change_set.changes.first() {
            Some(op) if op.is_drop_view() => {
                let name = op.entity_name().unwrap_or_default().to_string();
                drops.push((name, entry));
            }
            Some(op) if op.is_create_view() => {
                let name = op.entity_name().unwrap_or_default().to_string();
                creates.push((name, entry));
            }
            _ => others.push(entry),
        }
    }

    let definition_of = |name: &String| {
        views
            .get(name)
            .map(|def| def.definition.as_str())
            .unwrap_or("")
    };

    let drop_names: Vec<String> = drops.iter().map(|(name, _)| name.clone()).collect();
    let drop_defs: Vec<&str> = drop_names.iter().map(definition_of).collect();
    let drop_order = stable_view_order(&drop_names, &drop_defs, Direction::Drop)?;

    let create_names: Vec<String> = creates.iter().map(|(name, _)| name.clone()).collect();
    let create_defs: Vec<&str> = create_names.iter().map(definition_of).collect();
    let create_order = stable_view_order(&create_names, &create_defs, Direction::Create)?;

    let mut drops: Vec<Option<ChangelogEntry>> =
        drops.into_iter().map(|(_, entry)| Some(entry)).collect();
    let mut creates: Vec<Option<ChangelogEntry>> =
        creates.into_iter().map(|(_, entry)| Some(entry)).collect();

    let mut ordered = Vec::with_capacity(drops.len() + others.len() + creates.len());
    for i in drop_order {
        ordered.extend(drops[i].take());
    }
    ordered.extend(others);
    for i in create_order {
        ordered.extend(creates[i].take());
    }
    changelog.entries = ordered;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::{ChangeOperation, ChangeSet, CreateTable, CreateView, DropView};

    fn entry(op: ChangeOperation) -> ChangelogEntry {
        ChangelogEntry {
            change_set: ChangeSet::single("test", op),
        }
    }

    fn create_view(name: &str, select: &str) -> ChangelogEntry {
        entry(ChangeOperation::CreateView(CreateView {
            view_name: name.to_string(),
            select_query: Some(select.to_string()),
            ..Default::default()
        }))
    }

    fn drop_view(name: &str) -> ChangelogEntry {
        entry(ChangeOperation::DropView(DropView {
            view_name: name.to_string(),
            ..Default::default()
        }))
    }

    fn create_table(name: &str) -> ChangelogEntry {
        entry(ChangeOperation::CreateTable(CreateTable {
            table_name: name.to_string(),
            ..Default::default()
        }))
    }

    fn view_map(defs: &[(&str, &str)]) -> IndexMap<String, ViewDefinition> {
        defs.iter()
            .map(|(name, definition)| {
                (
                    name.to_string(),
                    ViewDefinition {
                        name: name.to_string(),
                        definition: definition.to_string(),
                    },
                )
            })
            .collect()
    }

    fn names(log: &Changelog) -> Vec<&str> {
        log.operations()
            .map(|op| op.entity_name().unwrap_or("?"))
            .collect()
    }

    #[test]
    fn identifier_boundaries_avoid_substring_edges() {
        assert!(sql_references("SELECT * FROM v_order", "v_order"));
        assert!(!sql_references("SELECT * FROM v_order_items", "v_order"));
        assert!(sql_references("select a from PUBLIC.V_ORDER where 1=1", "v_order"));
        assert!(sql_references(
            "SELECT * FROM other.v_base",
            "other.v_base"
        ));
        // A qualified view name also matches on its unqualified form.
        assert!(sql_references("SELECT * FROM v_base", "public.v_base"));
    }

    #[test]
    fn creates_follow_their_dependencies() {
        // v1 references v2; diff emitted v1 first.
        let mut log = Changelog {
            entries: vec![
                create_view("v1", "SELECT * FROM v2"),
                create_view("v2", "SELECT * FROM t1"),
            ],
        };
        let views = view_map(&[("v1", "SELECT * FROM v2"), ("v2", "SELECT * FROM t1")]);
        reorder_changelog(&mut log, &views).unwrap();
        assert_eq!(names(&log), vec!["v2", "v1"]);
    }

    #[test]
    fn drops_lead_dependents_first() {
        // v1's live definition references v2: v1 must drop before v2.
        let mut log = Changelog {
            entries: vec![drop_view("v2"), drop_view("v1")],
        };
        let views = view_map(&[("v1", "SELECT * FROM v2"), ("v2", "SELECT * FROM t1")]);
        reorder_changelog(&mut log, &views).unwrap();
        assert_eq!(names(&log), vec!["v1", "v2"]);
    }

    #[test]
    fn drops_then_others_then_creates() {
        let mut log = Changelog {
            entries: vec![
                create_table("t1"),
                create_view("v_new", "SELECT * FROM t1"),
                drop_view("v_old"),
            ],
        };
        let views = view_map(&[
            ("v_new", "SELECT * FROM t1"),
            ("v_old", "SELECT * FROM t0"),
        ]);
        reorder_changelog(&mut log, &views).unwrap();
        assert_eq!(names(&log), vec!["v_old", "t1", "v_new"]);
    }

    #[test]
    fn unrelated_views_keep_source_order() {
        let mut log = Changelog {
            entries: vec![
                create_view("v_b", "SELECT * FROM t1"),
                create_view("v_a", "SELECT * FROM t2"),
                create_view("v_c", "SELECT * FROM t3"),
            ],
        };
        let views = view_map(&[
            ("v_b", "SELECT * FROM t1"),
            ("v_a", "SELECT * FROM t2"),
            ("v_c", "SELECT * FROM t3"),
        ]);
        reorder_changelog(&mut log, &views).unwrap();
        assert_eq!(names(&log), vec!["v_b", "v_a", "v_c"]);
    }

    #[test]
    fn chain_of_three_creates() {
        let mut log = Changelog {
            entries: vec![
                create_view("v3", "SELECT * FROM v2"),
                create_view("v1", "SELECT * FROM t"),
                create_view("v2", "SELECT * FROM v1"),
            ],
        };
        let views = view_map(&[
            ("v3", "SELECT * FROM v2"),
            ("v1", "SELECT * FROM t"),
            ("v2", "SELECT * FROM v1"),
        ]);
        reorder_changelog(&mut log, &views).unwrap();
        assert_eq!(names(&log), vec!["v1", "v2", "v3"]);
    }

    #[test]
    fn cycle_is_an_error_naming_the_views() {
        let mut log = Changelog {
            entries: vec![
                create_view("v1", "SELECT * FROM v2"),
                create_view("v2", "SELECT * FROM v1"),
            ],
        };
        let views = view_map(&[("v1", "SELECT * FROM v2"), ("v2", "SELECT * FROM v1")]);
        let err = reorder_changelog(&mut log, &views).unwrap_err();
        match err {
            Error::CyclicViewDependency { views } => {
                assert_eq!(views, vec!["v1".to_string(), "v2".to_string()]);
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn unknown_definition_means_no_edges() {
        let mut log = Changelog {
            entries: vec![drop_view("v_mystery"), drop_view("v_known")],
        };
        let views = view_map(&[("v_known", "SELECT * FROM t1")]);
        reorder_changelog(&mut log, &views).unwrap();
        assert_eq!(names(&log), vec!["v_mystery", "v_known"]);
    }
}
