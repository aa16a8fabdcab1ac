//! Rebuilds the route hierarchy from the flat route table.
//!
//! Route tables come from the running application and are not guaranteed to
//! be well formed: a `parentId` may point at a missing entry, at the entry
//! itself, or into a cycle. Missing and self parents make the entry a root.
//! A cycle with no way back to a root is broken at its smallest id, which is
//! then treated as a root as well, so every entry appears exactly once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTableEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub index: bool,
    #[serde(default)]
    pub has_error_boundary: bool,
}

/// Route table keyed by route id.
pub type RouteTable = BTreeMap<String, RouteTableEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBoundaryOwner {
    pub has_error_boundary: bool,
    pub error_boundary_id: Option<String>,
}

impl ErrorBoundaryOwner {
    pub fn none() -> Self {
        Self {
            has_error_boundary: false,
            error_boundary_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTreeNode {
    /// Full URL resolved from the ancestor path segments.
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub index: bool,
    pub has_error_boundary: bool,
    pub error_boundary: ErrorBoundaryOwner,
    pub children: Vec<RouteTreeNode>,
}

/// Builds the subtree under `parent_id`; `None` yields the top-level routes.
pub fn build_tree(table: &RouteTable, parent_id: Option<&str>) -> Vec<RouteTreeNode> {
    let parents = effective_parents(table);
    let mut visited = BTreeSet::new();
    build_level(table, &parents, parent_id, &mut visited)
}

/// Resolves the URL of `route_id` by concatenating ancestor path segments.
pub fn resolve_url(table: &RouteTable, route_id: &str) -> String {
    url_of(table, &effective_parents(table), route_id)
}

/// Nearest entry, starting with `route_id` itself, that declares an error
/// boundary.
pub fn find_error_boundary(table: &RouteTable, route_id: &str) -> ErrorBoundaryOwner {
    boundary_of(table, &effective_parents(table), route_id)
}

type Parents<'a> = BTreeMap<&'a str, Option<&'a str>>;

fn url_of(table: &RouteTable, parents: &Parents<'_>, route_id: &str) -> String {
    let segments: Vec<&str> = ancestors(table, parents, route_id)
        .into_iter()
        .rev()
        .filter_map(|entry| entry.path.as_deref())
        .flat_map(|path| path.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}

fn boundary_of(table: &RouteTable, parents: &Parents<'_>, route_id: &str) -> ErrorBoundaryOwner {
    ancestors(table, parents, route_id)
        .into_iter()
        .find(|entry| entry.has_error_boundary)
        .map(|entry| ErrorBoundaryOwner {
            has_error_boundary: true,
            error_boundary_id: Some(entry.id.clone()),
        })
        .unwrap_or_else(ErrorBoundaryOwner::none)
}

fn build_level(
    table: &RouteTable,
    parents: &Parents<'_>,
    parent_id: Option<&str>,
    visited: &mut BTreeSet<String>,
) -> Vec<RouteTreeNode> {
    let mut nodes = Vec::new();
    for entry in table.values() {
        if parents.get(entry.id.as_str()).copied().flatten() != parent_id {
            continue;
        }
        if !visited.insert(entry.id.clone()) {
            continue;
        }
        let children = build_level(table, parents, Some(entry.id.as_str()), visited);
        nodes.push(RouteTreeNode {
            name: url_of(table, parents, &entry.id),
            id: entry.id.clone(),
            path: entry.path.clone(),
            index: entry.index,
            has_error_boundary: entry.has_error_boundary,
            error_boundary: boundary_of(table, parents, &entry.id),
            children,
        });
    }
    nodes
}

/// Self-first ancestor chain over the repaired parent links. The repeated-id
/// guard only matters if `parents` was not produced by [`effective_parents`].
fn ancestors<'a>(
    table: &'a RouteTable,
    parents: &Parents<'_>,
    route_id: &str,
) -> Vec<&'a RouteTableEntry> {
    let mut chain = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current = table.get(route_id);
    while let Some(entry) = current {
        if !seen.insert(entry.id.as_str()) {
            break;
        }
        chain.push(entry);
        current = parents
            .get(entry.id.as_str())
            .copied()
            .flatten()
            .and_then(|parent| table.get(parent));
    }
    chain
}

/// Parent links after repairing dangling, self-referential, and cyclic
/// references.
fn effective_parents(table: &RouteTable) -> Parents<'_> {
    let mut parents: Parents<'_> = table
        .values()
        .map(|entry| {
            let parent = entry
                .parent_id
                .as_deref()
                .filter(|parent| *parent != entry.id && table.contains_key(*parent));
            (entry.id.as_str(), parent)
        })
        .collect();

    let mut rooted: BTreeSet<&str> = BTreeSet::new();
    for id in table.keys() {
        let mut path: Vec<&str> = Vec::new();
        let mut current = id.as_str();
        loop {
            if rooted.contains(current) {
                break;
            }
            if let Some(pos) = path.iter().position(|seen| *seen == current) {
                if let Some(breaker) = path[pos..].iter().min().copied() {
                    parents.insert(breaker, None);
                }
                break;
            }
            path.push(current);
            match parents.get(current).copied().flatten() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        rooted.extend(path);
    }
    parents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(
        id: &str,
        parent: Option<&str>,
        path: Option<&str>,
        boundary: bool,
    ) -> RouteTableEntry {
        RouteTableEntry {
            id: id.to_string(),
            path: path.map(str::to_string),
            parent_id: parent.map(str::to_string),
            index: false,
            has_error_boundary: boundary,
        }
    }

    fn table(entries: Vec<RouteTableEntry>) -> RouteTable {
        entries
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect()
    }

    #[test]
    fn nested_routes_resolve_urls_and_boundaries() {
        let routes = table(vec![
            entry("root", None, None, false),
            entry("a", Some("root"), Some("foo"), false),
            entry("b", Some("a"), Some("bar"), true),
        ]);
        let tree = build_tree(&routes, None);

        assert_eq!(tree.len(), 1);
        let root = &tree[0];
        assert_eq!(root.name, "/");
        assert_eq!(root.error_boundary, ErrorBoundaryOwner::none());

        let foo = &root.children[0];
        assert_eq!(foo.name, "/foo");
        assert_eq!(foo.error_boundary.error_boundary_id, None);

        let bar = &foo.children[0];
        assert_eq!(bar.name, "/foo/bar");
        assert!(bar.error_boundary.has_error_boundary);
        assert_eq!(bar.error_boundary.error_boundary_id.as_deref(), Some("b"));
        assert!(bar.children.is_empty());
    }

    #[test]
    fn boundary_is_inherited_from_nearest_ancestor() {
        let routes = table(vec![
            entry("root", None, None, true),
            entry("layout", Some("root"), Some("app"), true),
            entry("page", Some("layout"), Some("settings"), false),
        ]);
        assert_eq!(
            find_error_boundary(&routes, "page").error_boundary_id.as_deref(),
            Some("layout")
        );
        assert_eq!(
            find_error_boundary(&routes, "root").error_boundary_id.as_deref(),
            Some("root")
        );
    }

    #[test]
    fn dangling_parent_becomes_root() {
        let routes = table(vec![
            entry("root", None, None, false),
            entry("orphan", Some("missing"), Some("lost"), false),
        ]);
        let tree = build_tree(&routes, None);
        let ids: Vec<_> = tree.iter().map(|node| node.id.as_str()).collect();
        assert_eq!(ids, vec!["orphan", "root"]);
        assert_eq!(tree[0].name, "/lost");
    }

    #[test]
    fn self_parent_is_treated_as_root() {
        let routes = table(vec![entry("loop", Some("loop"), Some("x"), false)]);
        let tree = build_tree(&routes, None);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "/x");
    }

    #[test]
    fn cycle_terminates_and_keeps_every_entry() {
        let routes = table(vec![
            entry("a", Some("b"), Some("one"), false),
            entry("b", Some("a"), Some("two"), true),
        ]);
        let tree = build_tree(&routes, None);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, "a");
        assert_eq!(tree[0].children.len(), 1);

        let root = &tree[0];
        assert_eq!(root.name, "/one");
        assert_eq!(root.error_boundary, ErrorBoundaryOwner::none());
        let child = &root.children[0];
        assert_eq!(child.id, "b");
        assert_eq!(child.name, "/one/two");
        assert_eq!(child.error_boundary.error_boundary_id.as_deref(), Some("b"));

        assert_eq!(resolve_url(&routes, "a"), "/one");
        assert_eq!(find_error_boundary(&routes, "a"), ErrorBoundaryOwner::none());
        assert_eq!(resolve_url(&routes, "b"), "/one/two");
    }

    #[test]
    fn empty_and_slashed_segments_are_filtered() {
        let routes = table(vec![
            entry("root", None, Some(""), false),
            entry("docs", Some("root"), Some("/docs/"), false),
            entry("index", Some("docs"), None, false),
        ]);
        assert_eq!(resolve_url(&routes, "index"), "/docs");
        assert_eq!(resolve_url(&routes, "root"), "/");
    }

    #[test]
    fn subtree_build_starts_from_given_parent() {
        let routes = table(vec![
            entry("root", None, None, false),
            entry("a", Some("root"), Some("a"), false),
            entry("b", Some("root"), Some("b"), false),
        ]);
        let subtree = build_tree(&routes, Some("root"));
        let names: Vec<_> = subtree.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, vec!["/a", "/b"]);
    }

    #[test]
    fn table_parses_manifest_json() {
        let routes: RouteTable = serde_json::from_str(
            r#"{
                "root": {"id": "root", "hasErrorBoundary": true},
                "routes/_index": {"id": "routes/_index", "parentId": "root", "index": true}
            }"#,
        )
        .expect("parse route table");
        let tree = build_tree(&routes, None);
        assert!(tree[0].children[0].index);
        assert_eq!(
            tree[0].children[0].error_boundary.error_boundary_id.as_deref(),
            Some("root")
        );
    }
}
