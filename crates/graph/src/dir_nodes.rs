use std::collections::BTreeMap;
use std::path::Path;

use rlm_config::file_id_for_path;
use rlm_store::{DirNode, FileNode, NodeRecord, NodeStore, NODE_SCHEMA, NODE_SCHEMA_VERSION};

const ENTRY_ROLES: &[&str] = &["web", "controller", "job", "config", "infra"];
const MAX_SUMMARY_SYMBOLS: usize = 8;
const MAX_SUMMARY_HIGHLIGHTS: usize = 3;
const MAX_SUMMARY_ENTRYPOINTS: usize = 3;

/// Derive a directory node for every ancestor directory of every file
/// node. Pure rollup: recomputed wholesale, merged via compact-by-id.
pub fn build_dir_nodes(store: &NodeStore, max_children: usize, max_chars: usize) -> Vec<NodeRecord> {
    let mut by_dir: BTreeMap<String, Vec<&FileNode>> = BTreeMap::new();
    for node in store.file_nodes() {
        if node.path.trim().is_empty() {
            continue;
        }
        let mut parent = Path::new(&node.path).parent();
        while let Some(dir) = parent {
            let key = dir.to_string_lossy().replace('\\', "/");
            if !key.is_empty() && key != "." {
                by_dir.entry(key).or_default().push(node);
            }
            parent = dir.parent();
        }
    }

    by_dir
        .into_iter()
        .map(|(dir_path, children)| {
            let dir_id = file_id_for_path(Path::new(&dir_path));
            let (children_ids, total, summary) =
                summarize_children(children, max_children, max_chars);
            NodeRecord::Dir(DirNode {
                schema: NODE_SCHEMA.to_string(),
                schema_version: NODE_SCHEMA_VERSION.to_string(),
                id: dir_id.clone(),
                dir_id,
                path: dir_path,
                children_file_ids: children_ids,
                children_count_total: total,
                summary,
            })
        })
        .collect()
}

fn summarize_children(
    mut children: Vec<&FileNode>,
    max_children: usize,
    max_chars: usize,
) -> (Vec<String>, usize, String) {
    children.sort_by(|a, b| a.path.cmp(&b.path));
    let mut children_ids: Vec<String> = children
        .iter()
        .map(|node| node.node_id().to_string())
        .filter(|id| !id.is_empty())
        .collect();
    let total = children_ids.len();
    if max_children > 0 {
        children_ids.truncate(max_children);
    }

    let highlights: Vec<&str> = children
        .iter()
        .map(|node| node.summary.trim())
        .filter(|summary| !summary.is_empty())
        .take(MAX_SUMMARY_HIGHLIGHTS)
        .collect();

    let mut symbols: Vec<&str> = Vec::new();
    'outer: for node in &children {
        for symbol in &node.public_symbols {
            let symbol = symbol.trim();
            if !symbol.is_empty() && !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
            if symbols.len() >= MAX_SUMMARY_SYMBOLS {
                break 'outer;
            }
        }
    }

    let entrypoints: Vec<&str> = children
        .iter()
        .filter(|node| {
            node.framework_roles
                .iter()
                .any(|role| ENTRY_ROLES.contains(&role.as_str()))
        })
        .map(|node| node.path.as_str())
        .filter(|path| !path.is_empty())
        .take(MAX_SUMMARY_ENTRYPOINTS)
        .collect();

    let mut parts = vec![format!("Module with {total} file(s).")];
    if !entrypoints.is_empty() {
        parts.push(format!("Entrypoints: {}.", entrypoints.join(", ")));
    }
    if !symbols.is_empty() {
        parts.push(format!("Symbols: {}.", symbols.join(", ")));
    }
    if !highlights.is_empty() {
        parts.push(format!("Highlights: {}.", highlights.join(" | ")));
    }
    let summary = truncate_text(&parts.join(" "), max_chars);
    (children_ids, total, summary)
}

fn truncate_text(text: &str, limit: usize) -> String {
    if limit == 0 {
        return String::new();
    }
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn file(path: &str, summary: &str, symbols: &[&str], roles: &[&str]) -> NodeRecord {
        NodeRecord::File(FileNode {
            id: format!("id-{path}"),
            file_id: format!("id-{path}"),
            path: path.into(),
            summary: summary.into(),
            public_symbols: symbols.iter().map(|s| s.to_string()).collect(),
            framework_roles: roles.iter().map(|s| s.to_string()).collect(),
            ..FileNode::default()
        })
    }

    #[test]
    fn every_ancestor_gets_a_dir_node() {
        let store = NodeStore::from_nodes(vec![file("src/app/main.rs", "Entry.", &[], &[])]);
        let dirs = build_dir_nodes(&store, 50, 600);
        let paths: Vec<&str> = dirs.iter().map(|node| node.path()).collect();
        assert_eq!(paths, vec!["src", "src/app"]);
    }

    #[test]
    fn children_ids_are_bounded_but_total_is_honest() {
        let store = NodeStore::from_nodes(vec![
            file("pkg/a.rs", "", &[], &[]),
            file("pkg/b.rs", "", &[], &[]),
            file("pkg/c.rs", "", &[], &[]),
        ]);
        let dirs = build_dir_nodes(&store, 2, 600);
        let NodeRecord::Dir(dir) = &dirs[0] else {
            panic!("expected dir node");
        };
        assert_eq!(dir.children_file_ids.len(), 2);
        assert_eq!(dir.children_count_total, 3);
    }

    #[test]
    fn summary_collects_entrypoints_symbols_and_highlights() {
        let store = NodeStore::from_nodes(vec![
            file("api/routes.kt", "HTTP routes.", &["Router"], &["web"]),
            file("api/model.kt", "Domain model.", &["Order", "OrderLine"], &[]),
        ]);
        let dirs = build_dir_nodes(&store, 50, 600);
        let NodeRecord::Dir(dir) = &dirs[0] else {
            panic!("expected dir node");
        };
        assert!(dir.summary.starts_with("Module with 2 file(s)."));
        assert!(dir.summary.contains("Entrypoints: api/routes.kt."));
        assert!(dir.summary.contains("Symbols: Order, OrderLine, Router."));
        assert!(dir.summary.contains("Highlights: Domain model. | HTTP routes.."));
    }

    #[test]
    fn summary_is_truncated_to_the_char_limit() {
        let long = "Very long summary sentence. ".repeat(40);
        let store = NodeStore::from_nodes(vec![file("pkg/a.rs", &long, &[], &[])]);
        let dirs = build_dir_nodes(&store, 50, 80);
        let NodeRecord::Dir(dir) = &dirs[0] else {
            panic!("expected dir node");
        };
        assert!(dir.summary.chars().count() <= 80);
    }
}
