//! Ad-hoc query slices over the node and link stores.
//!
//! A slice is a small pack answering "show me everything about X":
//! a case-insensitive regex (escaped verbatim if it fails to parse)
//! matched against node text fields and link endpoints, bounded by the
//! slice budget. The output lands under `reports/context/` keyed by a
//! hash of the query, with a `.latest` copy for tooling that only wants
//! the most recent slice.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use rlm_config::RlmSettings;
use rlm_graph::now_utc_stamp;
use rlm_store::{read_jsonl, write_text_atomic, Link, NodeRecord};
use rlm_store::{PACK_SCHEMA, PACK_VERSION};

use crate::error::{PackError, Result};
use crate::paths;

#[derive(Debug, Clone, Default)]
pub struct SliceRequest {
    pub query: String,
    /// Path fragments; a node must contain at least one when non-empty.
    pub paths: Vec<String>,
    /// Language tags (lowercase); dir nodes never match when non-empty.
    pub langs: Vec<String>,
    pub max_nodes: Option<usize>,
    pub max_links: Option<usize>,
}

#[derive(Debug)]
pub struct SliceOutcome {
    pub payload: Value,
    pub output_path: PathBuf,
    pub latest_path: PathBuf,
    pub nodes: usize,
    pub links: usize,
}

fn compile_query(query: &str) -> Regex {
    RegexBuilder::new(query)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(query))
                .case_insensitive(true)
                .build()
        })
        // An escaped literal always compiles; match-nothing is the
        // degenerate fallback.
        .unwrap_or_else(|_| Regex::new("$^").unwrap_or_else(|_| unreachable!()))
}

fn slice_key(query: &str, paths: &[String], langs: &[String]) -> String {
    let mut parts = vec![query.to_string()];
    if !paths.is_empty() {
        parts.push(format!("paths={}", paths.join(",")));
    }
    if !langs.is_empty() {
        parts.push(format!("langs={}", langs.join(",")));
    }
    let digest = format!("{:x}", Sha256::digest(parts.join("|").as_bytes()));
    digest[..10].to_string()
}

fn node_matches(node: &NodeRecord, pattern: &Regex) -> bool {
    if pattern.is_match(node.path()) {
        return true;
    }
    match node {
        NodeRecord::File(file) => {
            pattern.is_match(&file.summary)
                || [
                    &file.public_symbols,
                    &file.key_calls,
                    &file.framework_roles,
                    &file.test_hooks,
                    &file.risks,
                ]
                .iter()
                .any(|items| items.iter().any(|item| pattern.is_match(item)))
        }
        NodeRecord::Dir(dir) => pattern.is_match(&dir.summary),
    }
}

fn node_matches_paths(node: &NodeRecord, fragments: &[String]) -> bool {
    if fragments.is_empty() {
        return true;
    }
    fragments
        .iter()
        .any(|token| !token.is_empty() && node.path().contains(token.as_str()))
}

fn node_matches_lang(node: &NodeRecord, langs: &[String]) -> bool {
    if langs.is_empty() {
        return true;
    }
    let lang = match node {
        NodeRecord::File(file) => file.lang.to_lowercase(),
        NodeRecord::Dir(_) => String::new(),
    };
    langs.iter().any(|candidate| *candidate == lang)
}

fn link_matches(link: &Link, pattern: &Regex, file_paths: &BTreeMap<String, String>) -> bool {
    if pattern.is_match(link.link_type.as_str())
        || pattern.is_match(&link.src_file_id)
        || pattern.is_match(&link.dst_file_id)
        || pattern.is_match(&link.evidence_ref.path)
    {
        return true;
    }
    let endpoint = |id: &str| file_paths.get(id).is_some_and(|path| pattern.is_match(path));
    endpoint(&link.src_file_id) || endpoint(&link.dst_file_id)
}

/// Build and write a slice pack for the given query.
///
/// Both stores must already exist; the slice never regenerates them.
pub fn write_slice_pack(
    root: &Path,
    ticket: &str,
    slug_hint: Option<&str>,
    request: &SliceRequest,
    settings: &RlmSettings,
    output: Option<&Path>,
) -> Result<SliceOutcome> {
    let nodes_path = paths::nodes_path(root, ticket);
    let links_path = paths::links_path(root, ticket);
    if !nodes_path.is_file() {
        return Err(PackError::MissingArtifact { path: nodes_path });
    }
    if !links_path.is_file() {
        return Err(PackError::MissingArtifact { path: links_path });
    }

    let pattern = compile_query(&request.query);
    let max_nodes = request.max_nodes.unwrap_or(settings.slice_budget.max_nodes).max(1);
    let max_links = request.max_links.unwrap_or(settings.slice_budget.max_links).max(1);
    let path_fragments: Vec<String> = request
        .paths
        .iter()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .collect();
    let langs: Vec<String> = request
        .langs
        .iter()
        .map(|token| token.trim().to_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let all_nodes: Vec<NodeRecord> = read_jsonl(&nodes_path);
    let mut selected_nodes: Vec<Value> = Vec::new();
    let mut node_ids: BTreeSet<String> = BTreeSet::new();
    let mut file_paths: BTreeMap<String, String> = BTreeMap::new();
    let mut nodes_truncated = false;
    for node in &all_nodes {
        if !node_matches_lang(node, &langs)
            || !node_matches_paths(node, &path_fragments)
            || !node_matches(node, &pattern)
        {
            continue;
        }
        let node_id = node.node_id().to_string();
        if node_id.is_empty() || node_ids.contains(&node_id) {
            continue;
        }
        if node_ids.len() >= max_nodes {
            nodes_truncated = true;
            break;
        }
        node_ids.insert(node_id.clone());
        let (kind, summary, lang) = match node {
            NodeRecord::File(file) => ("file", file.summary.as_str(), Some(file.lang.as_str())),
            NodeRecord::Dir(dir) => ("dir", dir.summary.as_str(), None),
        };
        selected_nodes.push(json!({
            "id": node_id,
            "node_kind": kind,
            "path": node.path(),
            "summary": summary,
            "lang": lang,
        }));
        if let NodeRecord::File(file) = node {
            if !file.path.is_empty() {
                file_paths.insert(node_id, file.path.clone());
            }
        }
    }

    let all_links: Vec<Link> = read_jsonl(&links_path);
    let mut selected_links: Vec<Value> = Vec::new();
    let mut links_truncated = false;
    for link in &all_links {
        if selected_links.len() >= max_links {
            links_truncated = true;
            break;
        }
        if !link_matches(link, &pattern, &file_paths) {
            continue;
        }
        selected_links.push(json!({
            "link_id": link.link_id,
            "src_file_id": link.src_file_id,
            "dst_file_id": link.dst_file_id,
            "type": link.link_type.as_str(),
            "evidence_ref": link.evidence_ref,
        }));
    }

    let key = slice_key(&request.query, &path_fragments, &langs);
    let output_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths::slice_path(root, ticket, &key));
    let latest_path = paths::slice_latest_path(root, ticket);

    let payload = json!({
        "schema": PACK_SCHEMA,
        "pack_version": PACK_VERSION,
        "type": "rlm-slice",
        "kind": "pack",
        "ticket": ticket,
        "slug_hint": slug_hint,
        "generated_at": now_utc_stamp(),
        "query": request.query,
        "links": {
            "nodes": paths::rel_path(&nodes_path, root),
            "edges": paths::rel_path(&links_path, root),
        },
        "stats": {
            "nodes": selected_nodes.len(),
            "links": selected_links.len(),
            "nodes_truncated": nodes_truncated,
            "links_truncated": links_truncated,
            "max_nodes": max_nodes,
            "max_links": max_links,
        },
        "nodes": selected_nodes,
        "edges": selected_links,
    });

    // Slice packs are already bounded by their caps; no budget pass.
    let mut text = serde_json::to_string_pretty(&payload)?;
    text.push('\n');
    write_text_atomic(&output_path, &text)?;
    write_text_atomic(&latest_path, &text)?;
    log::info!(
        "slice saved to {} ({} nodes, {} links)",
        paths::rel_path(&output_path, root),
        payload["stats"]["nodes"],
        payload["stats"]["links"],
    );

    let nodes = selected_nodes_len(&payload);
    let links = selected_links_len(&payload);
    Ok(SliceOutcome {
        payload,
        output_path,
        latest_path,
        nodes,
        links,
    })
}

fn selected_nodes_len(payload: &Value) -> usize {
    payload.get("nodes").and_then(Value::as_array).map_or(0, Vec::len)
}

fn selected_links_len(payload: &Value) -> usize {
    payload.get("edges").and_then(Value::as_array).map_or(0, Vec::len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rlm_store::{write_jsonl, EvidenceRef, Extractor, FileNode, LinkType};
    use tempfile::tempdir;

    fn file_node(path: &str, lang: &str, summary: &str, symbols: &[&str]) -> NodeRecord {
        NodeRecord::File(FileNode {
            id: format!("id-{path}"),
            file_id: format!("id-{path}"),
            path: path.into(),
            lang: lang.into(),
            summary: summary.into(),
            public_symbols: symbols.iter().map(|s| s.to_string()).collect(),
            ..FileNode::default()
        })
    }

    fn seed(root: &Path, nodes: &[NodeRecord], links: &[Link]) {
        write_jsonl(&paths::nodes_path(root, "T-1"), nodes).unwrap();
        write_jsonl(&paths::links_path(root, "T-1"), links).unwrap();
    }

    fn call_link(src: &str, dst: &str) -> Link {
        Link {
            schema: "aidd.rlm_link.v1".into(),
            schema_version: "v1".into(),
            link_id: format!("l-{src}-{dst}"),
            src_file_id: src.into(),
            dst_file_id: dst.into(),
            link_type: LinkType::Calls,
            evidence_ref: EvidenceRef {
                path: "src/a.kt".into(),
                line_start: 1,
                line_end: 1,
                extractor: Extractor::Regex,
                match_hash: "m".into(),
            },
            unverified: false,
        }
    }

    #[test]
    fn query_matches_symbols_case_insensitively() {
        let dir = tempdir().unwrap();
        seed(
            dir.path(),
            &[
                file_node("src/a.kt", "kt", "Order entry.", &["OrderService"]),
                file_node("src/b.kt", "kt", "Billing.", &["Invoice"]),
            ],
            &[call_link("id-src/a.kt", "id-src/b.kt")],
        );
        let request = SliceRequest {
            query: "orderservice".into(),
            ..SliceRequest::default()
        };
        let outcome = write_slice_pack(
            dir.path(),
            "T-1",
            None,
            &request,
            &RlmSettings::default(),
            None,
        )
        .unwrap();
        assert_eq!(outcome.nodes, 1);
        // No link field mentions the symbol, so the edge set stays empty.
        assert_eq!(outcome.links, 0);
        assert!(outcome.output_path.exists());
        assert!(outcome.latest_path.exists());
    }

    #[test]
    fn links_match_through_selected_endpoint_paths() {
        let dir = tempdir().unwrap();
        let node = NodeRecord::File(FileNode {
            id: "n1".into(),
            file_id: "n1".into(),
            path: "src/orders/handler.kt".into(),
            lang: "kt".into(),
            summary: "Handles orders.".into(),
            ..FileNode::default()
        });
        seed(dir.path(), &[node], &[call_link("n1", "n2")]);
        let request = SliceRequest {
            query: "orders/handler".into(),
            ..SliceRequest::default()
        };
        let outcome = write_slice_pack(
            dir.path(),
            "T-1",
            None,
            &request,
            &RlmSettings::default(),
            None,
        )
        .unwrap();
        assert_eq!(outcome.nodes, 1);
        // Neither the link ids nor the evidence path match the query;
        // the edge is kept because its endpoint resolves to a matched
        // node path.
        assert_eq!(outcome.links, 1);
    }

    #[test]
    fn caps_are_respected_and_truncation_is_flagged() {
        let dir = tempdir().unwrap();
        let nodes: Vec<NodeRecord> = (0..5)
            .map(|i| file_node(&format!("src/m{i}.kt"), "kt", "Match here.", &[]))
            .collect();
        seed(dir.path(), &nodes, &[]);
        let request = SliceRequest {
            query: "match".into(),
            max_nodes: Some(2),
            ..SliceRequest::default()
        };
        let outcome = write_slice_pack(
            dir.path(),
            "T-1",
            None,
            &request,
            &RlmSettings::default(),
            None,
        )
        .unwrap();
        assert_eq!(outcome.nodes, 2);
        assert_eq!(
            outcome.payload["stats"]["nodes_truncated"],
            Value::Bool(true)
        );
    }

    #[test]
    fn invalid_regex_falls_back_to_a_literal_match() {
        let dir = tempdir().unwrap();
        seed(
            dir.path(),
            &[file_node("src/a.kt", "kt", "weird (unclosed", &[])],
            &[],
        );
        let request = SliceRequest {
            query: "(unclosed".into(),
            ..SliceRequest::default()
        };
        let outcome = write_slice_pack(
            dir.path(),
            "T-1",
            None,
            &request,
            &RlmSettings::default(),
            None,
        )
        .unwrap();
        assert_eq!(outcome.nodes, 1);
    }

    #[test]
    fn lang_and_path_filters_narrow_the_slice() {
        let dir = tempdir().unwrap();
        seed(
            dir.path(),
            &[
                file_node("src/a.kt", "kt", "Shared name.", &[]),
                file_node("src/b.py", "py", "Shared name.", &[]),
            ],
            &[],
        );
        let request = SliceRequest {
            query: "shared".into(),
            langs: vec!["py".into()],
            ..SliceRequest::default()
        };
        let outcome = write_slice_pack(
            dir.path(),
            "T-1",
            None,
            &request,
            &RlmSettings::default(),
            None,
        )
        .unwrap();
        assert_eq!(outcome.nodes, 1);
        assert_eq!(
            outcome.payload["nodes"][0]["path"],
            Value::String("src/b.py".into())
        );
    }

    #[test]
    fn missing_stores_are_an_error() {
        let dir = tempdir().unwrap();
        let request = SliceRequest {
            query: "anything".into(),
            ..SliceRequest::default()
        };
        let err = write_slice_pack(
            dir.path(),
            "T-1",
            None,
            &request,
            &RlmSettings::default(),
            None,
        );
        assert!(matches!(err, Err(PackError::MissingArtifact { .. })));
    }

    #[test]
    fn slice_key_depends_on_query_and_filters() {
        let plain = slice_key("q", &[], &[]);
        let filtered = slice_key("q", &["src".into()], &[]);
        assert_eq!(plain.len(), 10);
        assert_ne!(plain, filtered);
    }
}
