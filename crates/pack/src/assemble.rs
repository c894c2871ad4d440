//! Deterministic pack assembly.
//!
//! The rlm pack ranks file nodes by verified-link degree, derives the
//! role-filtered node tables, samples verified links with evidence
//! snippets read back from source, and folds in warnings from the link
//! stats sidecar and the worklist pack. Research/qa/prd packs are
//! thinner: top-N truncation plus columnar tables over an arbitrary
//! report payload.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use rlm_config::{file_id_for_path, RlmSettings};
use rlm_graph::now_utc_stamp;
use rlm_store::{read_jsonl, write_text_atomic, EvidenceRef, FileNode, Link, NodeRecord};
use rlm_store::{PACK_SCHEMA, PACK_VERSION};

use crate::budget::auto_trim_rlm_pack;
use crate::budget::{RLM_MAX_CHARS, RLM_MAX_LINES};
use crate::error::{PackError, Result};
use crate::paths;

/// Per-table row caps for the rlm pack, overridable through
/// `pack_budget.limits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlmPackLimits {
    pub entrypoints: usize,
    pub hotspots: usize,
    pub integration_points: usize,
    pub test_hooks: usize,
    pub recommended_reads: usize,
    pub risks: usize,
    pub links: usize,
    pub evidence_snippet_chars: usize,
}

impl Default for RlmPackLimits {
    fn default() -> Self {
        Self {
            entrypoints: 15,
            hotspots: 15,
            integration_points: 15,
            test_hooks: 10,
            recommended_reads: 15,
            risks: 10,
            links: 20,
            evidence_snippet_chars: 160,
        }
    }
}

impl RlmPackLimits {
    pub fn with_overrides(overrides: &BTreeMap<String, usize>) -> Self {
        let mut limits = Self::default();
        for (key, value) in overrides {
            match key.as_str() {
                "entrypoints" => limits.entrypoints = *value,
                "hotspots" => limits.hotspots = *value,
                "integration_points" => limits.integration_points = *value,
                "test_hooks" => limits.test_hooks = *value,
                "recommended_reads" => limits.recommended_reads = *value,
                "risks" => limits.risks = *value,
                "links" => limits.links = *value,
                "evidence_snippet_chars" => limits.evidence_snippet_chars = *value,
                _ => {}
            }
        }
        limits
    }
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

/// Read the lines an evidence ref points at, collapse whitespace, and
/// truncate. Unreadable or out-of-range refs yield an empty snippet.
pub fn extract_evidence_snippet(
    root: Option<&Path>,
    evidence: &EvidenceRef,
    max_chars: usize,
) -> String {
    let Some(root) = root else {
        return String::new();
    };
    if evidence.path.trim().is_empty() {
        return String::new();
    }
    let raw = Path::new(&evidence.path);
    let abs = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        root.join(raw)
    };
    let Ok(data) = fs::read(&abs) else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&data);
    if evidence.line_start == 0 || evidence.line_end == 0 {
        return String::new();
    }
    let start = (evidence.line_start as usize).saturating_sub(1);
    let end = (evidence.line_end as usize).saturating_sub(1).max(start);
    let snippet = text
        .lines()
        .skip(start)
        .take(end - start + 1)
        .collect::<Vec<&str>>()
        .join("\n");
    let normalized = snippet.split_whitespace().collect::<Vec<&str>>().join(" ");
    truncate_text(&normalized, max_chars)
}

/// Short content-addressed row id for columnar tables.
fn stable_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

fn columnar(cols: &[&str], rows: Vec<Value>) -> Value {
    json!({ "cols": cols, "rows": rows })
}

fn arr<'a>(payload: &'a Value, key: &str) -> &'a [Value] {
    payload.get(key).and_then(Value::as_array).map_or(&[], Vec::as_slice)
}

fn str_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn take_limited(items: &[Value], limit: usize) -> Vec<Value> {
    if limit == 0 {
        return Vec::new();
    }
    items.iter().take(limit).cloned().collect()
}

fn pack_paths(entries: &[Value], limit: usize, sample_limit: usize) -> Vec<Value> {
    take_limited(entries, limit)
        .into_iter()
        .filter_map(|entry| {
            let map = entry.as_object()?;
            let samples = map.get("sample").and_then(Value::as_array).cloned().unwrap_or_default();
            Some(json!({
                "path": map.get("path").cloned().unwrap_or(Value::Null),
                "type": map.get("type").cloned().unwrap_or(Value::Null),
                "exists": map.get("exists").cloned().unwrap_or(Value::Null),
                "sample": samples.into_iter().take(sample_limit).collect::<Vec<Value>>(),
            }))
        })
        .collect()
}

fn pack_matches(entries: &[Value], limit: usize, snippet_limit: usize) -> Value {
    let cols = ["id", "token", "file", "line", "snippet"];
    let mut rows = Vec::new();
    for entry in take_limited(entries, limit) {
        let Some(map) = entry.as_object() else {
            continue;
        };
        let token = str_of(map.get("token").unwrap_or(&Value::Null)).trim().to_string();
        let file = str_of(map.get("file").unwrap_or(&Value::Null)).trim().to_string();
        if file.is_empty() {
            continue;
        }
        let line = map.get("line").cloned().unwrap_or(Value::Null);
        let line_text = str_of(&line);
        let snippet = truncate_text(
            &str_of(map.get("snippet").unwrap_or(&Value::Null)),
            snippet_limit,
        );
        let id = stable_id(&[file.as_str(), line_text.as_str(), token.as_str()]);
        rows.push(json!([id, token, file, line, snippet]));
    }
    columnar(&cols, rows)
}

fn pack_reuse(entries: &[Value], limit: usize) -> Value {
    let cols = ["id", "path", "language", "score", "has_tests", "top_symbols", "imports"];
    let mut rows = Vec::new();
    for entry in take_limited(entries, limit) {
        let Some(map) = entry.as_object() else {
            continue;
        };
        let path = str_of(map.get("path").unwrap_or(&Value::Null)).trim().to_string();
        if path.is_empty() {
            continue;
        }
        let score = map.get("score").cloned().unwrap_or(Value::Null);
        let language = map.get("language").cloned().unwrap_or(Value::Null);
        let score_text = str_of(&score);
        let language_text = str_of(&language);
        let id = stable_id(&[path.as_str(), score_text.as_str(), language_text.as_str()]);
        let top_symbols: Vec<Value> = arr(&entry, "top_symbols").iter().take(3).cloned().collect();
        let imports: Vec<Value> = arr(&entry, "imports").iter().take(5).cloned().collect();
        rows.push(json!([
            id,
            path,
            language,
            score,
            map.get("has_tests").cloned().unwrap_or(Value::Null),
            top_symbols,
            imports,
        ]));
    }
    columnar(&cols, rows)
}

fn pack_findings(entries: &[Value], limit: usize, cols: &[&str]) -> Value {
    let rows = take_limited(entries, limit)
        .into_iter()
        .filter_map(|entry| {
            let map = entry.as_object()?;
            let row: Vec<Value> = cols
                .iter()
                .map(|col| map.get(*col).cloned().unwrap_or(Value::Null))
                .collect();
            Some(Value::Array(row))
        })
        .collect();
    columnar(cols, rows)
}

fn pack_tests_executed(entries: &[Value], limit: usize) -> Value {
    let cols = ["command", "status", "log", "exit_code"];
    let rows = take_limited(entries, limit)
        .into_iter()
        .filter_map(|entry| {
            let map = entry.as_object()?;
            let log = map
                .get("log")
                .filter(|v| !v.is_null())
                .or_else(|| map.get("log_path"))
                .cloned()
                .unwrap_or(Value::Null);
            Some(json!([
                map.get("command").cloned().unwrap_or(Value::Null),
                map.get("status").cloned().unwrap_or(Value::Null),
                log,
                map.get("exit_code").cloned().unwrap_or(Value::Null),
            ]))
        })
        .collect();
    columnar(&cols, rows)
}

fn default_research_limits() -> BTreeMap<String, usize> {
    [
        ("tags", 10),
        ("keywords", 10),
        ("keywords_raw", 10),
        ("non_negotiables", 10),
        ("paths", 10),
        ("paths_discovered", 10),
        ("invalid_paths", 10),
        ("docs", 10),
        ("path_samples", 4),
        ("matches", 20),
        ("match_snippet_chars", 240),
        ("reuse_candidates", 8),
        ("manual_notes", 10),
        ("tests_evidence", 10),
        ("suggested_test_tasks", 10),
        ("recommendations", 10),
        ("rlm_warnings", 10),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn merged_limits(
    defaults: BTreeMap<String, usize>,
    overrides: &BTreeMap<String, usize>,
) -> BTreeMap<String, usize> {
    let mut merged = defaults;
    for (key, value) in overrides {
        merged.insert(key.clone(), *value);
    }
    merged
}

fn lim(limits: &BTreeMap<String, usize>, key: &str) -> usize {
    limits.get(key).copied().unwrap_or(0)
}

/// Pack a research report payload: identity fields plus top-N truncated
/// lists and columnar matches/reuse tables.
pub fn build_research_pack(
    payload: &Value,
    source_path: Option<&str>,
    overrides: &BTreeMap<String, usize>,
) -> Value {
    let limits = merged_limits(default_research_limits(), overrides);
    let profile = payload.get("profile").cloned().unwrap_or_else(|| json!({}));

    json!({
        "schema": PACK_SCHEMA,
        "pack_version": PACK_VERSION,
        "type": "research",
        "kind": "context",
        "ticket": payload.get("ticket").cloned().unwrap_or(Value::Null),
        "slug": payload.get("slug").cloned().unwrap_or(Value::Null),
        "slug_hint": payload.get("slug_hint").cloned().unwrap_or(Value::Null),
        "generated_at": payload.get("generated_at").cloned().unwrap_or(Value::Null),
        "source_path": source_path,
        "tags": take_limited(arr(payload, "tags"), lim(&limits, "tags")),
        "keywords": take_limited(arr(payload, "keywords"), lim(&limits, "keywords")),
        "keywords_raw": take_limited(arr(payload, "keywords_raw"), lim(&limits, "keywords_raw")),
        "non_negotiables": take_limited(
            arr(payload, "non_negotiables"),
            lim(&limits, "non_negotiables"),
        ),
        "paths": pack_paths(arr(payload, "paths"), lim(&limits, "paths"), lim(&limits, "path_samples")),
        "paths_discovered": take_limited(
            arr(payload, "paths_discovered"),
            lim(&limits, "paths_discovered"),
        ),
        "invalid_paths": take_limited(arr(payload, "invalid_paths"), lim(&limits, "invalid_paths")),
        "docs": pack_paths(arr(payload, "docs"), lim(&limits, "docs"), lim(&limits, "path_samples")),
        "profile": {
            "is_new_project": profile.get("is_new_project").cloned().unwrap_or(Value::Null),
            "src_layers": profile.get("src_layers").cloned().unwrap_or_else(|| json!([])),
            "tests_detected": profile.get("tests_detected").cloned().unwrap_or(Value::Null),
            "tests_evidence": take_limited(arr(&profile, "tests_evidence"), lim(&limits, "tests_evidence")),
            "suggested_test_tasks": take_limited(
                arr(&profile, "suggested_test_tasks"),
                lim(&limits, "suggested_test_tasks"),
            ),
            "config_detected": profile.get("config_detected").cloned().unwrap_or(Value::Null),
            "logging_artifacts": profile.get("logging_artifacts").cloned().unwrap_or_else(|| json!([])),
            "recommendations": take_limited(arr(&profile, "recommendations"), lim(&limits, "recommendations")),
        },
        "manual_notes": take_limited(arr(payload, "manual_notes"), lim(&limits, "manual_notes")),
        "reuse_candidates": pack_reuse(arr(payload, "reuse_candidates"), lim(&limits, "reuse_candidates")),
        "matches": pack_matches(
            arr(payload, "matches"),
            lim(&limits, "matches"),
            lim(&limits, "match_snippet_chars"),
        ),
        "rlm_targets_path": payload.get("rlm_targets_path").cloned().unwrap_or(Value::Null),
        "rlm_manifest_path": payload.get("rlm_manifest_path").cloned().unwrap_or(Value::Null),
        "rlm_worklist_path": payload.get("rlm_worklist_path").cloned().unwrap_or(Value::Null),
        "rlm_nodes_path": payload.get("rlm_nodes_path").cloned().unwrap_or(Value::Null),
        "rlm_links_path": payload.get("rlm_links_path").cloned().unwrap_or(Value::Null),
        "rlm_links_stats_path": payload.get("rlm_links_stats_path").cloned().unwrap_or(Value::Null),
        "rlm_pack_path": payload.get("rlm_pack_path").cloned().unwrap_or(Value::Null),
        "rlm_status": payload.get("rlm_status").cloned().unwrap_or(Value::Null),
        "rlm_warnings": take_limited(arr(payload, "rlm_warnings"), lim(&limits, "rlm_warnings")),
        "deep_mode": payload.get("deep_mode").cloned().unwrap_or(Value::Null),
        "auto_mode": payload.get("auto_mode").cloned().unwrap_or(Value::Null),
        "stats": {
            "matches": arr(payload, "matches").len(),
            "reuse_candidates": arr(payload, "reuse_candidates").len(),
        },
    })
}

/// Pack a qa report: findings and executed tests as columnar tables.
pub fn build_qa_pack(
    payload: &Value,
    source_path: Option<&str>,
    overrides: &BTreeMap<String, usize>,
) -> Value {
    let defaults = [("findings", 20), ("tests_executed", 10)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let limits = merged_limits(defaults, overrides);
    let findings = arr(payload, "findings");

    json!({
        "schema": PACK_SCHEMA,
        "pack_version": PACK_VERSION,
        "type": "qa",
        "kind": "report",
        "ticket": payload.get("ticket").cloned().unwrap_or(Value::Null),
        "slug_hint": payload.get("slug_hint").cloned().unwrap_or(Value::Null),
        "generated_at": payload.get("generated_at").cloned().unwrap_or(Value::Null),
        "status": payload.get("status").cloned().unwrap_or(Value::Null),
        "summary": payload.get("summary").cloned().unwrap_or(Value::Null),
        "branch": payload.get("branch").cloned().unwrap_or(Value::Null),
        "source_path": source_path,
        "counts": payload.get("counts").cloned().unwrap_or_else(|| json!({})),
        "findings": pack_findings(
            findings,
            lim(&limits, "findings"),
            &["id", "severity", "scope", "blocking", "title", "details", "recommendation"],
        ),
        "tests_summary": payload.get("tests_summary").cloned().unwrap_or(Value::Null),
        "tests_executed": pack_tests_executed(
            arr(payload, "tests_executed"),
            lim(&limits, "tests_executed"),
        ),
        "inputs": payload.get("inputs").cloned().unwrap_or_else(|| json!({})),
        "stats": { "findings": findings.len() },
    })
}

/// Pack a prd review: findings table plus bounded action items.
pub fn build_prd_pack(
    payload: &Value,
    source_path: Option<&str>,
    overrides: &BTreeMap<String, usize>,
) -> Value {
    let defaults = [("findings", 20), ("action_items", 10)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let limits = merged_limits(defaults, overrides);
    let findings = arr(payload, "findings");
    let action_items = arr(payload, "action_items");

    json!({
        "schema": PACK_SCHEMA,
        "pack_version": PACK_VERSION,
        "type": "prd",
        "kind": "review",
        "ticket": payload.get("ticket").cloned().unwrap_or(Value::Null),
        "slug": payload.get("slug").cloned().unwrap_or(Value::Null),
        "generated_at": payload.get("generated_at").cloned().unwrap_or(Value::Null),
        "status": payload.get("status").cloned().unwrap_or(Value::Null),
        "recommended_status": payload.get("recommended_status").cloned().unwrap_or(Value::Null),
        "source_path": source_path,
        "findings": pack_findings(findings, lim(&limits, "findings"), &["id", "severity", "title", "details"]),
        "action_items": take_limited(action_items, lim(&limits, "action_items")),
        "stats": {
            "findings": findings.len(),
            "action_items": action_items.len(),
        },
    })
}

/// Translate link-stats sidecar counters into warning strings.
pub fn link_stats_warnings(stats: &Value) -> Vec<String> {
    let count = |key: &str| stats.get(key).and_then(Value::as_u64).unwrap_or(0);
    let mut warnings = Vec::new();
    if stats.get("links_total").is_some() && count("links_total") == 0 {
        warnings.push("rlm_links_empty_warn".to_string());
    }
    if stats.get("links_truncated").and_then(Value::as_bool).unwrap_or(false) {
        warnings.push("rlm links truncated: max_links reached".to_string());
    }
    if count("target_files_trimmed") > 0 {
        warnings.push("rlm link targets trimmed: max_files reached".to_string());
    }
    if count("symbols_truncated") > 0 {
        warnings.push("rlm link symbols truncated: max_symbols_per_file reached".to_string());
    }
    if count("candidate_truncated") > 0 {
        warnings
            .push("rlm link candidates truncated: max_definition_hits_per_symbol reached".to_string());
    }
    if count("rg_timeouts") > 0 {
        warnings.push("rlm rg timeout during link search".to_string());
    }
    if count("rg_errors") > 0 {
        warnings.push("rlm rg errors during link search".to_string());
    }
    if stats.get("target_files_total").is_some() && count("target_files_total") == 0 {
        warnings.push("rlm link targets empty".to_string());
    }
    warnings
}

fn pack_rlm_nodes(nodes: &[&FileNode], limit: usize) -> Vec<Value> {
    nodes
        .iter()
        .take(limit)
        .map(|node| {
            json!({
                "file_id": node.node_id(),
                "path": node.path,
                "summary": node.summary,
                "framework_roles": node.framework_roles,
                "test_hooks": node.test_hooks,
                "risks": node.risks,
            })
        })
        .collect()
}

fn pack_rlm_links(links: &[&Link], limit: usize, root: Option<&Path>, snippet_chars: usize) -> Vec<Value> {
    links
        .iter()
        .take(limit)
        .map(|link| {
            let snippet = extract_evidence_snippet(root, &link.evidence_ref, snippet_chars);
            json!({
                "link_id": link.link_id,
                "src_file_id": link.src_file_id,
                "dst_file_id": link.dst_file_id,
                "type": link.link_type.as_str(),
                "evidence_ref": link.evidence_ref,
                "evidence_snippet": snippet,
            })
        })
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorklistSummary {
    pub status: Option<String>,
    pub entries: Option<usize>,
}

/// Read status and entry count from the worklist pack, if present.
pub fn load_worklist_summary(root: &Path, ticket: &str) -> WorklistSummary {
    let path = paths::worklist_pack_path(root, ticket);
    let Ok(raw) = fs::read_to_string(&path) else {
        return WorklistSummary::default();
    };
    let Ok(payload) = serde_json::from_str::<Value>(&raw) else {
        return WorklistSummary::default();
    };
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let entries = payload.get("entries").and_then(Value::as_array).map(Vec::len);
    WorklistSummary { status, entries }
}

fn load_json_value(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str::<Value>(&raw).ok()
}

fn keyword_hit_ids(root: &Path, ticket: &str) -> BTreeSet<String> {
    let mut hits = BTreeSet::new();
    let Some(targets) = load_json_value(&paths::targets_path(root, ticket)) else {
        return hits;
    };
    for raw in arr(&targets, "keyword_hits") {
        let path_text = str_of(raw).trim().to_string();
        if path_text.is_empty() {
            continue;
        }
        hits.insert(file_id_for_path(Path::new(&path_text)));
    }
    hits
}

fn ranked_by<'a, K: Ord>(
    mut nodes: Vec<&'a FileNode>,
    key: impl FnMut(&&'a FileNode) -> K,
) -> Vec<&'a FileNode> {
    nodes.sort_by_key(key);
    nodes
}

/// Assemble the rlm pack payload from node and link stores.
///
/// Ranking is by verified-link degree with a keyword-hit boost; ties
/// break on path, so the pack is stable across reruns.
pub fn build_rlm_pack(
    root: &Path,
    ticket: &str,
    slug_hint: Option<&str>,
    source_path: Option<&str>,
    nodes: &[NodeRecord],
    links: &[Link],
    settings: &RlmSettings,
) -> Value {
    let limits = RlmPackLimits::with_overrides(&settings.pack_budget.limits);
    let file_nodes: Vec<&FileNode> = nodes.iter().filter_map(NodeRecord::as_file).collect();

    let mut link_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for link in links {
        if link.unverified {
            continue;
        }
        if !link.src_file_id.is_empty() {
            *link_counts.entry(link.src_file_id.as_str()).or_insert(0) += 1;
        }
        if !link.dst_file_id.is_empty() {
            *link_counts.entry(link.dst_file_id.as_str()).or_insert(0) += 1;
        }
    }
    let keyword_hits = keyword_hit_ids(root, ticket);

    let rank_key = |node: &&FileNode| {
        let file_id = node.node_id();
        let boost = usize::from(!file_id.is_empty() && keyword_hits.contains(file_id));
        (
            Reverse(link_counts.get(file_id).copied().unwrap_or(0) + boost),
            node.path.clone(),
        )
    };

    let entry_roles = ["web", "controller", "job", "config", "infra"];
    let exclude_roles = ["model", "dto"];
    let integration_roles = ["service", "repo", "config", "infra"];
    let has_role = |node: &FileNode, roles: &[&str]| {
        node.framework_roles.iter().any(|role| roles.contains(&role.as_str()))
    };

    let entrypoints = ranked_by(
        file_nodes
            .iter()
            .copied()
            .filter(|n| has_role(n, &entry_roles) && !has_role(n, &exclude_roles))
            .collect(),
        rank_key,
    );
    let hotspots = ranked_by(file_nodes.clone(), rank_key);
    let integration_points = ranked_by(
        file_nodes
            .iter()
            .copied()
            .filter(|n| has_role(n, &integration_roles) && !has_role(n, &exclude_roles))
            .collect(),
        rank_key,
    );
    let test_hooks = ranked_by(
        file_nodes.iter().copied().filter(|n| !n.test_hooks.is_empty()).collect(),
        rank_key,
    );
    let risks = ranked_by(
        file_nodes.iter().copied().filter(|n| !n.risks.is_empty()).collect(),
        rank_key,
    );

    let mut recommended: Vec<&FileNode> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    'groups: for group in [&entrypoints, &hotspots, &integration_points] {
        for node in group {
            let file_id = node.node_id();
            if file_id.is_empty() || !seen.insert(file_id) {
                continue;
            }
            recommended.push(*node);
            if recommended.len() >= limits.recommended_reads {
                break 'groups;
            }
        }
    }

    let links_total = links.len();
    let verified: Vec<&Link> = links.iter().filter(|link| !link.unverified).collect();
    let links_unverified = links_total - verified.len();
    let links_sample = pack_rlm_links(
        &verified,
        limits.links,
        Some(root),
        limits.evidence_snippet_chars,
    );

    let link_stats = load_json_value(&paths::links_stats_path(root, ticket));
    let mut warnings = link_stats.as_ref().map(|s| link_stats_warnings(s)).unwrap_or_default();
    if let Some(ratio_limit) = settings.link_unverified_warn_ratio {
        if links_total > 0 {
            let ratio = links_unverified as f64 / links_total as f64;
            if ratio >= ratio_limit {
                warnings.push(format!(
                    "rlm unverified links ratio high: unverified={links_unverified} total={links_total} ratio={ratio:.2}"
                ));
            }
        }
    }

    let worklist = load_worklist_summary(root, ticket);
    let status = match (worklist.status.as_deref(), worklist.entries) {
        (Some("ready"), Some(0)) => "ready",
        (Some(_), _) => "pending",
        (None, _) => "ready",
    };

    let mut stats = Map::new();
    stats.insert("nodes".into(), json!(file_nodes.len()));
    stats.insert("nodes_total".into(), json!(file_nodes.len()));
    stats.insert("links".into(), json!(links_total));
    stats.insert("links_unverified".into(), json!(links_unverified));
    stats.insert("links_included".into(), json!(links_sample.len()));
    if let Some(sidecar) = &link_stats {
        let count = |key: &str| sidecar.get(key).and_then(Value::as_u64).unwrap_or(0);
        stats.insert(
            "link_search".into(),
            json!({
                "links_truncated": sidecar.get("links_truncated").and_then(Value::as_bool).unwrap_or(false),
                "symbols_total": count("symbols_total"),
                "symbols_scanned": count("symbols_scanned"),
                "symbols_truncated": count("symbols_truncated"),
                "candidate_truncated": count("candidate_truncated"),
                "rg_calls": count("rg_calls"),
                "rg_timeouts": count("rg_timeouts"),
                "rg_errors": count("rg_errors"),
            }),
        );
    }
    if let Some(worklist_status) = &worklist.status {
        stats.insert("worklist_status".into(), json!(worklist_status));
    }
    if let Some(entries) = worklist.entries {
        stats.insert("worklist_entries".into(), json!(entries));
        if entries > 0 {
            warnings.push(format!("rlm worklist pending: entries={entries}"));
            let threshold = ((entries as f64 * 0.5) as usize).max(1);
            if file_nodes.len() < threshold {
                warnings.push(format!(
                    "rlm pack partial: nodes_total={} worklist_entries={entries}",
                    file_nodes.len()
                ));
            }
        }
    }

    let mut pack = Map::new();
    pack.insert("schema".into(), json!(PACK_SCHEMA));
    pack.insert("pack_version".into(), json!(PACK_VERSION));
    pack.insert("type".into(), json!("rlm"));
    pack.insert("kind".into(), json!("pack"));
    pack.insert("ticket".into(), json!(ticket));
    pack.insert("slug".into(), json!(slug_hint.unwrap_or(ticket)));
    pack.insert("slug_hint".into(), json!(slug_hint));
    pack.insert("generated_at".into(), json!(now_utc_stamp()));
    pack.insert("status".into(), json!(status));
    pack.insert("source_path".into(), json!(source_path));
    pack.insert("stats".into(), Value::Object(stats));
    pack.insert("entrypoints".into(), json!(pack_rlm_nodes(&entrypoints, limits.entrypoints)));
    pack.insert("hotspots".into(), json!(pack_rlm_nodes(&hotspots, limits.hotspots)));
    pack.insert(
        "integration_points".into(),
        json!(pack_rlm_nodes(&integration_points, limits.integration_points)),
    );
    pack.insert("test_hooks".into(), json!(pack_rlm_nodes(&test_hooks, limits.test_hooks)));
    pack.insert("risks".into(), json!(pack_rlm_nodes(&risks, limits.risks)));
    pack.insert(
        "recommended_reads".into(),
        json!(pack_rlm_nodes(&recommended, limits.recommended_reads)),
    );
    pack.insert("links".into(), Value::Array(links_sample));
    if !warnings.is_empty() {
        pack.insert("warnings".into(), json!(warnings));
    }
    Value::Object(pack)
}

/// Load stores, assemble the rlm pack, trim it to budget, and write it
/// atomically. Lenient budgets log and ship best-effort text; `enforce`
/// turns residual violations into an error.
pub fn write_rlm_pack(
    root: &Path,
    ticket: &str,
    slug_hint: Option<&str>,
    output: Option<&Path>,
    settings: &RlmSettings,
) -> Result<PathBuf> {
    let nodes_path = paths::nodes_path(root, ticket);
    if !nodes_path.is_file() {
        return Err(PackError::MissingArtifact { path: nodes_path });
    }
    let nodes: Vec<NodeRecord> = read_jsonl(&nodes_path);
    let links: Vec<Link> = read_jsonl(&paths::links_path(root, ticket));

    let source_path = paths::rel_path(&nodes_path, root);
    let mut pack = build_rlm_pack(
        root,
        ticket,
        slug_hint,
        Some(&source_path),
        &nodes,
        &links,
        settings,
    );

    let budget = &settings.pack_budget;
    let max_chars = budget.max_chars.unwrap_or(RLM_MAX_CHARS);
    let max_lines = budget.max_lines.unwrap_or(RLM_MAX_LINES);
    let outcome = auto_trim_rlm_pack(
        &mut pack,
        max_chars,
        max_lines,
        budget.enforce,
        &budget.trim_priority,
    );
    if !outcome.trimmed.is_empty() {
        log::warn!("rlm pack trimmed: {}", outcome.trimmed.join(", "));
    }
    for error in &outcome.errors {
        log::warn!("pack budget: {error}");
    }
    if !outcome.errors.is_empty() && budget.enforce {
        return Err(PackError::BudgetExceeded {
            errors: outcome.errors,
        });
    }

    let pack_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths::rlm_pack_path(root, ticket));
    write_text_atomic(&pack_path, &outcome.text)?;
    Ok(pack_path)
}
