use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use rlm_config::{normalize_path, RlmSettings};
use rlm_store::{
    FileNode, Manifest, NodeRecord, NodeStore, Verification, WorklistEntry, WorklistReason,
    NODE_SCHEMA, NODE_SCHEMA_VERSION, PACK_SCHEMA, PACK_VERSION,
};

use crate::search::DefinitionSearch;
use crate::util::{now_utc_stamp, ScopeFilter};

pub const BOOTSTRAP_SUMMARY_PREFIX: &str = "Auto bootstrap node for";

/// Persisted narrowing applied to the manifest before diffing. Stored in
/// the emitted pack so refresh runs reuse it without re-specifying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorklistScope {
    pub paths: Vec<String>,
    pub keywords: Vec<String>,
    pub counts: ScopeCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeCounts {
    pub manifest_total: usize,
    pub paths_matched: usize,
    pub keyword_matches: usize,
    pub entries_selected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorklistStats {
    pub total: usize,
    pub entries_total: usize,
    pub entries_trimmed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_reason: Option<String>,
    pub missing: usize,
    pub outdated: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorklistLinks {
    pub manifest: String,
    pub nodes: String,
}

/// The `rlm-worklist` pack document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorklistPack {
    pub schema: String,
    pub pack_version: String,
    #[serde(rename = "type")]
    pub pack_type: String,
    pub kind: String,
    pub ticket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug_hint: Option<String>,
    pub generated_at: String,
    pub status: String,
    pub links: WorklistLinks,
    pub stats: WorklistStats,
    pub entries: Vec<WorklistEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worklist_scope: Option<WorklistScope>,
}

/// Diff the manifest against the node store and emit the worklist pack.
///
/// `scope_override` (explicit CLI scope or the persisted scope of a
/// previous run) takes precedence over the settings-level scope.
#[allow(clippy::too_many_arguments)]
pub fn build_worklist_pack(
    base_root: &Path,
    ticket: &str,
    manifest: &Manifest,
    store: &NodeStore,
    settings: &RlmSettings,
    scope_override: Option<ScopeFilter>,
    search: &dyn DefinitionSearch,
    manifest_rel: &str,
    nodes_rel: &str,
) -> WorklistPack {
    let scope = scope_override.unwrap_or_else(|| {
        ScopeFilter::new(settings.worklist_paths.clone(), settings.worklist_keywords.clone())
    });
    let (entries, worklist_scope) =
        filter_manifest_entries(base_root, manifest, &scope, settings, search);

    let (mut worklist, mut stats) = diff_entries(&entries, store);
    stats.entries_total = worklist.len();
    if settings.worklist_max_entries > 0 && worklist.len() > settings.worklist_max_entries {
        stats.entries_trimmed = worklist.len() - settings.worklist_max_entries;
        stats.trim_reason = Some("max_entries".to_string());
        worklist.truncate(settings.worklist_max_entries);
    }
    stats.total = worklist.len();

    let status = if worklist.is_empty() { "ready" } else { "pending" };
    log::info!(
        "worklist for {ticket}: {} entries ({} missing, {} outdated, {} failed), status {status}",
        stats.total,
        stats.missing,
        stats.outdated,
        stats.failed
    );

    WorklistPack {
        schema: PACK_SCHEMA.to_string(),
        pack_version: PACK_VERSION.to_string(),
        pack_type: "rlm-worklist".to_string(),
        kind: "pack".to_string(),
        ticket: ticket.to_string(),
        slug_hint: manifest.slug_hint.clone(),
        generated_at: now_utc_stamp(),
        status: status.to_string(),
        links: WorklistLinks {
            manifest: manifest_rel.to_string(),
            nodes: nodes_rel.to_string(),
        },
        stats,
        entries: worklist,
        worklist_scope,
    }
}

fn filter_manifest_entries<'a>(
    base_root: &Path,
    manifest: &'a Manifest,
    scope: &ScopeFilter,
    settings: &RlmSettings,
    search: &dyn DefinitionSearch,
) -> (Vec<&'a rlm_store::FileRecord>, Option<WorklistScope>) {
    let all: Vec<&rlm_store::FileRecord> = manifest.files.iter().collect();
    if scope.is_empty() {
        return (all, None);
    }

    let path_filtered: Vec<&rlm_store::FileRecord> = all
        .iter()
        .filter(|record| !record.path.trim().is_empty() && scope.matches_path(&record.path))
        .copied()
        .collect();
    let path_filtered_paths: BTreeSet<String> = path_filtered
        .iter()
        .map(|record| normalize_path(Path::new(&record.path)))
        .collect();

    let mut selected = path_filtered;
    let mut keyword_matches = 0usize;
    if !scope.keywords.is_empty() {
        let roots = scope.keyword_roots(base_root);
        let hits = if roots.is_empty() {
            BTreeSet::new()
        } else {
            search.files_with_matches(
                base_root,
                &scope.keywords,
                &roots,
                &settings.ignore_dirs,
                base_root,
            )
        };
        let hits: BTreeSet<String> = hits
            .into_iter()
            .filter(|path| path_filtered_paths.contains(path))
            .collect();
        keyword_matches = hits.len();
        selected.retain(|record| hits.contains(&normalize_path(Path::new(&record.path))));
    }

    let counts = ScopeCounts {
        manifest_total: all.len(),
        paths_matched: if scope.paths.is_empty() {
            all.len()
        } else {
            path_filtered_paths.len()
        },
        keyword_matches,
        entries_selected: selected.len(),
    };
    let worklist_scope = WorklistScope {
        paths: scope.paths.clone(),
        keywords: scope.keywords.clone(),
        counts,
    };
    (selected, Some(worklist_scope))
}

fn diff_entries(
    entries: &[&rlm_store::FileRecord],
    store: &NodeStore,
) -> (Vec<WorklistEntry>, WorklistStats) {
    let mut existing: BTreeMap<&str, Vec<&FileNode>> = BTreeMap::new();
    for node in store.file_nodes() {
        let id = node.node_id();
        if !id.is_empty() {
            existing.entry(id).or_default().push(node);
        }
    }

    let mut worklist: Vec<WorklistEntry> = Vec::new();
    let mut stats = WorklistStats::default();
    for record in entries {
        if record.file_id.trim().is_empty() {
            continue;
        }
        let nodes_for_id = existing.get(record.file_id.as_str());
        let reason = match nodes_for_id {
            None => Some(WorklistReason::Missing),
            Some(nodes) => {
                let matching: Vec<&&FileNode> = nodes
                    .iter()
                    .filter(|node| {
                        node.rev_sha.trim() == record.rev_sha.trim()
                            && node.prompt_version.trim() == record.prompt_version.trim()
                    })
                    .collect();
                if matching.is_empty() {
                    Some(WorklistReason::Outdated)
                } else if matching
                    .iter()
                    .all(|node| node.verification == Verification::Failed)
                {
                    Some(WorklistReason::Failed)
                } else {
                    None
                }
            }
        };
        let Some(reason) = reason else {
            continue;
        };
        match reason {
            WorklistReason::Missing => stats.missing += 1,
            WorklistReason::Outdated => stats.outdated += 1,
            WorklistReason::Failed => stats.failed += 1,
        }
        worklist.push(WorklistEntry {
            file_id: record.file_id.clone(),
            path: record.path.clone(),
            rev_sha: record.rev_sha.clone(),
            lang: record.lang.clone(),
            prompt_version: record.prompt_version.clone(),
            size: Some(record.size),
            reason,
        });
    }
    worklist.sort_by(|a, b| (&a.path, &a.file_id).cmp(&(&b.path, &b.file_id)));
    (worklist, stats)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub added: usize,
    pub total: usize,
}

/// Build placeholder file nodes for every manifest entry and merge them
/// with the existing store contents. Existing records win unless `force`
/// discards them first.
pub fn bootstrap_nodes(
    manifest: &Manifest,
    existing: Vec<NodeRecord>,
    force: bool,
) -> (Vec<NodeRecord>, BootstrapOutcome) {
    let existing = if force { Vec::new() } else { existing };
    let existing_ids: BTreeSet<String> = existing
        .iter()
        .map(|node| node.node_id().to_string())
        .filter(|id| !id.is_empty())
        .collect();

    let mut fresh: Vec<NodeRecord> = Vec::new();
    for record in &manifest.files {
        if record.file_id.trim().is_empty() || record.path.trim().is_empty() {
            continue;
        }
        fresh.push(NodeRecord::File(FileNode {
            schema: NODE_SCHEMA.to_string(),
            schema_version: NODE_SCHEMA_VERSION.to_string(),
            id: record.file_id.clone(),
            file_id: record.file_id.clone(),
            path: record.path.clone(),
            rev_sha: record.rev_sha.clone(),
            lang: record.lang.clone(),
            prompt_version: record.prompt_version.clone(),
            summary: format!("{BOOTSTRAP_SUMMARY_PREFIX} {}.", record.path),
            ..FileNode::default()
        }));
    }
    let added = fresh
        .iter()
        .filter(|node| !existing_ids.contains(node.node_id()))
        .count();

    // Fresh first so a later duplicate (the existing record) wins in compact.
    let mut merged = fresh;
    merged.extend(existing);
    let mut store = NodeStore::from_nodes(merged);
    store.compact();
    let total = store.len();
    (store.nodes().to_vec(), BootstrapOutcome { added, total })
}
