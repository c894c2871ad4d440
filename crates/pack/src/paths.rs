//! Canonical artifact locations under a repository root.
//!
//! Research artifacts live in `reports/research/`, slice packs in
//! `reports/context/`. Every stage derives its inputs and outputs from
//! these helpers so the ticket naming convention lives in one place.

use std::path::{Path, PathBuf};

pub fn research_dir(root: &Path) -> PathBuf {
    root.join("reports").join("research")
}

pub fn context_dir(root: &Path) -> PathBuf {
    root.join("reports").join("context")
}

pub fn targets_path(root: &Path, ticket: &str) -> PathBuf {
    research_dir(root).join(format!("{ticket}-rlm-targets.json"))
}

pub fn manifest_path(root: &Path, ticket: &str) -> PathBuf {
    research_dir(root).join(format!("{ticket}-rlm-manifest.json"))
}

pub fn nodes_path(root: &Path, ticket: &str) -> PathBuf {
    research_dir(root).join(format!("{ticket}-rlm.nodes.jsonl"))
}

pub fn links_path(root: &Path, ticket: &str) -> PathBuf {
    research_dir(root).join(format!("{ticket}-rlm.links.jsonl"))
}

pub fn links_stats_path(root: &Path, ticket: &str) -> PathBuf {
    research_dir(root).join(format!("{ticket}-rlm.links.stats.json"))
}

pub fn worklist_pack_path(root: &Path, ticket: &str) -> PathBuf {
    research_dir(root).join(format!("{ticket}-rlm.worklist.pack.json"))
}

pub fn rlm_pack_path(root: &Path, ticket: &str) -> PathBuf {
    research_dir(root).join(format!("{ticket}-rlm.pack.json"))
}

pub fn slice_path(root: &Path, ticket: &str, key: &str) -> PathBuf {
    context_dir(root).join(format!("{ticket}-rlm-slice-{key}.pack.json"))
}

pub fn slice_latest_path(root: &Path, ticket: &str) -> PathBuf {
    context_dir(root).join(format!("{ticket}-rlm-slice.latest.pack.json"))
}

/// Root-relative display form of a path, forward slashes throughout.
pub fn rel_path(path: &Path, root: &Path) -> String {
    let stripped = path.strip_prefix(root).unwrap_or(path);
    stripped.to_string_lossy().replace('\\', "/")
}
