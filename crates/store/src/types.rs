use serde::{Deserialize, Serialize};

pub const NODE_SCHEMA: &str = "aidd.rlm_node.v2";
pub const NODE_SCHEMA_VERSION: &str = "v2";
pub const LINK_SCHEMA: &str = "aidd.rlm_link.v1";
pub const LINK_SCHEMA_VERSION: &str = "v1";
pub const MANIFEST_SCHEMA: &str = "aidd.rlm_manifest.v1";
pub const LINK_STATS_SCHEMA: &str = "aidd.rlm_links_stats.v1";
pub const PACK_SCHEMA: &str = "aidd.report.pack.v1";
pub const PACK_VERSION: &str = "v1";

/// One hashed, language-tagged manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub path: String,
    pub rev_sha: String,
    pub lang: String,
    pub size: u64,
    #[serde(default)]
    pub prompt_version: String,
}

/// Self-consistency status of a file node, assigned by the verifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    #[default]
    Unverified,
    Passed,
    Partial,
    Failed,
}

/// Annotated description of one file's public surface.
///
/// Created by the external annotation step (or bootstrap); only the
/// verifier mutates `verification`/`missing_tokens` afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub rev_sha: String,
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub prompt_version: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub public_symbols: Vec<String>,
    #[serde(default)]
    pub type_refs: Vec<String>,
    #[serde(default)]
    pub key_calls: Vec<String>,
    #[serde(default)]
    pub framework_roles: Vec<String>,
    #[serde(default)]
    pub test_hooks: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub verification: Verification,
    #[serde(default)]
    pub missing_tokens: Vec<String>,
}

impl FileNode {
    /// Canonical id, tolerating records that carry only one of the id fields.
    pub fn node_id(&self) -> &str {
        if !self.id.is_empty() {
            &self.id
        } else {
            &self.file_id
        }
    }
}

/// Directory rollup derived wholesale from file nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirNode {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub dir_id: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub children_file_ids: Vec<String>,
    #[serde(default)]
    pub children_count_total: usize,
    #[serde(default)]
    pub summary: String,
}

/// One line of the node store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_kind", rename_all = "snake_case")]
pub enum NodeRecord {
    File(FileNode),
    Dir(DirNode),
}

impl NodeRecord {
    pub fn node_id(&self) -> &str {
        match self {
            NodeRecord::File(node) => node.node_id(),
            NodeRecord::Dir(node) => {
                if !node.id.is_empty() {
                    &node.id
                } else {
                    &node.dir_id
                }
            }
        }
    }

    pub fn path(&self) -> &str {
        match self {
            NodeRecord::File(node) => &node.path,
            NodeRecord::Dir(node) => &node.path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeRecord::File(_) => "file",
            NodeRecord::Dir(_) => "dir",
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            NodeRecord::File(node) => Some(node),
            NodeRecord::Dir(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileNode> {
        match self {
            NodeRecord::File(node) => Some(node),
            NodeRecord::Dir(_) => None,
        }
    }
}

/// Why a manifest entry landed on the worklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorklistReason {
    Missing,
    Outdated,
    Failed,
}

impl WorklistReason {
    pub fn as_str(self) -> &'static str {
        match self {
            WorklistReason::Missing => "missing",
            WorklistReason::Outdated => "outdated",
            WorklistReason::Failed => "failed",
        }
    }
}

/// Ephemeral (re)annotation request; regenerated each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorklistEntry {
    pub file_id: String,
    pub path: String,
    pub rev_sha: String,
    pub lang: String,
    pub prompt_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub reason: WorklistReason,
}

/// Directed link classification derived from the matched line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Imports,
    Extends,
    Implements,
    Calls,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Imports => "imports",
            LinkType::Extends => "extends",
            LinkType::Implements => "implements",
            LinkType::Calls => "calls",
        }
    }
}

/// How the evidence line was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extractor {
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "external-search")]
    ExternalSearch,
}

/// Pointer justifying a recorded link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub extractor: Extractor,
    pub match_hash: String,
}

/// Directed, evidence-backed reference between two file nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub schema: String,
    pub schema_version: String,
    pub link_id: String,
    pub src_file_id: String,
    pub dst_file_id: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub evidence_ref: EvidenceRef,
    pub unverified: bool,
}

/// Target discovery document consumed by the manifest and link stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsDoc {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub ticket: String,
    #[serde(default)]
    pub slug_hint: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub paths_discovered: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub keyword_hits: Vec<String>,
    #[serde(default)]
    pub paths_base: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStats {
    pub files_total: usize,
}

/// Hashed, language-tagged snapshot of the target file list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: String,
    pub ticket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug_hint: Option<String>,
    pub generated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets_path: Option<String>,
    pub files: Vec<FileRecord>,
    pub stats: ManifestStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn node_record_round_trips_with_kind_tag() {
        let node = NodeRecord::File(FileNode {
            schema: NODE_SCHEMA.into(),
            schema_version: NODE_SCHEMA_VERSION.into(),
            id: "abc".into(),
            file_id: "abc".into(),
            path: "src/main.rs".into(),
            ..FileNode::default()
        });
        let raw = serde_json::to_string(&node).unwrap();
        assert!(raw.contains("\"node_kind\":\"file\""));
        let parsed: NodeRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn partial_node_lines_parse_with_defaults() {
        let raw = r#"{"node_kind":"file","file_id":"f1","path":"a.rs"}"#;
        let parsed: NodeRecord = serde_json::from_str(raw).unwrap();
        let file = parsed.as_file().unwrap();
        assert_eq!(file.node_id(), "f1");
        assert_eq!(file.verification, Verification::Unverified);
        assert!(file.public_symbols.is_empty());
    }

    #[test]
    fn extractor_uses_external_search_label() {
        let raw = serde_json::to_string(&Extractor::ExternalSearch).unwrap();
        assert_eq!(raw, "\"external-search\"");
    }
}
