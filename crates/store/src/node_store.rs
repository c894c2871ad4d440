use crate::jsonl::{read_jsonl, write_jsonl};
use crate::types::{FileNode, Link, NodeRecord};
use crate::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Owned view over one `nodes.jsonl` store: load, merge by id, compact, save.
///
/// Nodes are superseded rather than deleted; compaction keeps the last record
/// seen for each id, which matches append-order semantics on disk.
#[derive(Debug, Default)]
pub struct NodeStore {
    path: Option<PathBuf>,
    nodes: Vec<NodeRecord>,
}

impl NodeStore {
    pub fn load(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            nodes: read_jsonl(path),
        }
    }

    pub fn from_nodes(nodes: Vec<NodeRecord>) -> Self {
        Self { path: None, nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [NodeRecord] {
        &mut self.nodes
    }

    pub fn file_nodes(&self) -> impl Iterator<Item = &FileNode> {
        self.nodes.iter().filter_map(NodeRecord::as_file)
    }

    /// file_id -> path lookup for link sorting and slice rendering.
    pub fn paths_by_id(&self) -> BTreeMap<String, String> {
        self.file_nodes()
            .filter(|node| !node.node_id().is_empty())
            .map(|node| (node.node_id().to_string(), node.path.clone()))
            .collect()
    }

    pub fn file_node_by_id(&self, file_id: &str) -> Option<&FileNode> {
        self.file_nodes().find(|node| node.node_id() == file_id)
    }

    /// Append records; duplicates are resolved at the next `compact`.
    pub fn merge(&mut self, records: Vec<NodeRecord>) {
        self.nodes.extend(records);
    }

    /// Deduplicate by id (last record wins) and normalize ordering to
    /// (node_kind, path, id). Records without an id are dropped.
    pub fn compact(&mut self) {
        let mut dedup: BTreeMap<String, NodeRecord> = BTreeMap::new();
        for node in self.nodes.drain(..) {
            let id = node.node_id().to_string();
            if id.is_empty() {
                continue;
            }
            dedup.insert(id, node);
        }
        let mut nodes: Vec<NodeRecord> = dedup.into_values().collect();
        nodes.sort_by(|a, b| {
            (a.kind(), a.path(), a.node_id()).cmp(&(b.kind(), b.path(), b.node_id()))
        });
        self.nodes = nodes;
    }

    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| crate::StoreError::InvalidPath("node store has no path".into()))?;
        write_jsonl(path, &self.nodes)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        write_jsonl(path, &self.nodes)
    }
}

/// Deduplicate links by id and sort by (src, type, dst, match_hash).
pub fn compact_links(links: Vec<Link>) -> Vec<Link> {
    let mut dedup: BTreeMap<String, Link> = BTreeMap::new();
    for link in links {
        if link.link_id.is_empty() {
            continue;
        }
        dedup.insert(link.link_id.clone(), link);
    }
    let mut links: Vec<Link> = dedup.into_values().collect();
    links.sort_by(|a, b| {
        (
            &a.src_file_id,
            a.link_type,
            &a.dst_file_id,
            &a.evidence_ref.match_hash,
        )
            .cmp(&(
                &b.src_file_id,
                b.link_type,
                &b.dst_file_id,
                &b.evidence_ref.match_hash,
            ))
    });
    links
}
