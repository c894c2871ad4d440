//! # RLM Store
//!
//! Flat-file data model for the RLM code graph: file/dir nodes, links,
//! manifests, and the append-and-compact JSONL stores that own them.
//!
//! Stores are line-oriented and multi-producer: unparsable lines are
//! skipped on read, and every rewrite goes through a temp file + rename
//! so a crash mid-write cannot corrupt the prior artifact.

mod error;
mod jsonl;
mod node_store;
mod types;

pub use error::{Result, StoreError};
pub use jsonl::{read_jsonl, write_json_pretty, write_jsonl, write_text_atomic};
pub use node_store::{compact_links, NodeStore};
pub use types::{
    DirNode, EvidenceRef, Extractor, FileNode, FileRecord, Link, LinkType, Manifest, ManifestStats,
    NodeRecord, TargetsDoc, Verification, WorklistEntry, WorklistReason, LINK_SCHEMA,
    LINK_SCHEMA_VERSION, LINK_STATS_SCHEMA, MANIFEST_SCHEMA, NODE_SCHEMA, NODE_SCHEMA_VERSION,
    PACK_SCHEMA, PACK_VERSION,
};
