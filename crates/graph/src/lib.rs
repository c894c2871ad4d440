//! # RLM Graph
//!
//! Code-graph extraction stages: manifest building, worklist diffing,
//! node verification, cross-file link resolution, and directory rollups.
//!
//! ## Pipeline
//!
//! ```text
//! targets.json
//!     │
//!     ├──> Manifest Builder (hash + language-tag each target file)
//!     │
//!     ├──> Worklist Differ (missing / outdated / failed vs. node store)
//!     │      └─ optional path/keyword scope, persisted for reruns
//!     │
//!     ├──> Node Verifier (declared symbols vs. actual source text)
//!     │
//!     ├──> Link Builder (symbol index + external search fallback)
//!     │      └─ evidence-backed, deduplicated, size-bounded link set
//!     │
//!     └──> Dir-Node Summarizer (pure rollup of file nodes)
//! ```
//!
//! External text search is abstracted behind [`DefinitionSearch`] so the
//! link builder and scope narrowing never shell out directly; production
//! wiring uses [`RgSearch`], tests use in-memory doubles.

mod dir_nodes;
mod error;
mod links;
mod manifest;
mod search;
mod util;
mod verify;
mod worklist;

pub use dir_nodes::build_dir_nodes;
pub use error::{GraphError, Result};
pub use links::{
    build_links, select_target_files, LinkOutcome, LinkPolicy, LinkStats, TargetSelection,
};
pub use manifest::build_manifest;
pub use search::{DefinitionSearch, RgSearch, SearchFailure, SearchHit};
pub use util::{now_utc_stamp, ScopeFilter};
pub use verify::verify_nodes;
pub use worklist::{
    bootstrap_nodes, build_worklist_pack, BootstrapOutcome, ScopeCounts, WorklistPack,
    WorklistScope, WorklistStats, BOOTSTRAP_SUMMARY_PREFIX,
};
