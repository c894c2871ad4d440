//! # RLM Pack
//!
//! Turns node/link stores into size-bounded report packs: the main `rlm`
//! pack (ranked node tables + sampled link evidence), generic
//! research/qa/prd report sidecars, and ad-hoc query slices.
//!
//! Serialization is canonical (sorted keys, two-space indent, trailing
//! newline) and empty fields are dropped, so byte-identical inputs yield
//! byte-identical packs. The budget trimmer degrades payloads through a
//! deterministic step list instead of failing outright; only `enforce`
//! mode turns a blown budget into an error.

mod assemble;
mod budget;
mod error;
pub mod paths;
mod slice;

pub use assemble::{
    build_prd_pack, build_qa_pack, build_research_pack, build_rlm_pack, extract_evidence_snippet,
    link_stats_warnings, load_worklist_summary, write_rlm_pack, RlmPackLimits, WorklistSummary,
};
pub use budget::{
    auto_trim_research_pack, auto_trim_rlm_pack, check_budget, serialize_pack, TrimOutcome,
    RESEARCH_MAX_CHARS, RESEARCH_MAX_LINES, RLM_MAX_CHARS, RLM_MAX_LINES,
};
pub use error::{PackError, Result};
pub use slice::{write_slice_pack, SliceOutcome, SliceRequest};
