//! # RLM Config
//!
//! Settings resolution and identity primitives for the RLM pipeline.
//!
//! ## Features
//!
//! - **Settings resolver** - named tunables with documented defaults,
//!   unknown keys ignored at the boundary
//! - **Identity hashing** - path-derived file ids and content revisions
//! - **Language detection** - extension-based tagging for manifest entries

mod ident;
mod settings;

pub use ident::{
    detect_lang, file_id_for_path, is_type_symbol, normalize_path, rev_sha_for_bytes, symbol_tail,
    DEFAULT_IGNORE_DIRS,
};
pub use settings::{
    FallbackMode, PackBudget, RgVerifyMode, RlmSettings, SliceBudget, SymbolSource, TypeRefsMode,
    TypeRefsPriority, DEFAULT_PROMPT_VERSION, DEFAULT_SEARCH_BATCH_SIZE,
    DEFAULT_TYPE_REFS_EXCLUDES,
};
