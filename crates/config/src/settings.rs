use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::ident::DEFAULT_IGNORE_DIRS;

pub const DEFAULT_PROMPT_VERSION: &str = "v1";
pub const DEFAULT_SEARCH_BATCH_SIZE: usize = 24;
pub const DEFAULT_TYPE_REFS_EXCLUDES: &[&str] = &["java.", "jakarta.", "org.springframework."];

const DEFAULT_DIR_CHILDREN_LIMIT: usize = 50;
const DEFAULT_DIR_SUMMARY_CHARS: usize = 600;
const DEFAULT_SLICE_MAX_NODES: usize = 20;
const DEFAULT_SLICE_MAX_LINKS: usize = 40;

/// Which node field seeds the link builder's scan-symbol set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolSource {
    KeyCalls,
    PublicSymbols,
    Both,
}

impl SymbolSource {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolSource::KeyCalls => "key_calls",
            SymbolSource::PublicSymbols => "public_symbols",
            SymbolSource::Both => "both",
        }
    }
}

/// Filter applied to public-symbol fallback when `key_calls` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    TypesOnly,
    All,
}

/// How `type_refs` participate in the scan-symbol set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRefsMode {
    Off,
    Additive,
    Only,
}

/// Whether type refs displace the public-symbol fallback or queue after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRefsPriority {
    Prefer,
    Fallback,
}

/// Whether search-derived links may be promoted to verified via the node store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RgVerifyMode {
    Auto,
    Never,
}

/// Hard size budget for pack serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackBudget {
    pub max_chars: Option<usize>,
    pub max_lines: Option<usize>,
    pub enforce: bool,
    pub trim_priority: Vec<String>,
    /// Extra numeric keys override per-field top-N limits in the assembler.
    pub limits: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceBudget {
    pub max_nodes: usize,
    pub max_links: usize,
}

impl Default for SliceBudget {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_SLICE_MAX_NODES,
            max_links: DEFAULT_SLICE_MAX_LINKS,
        }
    }
}

/// Named tunables consumed by the pipeline. Unknown keys in the source
/// document are ignored; invalid values fall back per key.
#[derive(Debug, Clone, PartialEq)]
pub struct RlmSettings {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub max_links: usize,
    pub max_symbols_per_file: usize,
    pub max_definition_hits_per_symbol: usize,
    pub search_timeout_s: u64,
    pub search_batch_size: usize,
    pub link_key_calls_source: SymbolSource,
    pub link_fallback_mode: FallbackMode,
    pub link_type_refs_mode: TypeRefsMode,
    pub link_type_refs_priority: TypeRefsPriority,
    pub link_rg_verify: RgVerifyMode,
    pub link_target_threshold: usize,
    pub link_unverified_warn_ratio: Option<f64>,
    pub type_refs_include_prefixes: Vec<String>,
    pub type_refs_exclude_prefixes: Vec<String>,
    pub prompt_version: String,
    pub ignore_dirs: BTreeSet<String>,
    pub worklist_paths: Vec<String>,
    pub worklist_keywords: Vec<String>,
    pub worklist_max_entries: usize,
    pub dir_children_limit: usize,
    pub dir_summary_max_chars: usize,
    pub pack_budget: PackBudget,
    pub slice_budget: SliceBudget,
}

impl Default for RlmSettings {
    fn default() -> Self {
        Self {
            max_files: 0,
            max_file_bytes: 0,
            max_links: 0,
            max_symbols_per_file: 0,
            max_definition_hits_per_symbol: 0,
            search_timeout_s: 0,
            search_batch_size: DEFAULT_SEARCH_BATCH_SIZE,
            link_key_calls_source: SymbolSource::KeyCalls,
            link_fallback_mode: FallbackMode::TypesOnly,
            link_type_refs_mode: TypeRefsMode::Additive,
            link_type_refs_priority: TypeRefsPriority::Prefer,
            link_rg_verify: RgVerifyMode::Auto,
            link_target_threshold: 0,
            link_unverified_warn_ratio: None,
            type_refs_include_prefixes: Vec::new(),
            type_refs_exclude_prefixes: DEFAULT_TYPE_REFS_EXCLUDES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            prompt_version: DEFAULT_PROMPT_VERSION.to_string(),
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect(),
            worklist_paths: Vec::new(),
            worklist_keywords: Vec::new(),
            worklist_max_entries: 0,
            dir_children_limit: DEFAULT_DIR_CHILDREN_LIMIT,
            dir_summary_max_chars: DEFAULT_DIR_SUMMARY_CHARS,
            pack_budget: PackBudget::default(),
            slice_budget: SliceBudget::default(),
        }
    }
}

impl RlmSettings {
    /// Read settings from `config/conventions.json` under the given root,
    /// looking at the `rlm` section (or `researcher.rlm`). Missing file or
    /// section yields defaults.
    pub fn load(root: &Path) -> Self {
        let path = root.join("config").join("conventions.json");
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        let Ok(doc) = serde_json::from_str::<Value>(&raw) else {
            log::debug!("unparsable conventions file at {}", path.display());
            return Self::default();
        };
        let section = doc
            .get("rlm")
            .or_else(|| doc.get("researcher").and_then(|r| r.get("rlm")))
            .cloned()
            .unwrap_or(Value::Null);
        Self::from_value(&section)
    }

    /// Resolve settings from a loose JSON map. Every key is optional.
    pub fn from_value(value: &Value) -> Self {
        let mut settings = Self::default();
        let Some(map) = value.as_object() else {
            return settings;
        };

        if let Some(v) = usize_key(map, "max_files") {
            settings.max_files = v;
        }
        if let Some(v) = u64_key(map, "max_file_bytes") {
            settings.max_file_bytes = v;
        }
        if let Some(v) = usize_key(map, "max_links") {
            settings.max_links = v;
        }
        if let Some(v) = usize_key(map, "max_symbols_per_file") {
            settings.max_symbols_per_file = v;
        }
        if let Some(v) = usize_key(map, "max_definition_hits_per_symbol") {
            settings.max_definition_hits_per_symbol = v;
        }
        if let Some(v) = u64_key(map, "search_timeout_s") {
            settings.search_timeout_s = v;
        }
        if let Some(v) = usize_key(map, "search_batch_size") {
            if v > 0 {
                settings.search_batch_size = v;
            }
        }
        if let Some(v) = usize_key(map, "link_target_threshold") {
            settings.link_target_threshold = v;
        }
        if let Some(v) = map.get("link_unverified_warn_ratio").and_then(Value::as_f64) {
            if v > 0.0 && v <= 1.0 {
                settings.link_unverified_warn_ratio = Some(v);
            }
        }

        settings.link_key_calls_source = enum_key(map, "link_key_calls_source", |raw| match raw {
            "key_calls" => Some(SymbolSource::KeyCalls),
            "public_symbols" => Some(SymbolSource::PublicSymbols),
            "both" => Some(SymbolSource::Both),
            _ => None,
        })
        .unwrap_or(settings.link_key_calls_source);
        settings.link_fallback_mode = enum_key(map, "link_fallback_mode", |raw| match raw {
            "types_only" => Some(FallbackMode::TypesOnly),
            "all" => Some(FallbackMode::All),
            _ => None,
        })
        .unwrap_or(settings.link_fallback_mode);
        settings.link_type_refs_mode = enum_key(map, "link_type_refs_mode", |raw| match raw {
            "off" => Some(TypeRefsMode::Off),
            "additive" => Some(TypeRefsMode::Additive),
            "only" => Some(TypeRefsMode::Only),
            _ => None,
        })
        .unwrap_or(settings.link_type_refs_mode);
        settings.link_type_refs_priority =
            enum_key(map, "link_type_refs_priority", |raw| match raw {
                "prefer" => Some(TypeRefsPriority::Prefer),
                "fallback" => Some(TypeRefsPriority::Fallback),
                _ => None,
            })
            .unwrap_or(settings.link_type_refs_priority);
        settings.link_rg_verify = enum_key(map, "link_rg_verify", |raw| match raw {
            "auto" => Some(RgVerifyMode::Auto),
            "never" => Some(RgVerifyMode::Never),
            _ => None,
        })
        .unwrap_or(settings.link_rg_verify);

        if let Some(prefixes) = map.get("type_refs_include_prefixes") {
            settings.type_refs_include_prefixes = prefix_list(prefixes);
        }
        if let Some(prefixes) = map.get("type_refs_exclude_prefixes") {
            settings.type_refs_exclude_prefixes = prefix_list(prefixes);
        }
        if let Some(raw) = str_key(map, "prompt_version") {
            if !raw.is_empty() {
                settings.prompt_version = raw.to_string();
            }
        }
        if let Some(dirs) = map.get("ignore_dirs") {
            let items: BTreeSet<String> = string_list(dirs)
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect();
            if !items.is_empty() {
                settings.ignore_dirs = items;
            }
        }
        if let Some(paths) = map.get("worklist_paths") {
            settings.worklist_paths = string_list(paths);
        }
        if let Some(keywords) = map.get("worklist_keywords") {
            settings.worklist_keywords = string_list(keywords);
        }
        if let Some(v) = usize_key(map, "worklist_max_entries") {
            settings.worklist_max_entries = v;
        }
        if let Some(v) = usize_key(map, "dir_children_limit") {
            if v > 0 {
                settings.dir_children_limit = v;
            }
        }
        if let Some(v) = usize_key(map, "dir_summary_max_chars") {
            if v > 0 {
                settings.dir_summary_max_chars = v;
            }
        }

        if let Some(budget) = map.get("pack_budget").and_then(Value::as_object) {
            settings.pack_budget = parse_pack_budget(budget);
        }
        if let Some(slice) = map.get("slice_budget").and_then(Value::as_object) {
            if let Some(v) = usize_key(slice, "max_nodes") {
                if v > 0 {
                    settings.slice_budget.max_nodes = v;
                }
            }
            if let Some(v) = usize_key(slice, "max_links") {
                if v > 0 {
                    settings.slice_budget.max_links = v;
                }
            }
        }

        settings
    }
}

fn parse_pack_budget(map: &serde_json::Map<String, Value>) -> PackBudget {
    let mut budget = PackBudget {
        enforce: map.get("enforce").and_then(Value::as_bool).unwrap_or(false),
        ..PackBudget::default()
    };
    if let Some(priority) = map.get("trim_priority") {
        budget.trim_priority = string_list(priority);
    }
    for (key, value) in map {
        if key == "enforce" || key == "trim_priority" {
            continue;
        }
        let Some(parsed) = value.as_u64().map(|v| v as usize) else {
            continue;
        };
        match key.as_str() {
            "max_chars" => budget.max_chars = Some(parsed),
            "max_lines" => budget.max_lines = Some(parsed),
            _ => {
                budget.limits.insert(key.clone(), parsed);
            }
        }
    }
    budget
}

fn usize_key(map: &serde_json::Map<String, Value>, key: &str) -> Option<usize> {
    map.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

fn u64_key(map: &serde_json::Map<String, Value>, key: &str) -> Option<u64> {
    map.get(key).and_then(Value::as_u64)
}

fn str_key<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str).map(str::trim)
}

fn enum_key<T>(
    map: &serde_json::Map<String, Value>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = str_key(map, key)?.to_lowercase();
    let parsed = parse(&raw);
    if parsed.is_none() {
        log::debug!("ignoring invalid value {raw:?} for setting {key}");
    }
    parsed
}

/// Accept either a JSON array or a comma/colon separated string.
fn prefix_list(value: &Value) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    let raw_items: Vec<String> = match value {
        Value::String(raw) => raw
            .split([',', ':'])
            .map(|s| s.trim().to_string())
            .collect(),
        Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .collect(),
        _ => Vec::new(),
    };
    for item in raw_items {
        if !item.is_empty() && !items.contains(&item) {
            items.push(item);
        }
    }
    items
}

fn string_list(value: &Value) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    let raw_items: Vec<String> = match value {
        Value::String(raw) => raw.split(',').map(|s| s.trim().to_string()).collect(),
        Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str())
            .flat_map(|s| s.split(','))
            .map(|s| s.trim().to_string())
            .collect(),
        _ => Vec::new(),
    };
    for item in raw_items {
        if !item.is_empty() && !items.contains(&item) {
            items.push(item);
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn defaults_are_documented_values() {
        let settings = RlmSettings::default();
        assert_eq!(settings.search_batch_size, DEFAULT_SEARCH_BATCH_SIZE);
        assert_eq!(settings.link_key_calls_source, SymbolSource::KeyCalls);
        assert_eq!(settings.link_fallback_mode, FallbackMode::TypesOnly);
        assert_eq!(settings.link_type_refs_mode, TypeRefsMode::Additive);
        assert_eq!(settings.dir_children_limit, 50);
        assert_eq!(
            settings.type_refs_exclude_prefixes,
            vec!["java.", "jakarta.", "org.springframework."]
        );
    }

    #[test]
    fn unknown_keys_are_ignored_and_invalid_values_fall_back() {
        let settings = RlmSettings::from_value(&json!({
            "max_links": 120,
            "link_fallback_mode": "everything",
            "link_type_refs_mode": "ONLY",
            "mystery_key": true,
        }));
        assert_eq!(settings.max_links, 120);
        assert_eq!(settings.link_fallback_mode, FallbackMode::TypesOnly);
        assert_eq!(settings.link_type_refs_mode, TypeRefsMode::Only);
    }

    #[test]
    fn pack_budget_collects_extra_limit_keys() {
        let settings = RlmSettings::from_value(&json!({
            "pack_budget": {
                "max_chars": 4000,
                "max_lines": 100,
                "enforce": true,
                "trim_priority": ["links", "hotspots"],
                "links": 8,
            }
        }));
        assert_eq!(settings.pack_budget.max_chars, Some(4000));
        assert_eq!(settings.pack_budget.max_lines, Some(100));
        assert!(settings.pack_budget.enforce);
        assert_eq!(settings.pack_budget.trim_priority, vec!["links", "hotspots"]);
        assert_eq!(settings.pack_budget.limits.get("links"), Some(&8));
    }

    #[test]
    fn prefix_lists_accept_strings_and_arrays() {
        let settings = RlmSettings::from_value(&json!({
            "type_refs_include_prefixes": "com.acme,org.acme:io.acme",
            "type_refs_exclude_prefixes": ["java.", "java."],
        }));
        assert_eq!(
            settings.type_refs_include_prefixes,
            vec!["com.acme", "org.acme", "io.acme"]
        );
        assert_eq!(settings.type_refs_exclude_prefixes, vec!["java."]);
    }

    #[test]
    fn warn_ratio_must_be_a_ratio() {
        let ok = RlmSettings::from_value(&json!({"link_unverified_warn_ratio": 0.5}));
        assert_eq!(ok.link_unverified_warn_ratio, Some(0.5));
        let out_of_range = RlmSettings::from_value(&json!({"link_unverified_warn_ratio": 3.0}));
        assert_eq!(out_of_range.link_unverified_warn_ratio, None);
    }
}
