use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use rlm_config::{
    file_id_for_path, is_type_symbol, normalize_path, FallbackMode, RgVerifyMode, RlmSettings,
    SymbolSource, TypeRefsMode, TypeRefsPriority,
};
use rlm_store::{
    EvidenceRef, Extractor, FileNode, Link, LinkType, Manifest, NodeStore, TargetsDoc,
    Verification, LINK_SCHEMA, LINK_SCHEMA_VERSION,
};

use crate::search::{DefinitionSearch, SearchFailure, SearchHit};
use crate::util::{resolve_source, ScopeFilter};
use crate::worklist::WorklistScope;

/// Link-builder tunables, lifted out of the settings map once per run.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    pub max_links: usize,
    pub max_symbols_per_file: usize,
    pub max_definition_hits_per_symbol: usize,
    pub search_timeout: Duration,
    pub search_batch_size: usize,
    pub key_calls_source: SymbolSource,
    pub fallback_mode: FallbackMode,
    pub type_refs_mode: TypeRefsMode,
    pub type_refs_priority: TypeRefsPriority,
    pub rg_verify: RgVerifyMode,
    pub include_prefixes: Vec<String>,
    pub exclude_prefixes: Vec<String>,
}

impl LinkPolicy {
    pub fn from_settings(settings: &RlmSettings) -> Self {
        Self {
            max_links: settings.max_links,
            max_symbols_per_file: settings.max_symbols_per_file,
            max_definition_hits_per_symbol: settings.max_definition_hits_per_symbol,
            search_timeout: Duration::from_secs(settings.search_timeout_s),
            search_batch_size: settings.search_batch_size,
            key_calls_source: settings.link_key_calls_source,
            fallback_mode: settings.link_fallback_mode,
            type_refs_mode: settings.link_type_refs_mode,
            type_refs_priority: settings.link_type_refs_priority,
            rg_verify: settings.link_rg_verify,
            include_prefixes: settings.type_refs_include_prefixes.clone(),
            exclude_prefixes: settings.type_refs_exclude_prefixes.clone(),
        }
    }

    /// Label used in the stats sidecar when no symbol was scanned at all.
    pub fn default_source_label(&self) -> String {
        match self.type_refs_mode {
            TypeRefsMode::Only => "type_refs".to_string(),
            TypeRefsMode::Additive => {
                format!("{}+type_refs", self.key_calls_source.as_str())
            }
            TypeRefsMode::Off => self.key_calls_source.as_str().to_string(),
        }
    }
}

/// Counters surfaced in `links.stats.json`. Degradations (timeouts,
/// truncations, search errors) are recorded here, never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub symbols_total: usize,
    pub symbols_scanned: usize,
    pub symbols_truncated: usize,
    pub candidate_truncated: usize,
    pub rg_calls: usize,
    pub rg_timeouts: usize,
    pub rg_errors: usize,
    pub fallback_nodes: usize,
    pub fallback_symbols: usize,
    pub type_refs_total: usize,
    pub type_refs_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols_source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub links: Vec<Link>,
    pub truncated: bool,
    pub stats: LinkStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SymbolOrigin {
    KeyCalls,
    PublicSymbols,
    FallbackPublicSymbols,
    TypeRefs,
}

impl SymbolOrigin {
    fn stats_label(self) -> &'static str {
        match self {
            SymbolOrigin::KeyCalls => "key_calls",
            SymbolOrigin::PublicSymbols | SymbolOrigin::FallbackPublicSymbols => "public_symbols",
            SymbolOrigin::TypeRefs => "type_refs",
        }
    }
}

/// Ordered scan-symbol set for one source node; insertion order is the
/// scan order, so caps truncate deterministically from the tail.
#[derive(Default)]
struct SymbolSet {
    symbols: Vec<String>,
    origins: BTreeMap<String, SymbolOrigin>,
}

impl SymbolSet {
    fn add(&mut self, symbol: &str, origin: SymbolOrigin) {
        if symbol.is_empty() || self.origins.contains_key(symbol) {
            return;
        }
        self.symbols.push(symbol.to_string());
        self.origins.insert(symbol.to_string(), origin);
    }

    fn drop_fallback(&mut self) {
        let origins = &self.origins;
        self.symbols
            .retain(|sym| origins.get(sym) != Some(&SymbolOrigin::FallbackPublicSymbols));
        self.origins
            .retain(|_, origin| *origin != SymbolOrigin::FallbackPublicSymbols);
    }

    fn origin(&self, symbol: &str) -> Option<SymbolOrigin> {
        self.origins.get(symbol).copied()
    }
}

/// Batched, memoized view over the external search. One negative or
/// positive answer per symbol per run.
struct SearchCache<'a> {
    search: &'a dyn DefinitionSearch,
    root: &'a Path,
    files: &'a [String],
    timeout: Duration,
    batch_size: usize,
    max_hits: usize,
    cache: BTreeMap<String, Option<SearchHit>>,
}

impl<'a> SearchCache<'a> {
    fn prime(&mut self, symbols: &[String], stats: &mut LinkStats) {
        if self.files.is_empty() {
            return;
        }
        let pending: Vec<String> = symbols
            .iter()
            .filter(|sym| !sym.is_empty() && !self.cache.contains_key(sym.as_str()))
            .cloned()
            .collect();
        if pending.is_empty() {
            return;
        }
        let chunk_size = if self.batch_size > 0 {
            self.batch_size
        } else {
            pending.len()
        };
        for chunk in pending.chunks(chunk_size) {
            stats.rg_calls += 1;
            let matches = match self.search.find_matches(
                self.root,
                chunk,
                self.files,
                self.timeout,
                self.max_hits,
            ) {
                Ok(matches) => matches,
                Err(SearchFailure::Timeout) => {
                    stats.rg_timeouts += 1;
                    BTreeMap::new()
                }
                Err(failure) => {
                    log::debug!("definition search degraded: {failure:?}");
                    stats.rg_errors += 1;
                    BTreeMap::new()
                }
            };
            for sym in chunk {
                self.cache.insert(sym.clone(), matches.get(sym).cloned());
            }
        }
    }

    fn hit(&self, symbol: &str) -> Option<&SearchHit> {
        self.cache.get(symbol).and_then(|entry| entry.as_ref())
    }
}

/// Build the directed, evidence-backed link set for all file nodes.
///
/// Evidence is sought cheapest-first: the source node's own text, then a
/// single candidate destination's text, then the batched external search
/// over the target file list. Emptiness is a valid outcome.
pub fn build_links(
    base_root: &Path,
    store: &NodeStore,
    target_files: &[String],
    policy: &LinkPolicy,
    search: &dyn DefinitionSearch,
) -> LinkOutcome {
    let mut stats = LinkStats::default();
    let mut links: BTreeMap<String, Link> = BTreeMap::new();
    let mut truncated = false;
    let mut sources_used: BTreeSet<&'static str> = BTreeSet::new();

    let symbol_index = build_symbol_index(store);
    let nodes_by_id: BTreeMap<&str, &FileNode> = store
        .file_nodes()
        .map(|node| (node.node_id(), node))
        .filter(|(id, _)| !id.is_empty())
        .collect();
    let mut cache = SearchCache {
        search,
        root: base_root,
        files: target_files,
        timeout: policy.search_timeout,
        batch_size: policy.search_batch_size,
        max_hits: policy.max_definition_hits_per_symbol,
        cache: BTreeMap::new(),
    };

    'nodes: for node in store.file_nodes() {
        let file_id = node.node_id();
        let src_path = node.path.trim();
        if file_id.is_empty() || src_path.is_empty() {
            continue;
        }
        let source = resolve_source(base_root, src_path);
        let Ok(data) = fs::read(&source) else {
            continue;
        };
        let text = String::from_utf8_lossy(&data).into_owned();
        let missing: BTreeSet<&str> = node
            .missing_tokens
            .iter()
            .map(|item| item.trim())
            .collect();

        let type_refs = filter_type_refs(
            &node.type_refs,
            &policy.include_prefixes,
            &policy.exclude_prefixes,
        );
        stats.type_refs_total += type_refs.len();
        let set = assemble_symbols(node, &type_refs, policy);

        stats.symbols_total += set.symbols.len();
        let mut scan: Vec<String> = set.symbols.clone();
        if policy.max_symbols_per_file > 0 && scan.len() > policy.max_symbols_per_file {
            stats.symbols_truncated += scan.len() - policy.max_symbols_per_file;
            scan.truncate(policy.max_symbols_per_file);
        }
        stats.symbols_scanned += scan.len();

        let fallback_used = scan
            .iter()
            .filter(|sym| set.origin(sym) == Some(SymbolOrigin::FallbackPublicSymbols))
            .count();
        if fallback_used > 0 {
            stats.fallback_nodes += 1;
            stats.fallback_symbols += fallback_used;
        }
        stats.type_refs_used += scan
            .iter()
            .filter(|sym| set.origin(sym) == Some(SymbolOrigin::TypeRefs))
            .count();
        for sym in &scan {
            if let Some(origin) = set.origin(sym) {
                sources_used.insert(origin.stats_label());
            }
        }

        let mut src_matches: BTreeMap<&str, Option<(u32, String)>> = BTreeMap::new();
        for symbol in &scan {
            if missing.contains(symbol.as_str()) {
                continue;
            }
            src_matches.insert(symbol.as_str(), match_line(&text, symbol));
        }
        cache.prime(&scan, &mut stats);

        for symbol in &scan {
            if missing.contains(symbol.as_str()) {
                continue;
            }
            let mut candidates: Vec<&FileNode> = symbol_index
                .get(symbol.as_str())
                .map(|items| items.clone())
                .unwrap_or_default();
            if policy.max_definition_hits_per_symbol > 0
                && candidates.len() > policy.max_definition_hits_per_symbol
            {
                stats.candidate_truncated +=
                    candidates.len() - policy.max_definition_hits_per_symbol;
                candidates.truncate(policy.max_definition_hits_per_symbol);
            }

            for target_node in &candidates {
                let dst_file_id = target_node.node_id();
                let dst_path = target_node.path.trim();
                if dst_file_id.is_empty() || dst_file_id == file_id {
                    continue;
                }
                let mut extractor = Extractor::Regex;
                let mut evidence_path = src_path.to_string();
                let mut found = src_matches.get(symbol.as_str()).cloned().flatten();
                if found.is_none() && !dst_path.is_empty() {
                    let dst_file = resolve_source(base_root, dst_path);
                    if let Ok(dst_data) = fs::read(&dst_file) {
                        let dst_text = String::from_utf8_lossy(&dst_data);
                        found = match_line(&dst_text, symbol);
                        if found.is_some() {
                            evidence_path = dst_path.to_string();
                        }
                    }
                }
                if found.is_none() {
                    if let Some(hit) = cache.hit(symbol) {
                        found = Some((hit.line, hit.text.clone()));
                        evidence_path = hit.path.clone();
                        extractor = Extractor::ExternalSearch;
                    }
                }
                let Some((line_no, line_text)) = found else {
                    continue;
                };
                let unverified = set.origin(symbol) == Some(SymbolOrigin::FallbackPublicSymbols)
                    && policy.fallback_mode == FallbackMode::TypesOnly;
                let link = make_link(
                    file_id,
                    dst_file_id,
                    &evidence_path,
                    line_no,
                    &line_text,
                    extractor,
                    unverified,
                );
                links.entry(link.link_id.clone()).or_insert(link);
                if policy.max_links > 0 && links.len() >= policy.max_links {
                    truncated = true;
                    break 'nodes;
                }
            }
            if !candidates.is_empty() {
                continue;
            }

            // Index-missing symbol: the external hit alone names the
            // destination, via its path.
            let Some(hit) = cache.hit(symbol) else {
                continue;
            };
            if hit.path.is_empty() {
                continue;
            }
            let hit_path = Path::new(&hit.path);
            let rel = if hit_path.is_absolute() {
                hit_path
                    .strip_prefix(base_root)
                    .unwrap_or(hit_path)
                    .to_path_buf()
            } else {
                hit_path.to_path_buf()
            };
            let dst_file_id = file_id_for_path(Path::new(&normalize_path(&rel)));
            if dst_file_id.is_empty() || dst_file_id == file_id {
                continue;
            }
            let mut unverified = true;
            if policy.rg_verify != RgVerifyMode::Never {
                if let Some(dst_node) = nodes_by_id.get(dst_file_id.as_str()) {
                    if dst_node.verification != Verification::Failed {
                        unverified = false;
                    }
                }
            }
            let link = make_link(
                file_id,
                &dst_file_id,
                &hit.path,
                hit.line,
                &hit.text,
                Extractor::ExternalSearch,
                unverified,
            );
            links.entry(link.link_id.clone()).or_insert(link);
            if policy.max_links > 0 && links.len() >= policy.max_links {
                truncated = true;
                break 'nodes;
            }
        }
    }

    if !sources_used.is_empty() {
        let joined: Vec<&str> = sources_used.into_iter().collect();
        stats.symbols_source = Some(joined.join("+"));
    }

    let paths_by_id = store.paths_by_id();
    let mut links: Vec<Link> = links.into_values().collect();
    links.sort_by(|a, b| {
        let path_of = |id: &String| paths_by_id.get(id).map(String::as_str).unwrap_or("");
        let a_key = (
            path_of(&a.src_file_id),
            a.link_type,
            path_of(&a.dst_file_id),
            &a.evidence_ref.match_hash,
        );
        let b_key = (
            path_of(&b.src_file_id),
            b.link_type,
            path_of(&b.dst_file_id),
            &b.evidence_ref.match_hash,
        );
        a_key.cmp(&b_key)
    });

    LinkOutcome {
        links,
        truncated,
        stats,
    }
}

/// symbol -> candidate destination nodes, from non-failed nodes'
/// public symbols, excluding symbols the verifier flagged missing.
fn build_symbol_index(store: &NodeStore) -> BTreeMap<&str, Vec<&FileNode>> {
    let mut index: BTreeMap<&str, Vec<&FileNode>> = BTreeMap::new();
    for node in store.file_nodes() {
        if node.verification == Verification::Failed {
            continue;
        }
        let missing: BTreeSet<&str> = node
            .missing_tokens
            .iter()
            .map(|item| item.trim())
            .collect();
        for symbol in &node.public_symbols {
            let symbol = symbol.trim();
            if symbol.is_empty() || missing.contains(symbol) {
                continue;
            }
            index.entry(symbol).or_default().push(node);
        }
    }
    index
}

fn assemble_symbols(node: &FileNode, type_refs: &[String], policy: &LinkPolicy) -> SymbolSet {
    let key_calls: Vec<&str> = node
        .key_calls
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .collect();
    let public_symbols: Vec<&str> = node
        .public_symbols
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .collect();

    let mut set = SymbolSet::default();
    let mut has_fallback = false;
    match policy.key_calls_source {
        SymbolSource::PublicSymbols => {
            for item in &public_symbols {
                set.add(item, SymbolOrigin::PublicSymbols);
            }
        }
        SymbolSource::Both => {
            for item in &key_calls {
                set.add(item, SymbolOrigin::KeyCalls);
            }
            for item in &public_symbols {
                set.add(item, SymbolOrigin::PublicSymbols);
            }
        }
        SymbolSource::KeyCalls => {
            for item in &key_calls {
                set.add(item, SymbolOrigin::KeyCalls);
            }
            if set.symbols.is_empty() && !public_symbols.is_empty() {
                let fallback: Vec<&str> = match policy.fallback_mode {
                    FallbackMode::TypesOnly => public_symbols
                        .iter()
                        .filter(|sym| is_type_symbol(sym))
                        .copied()
                        .collect(),
                    FallbackMode::All => public_symbols.clone(),
                };
                has_fallback = !fallback.is_empty();
                for item in fallback {
                    set.add(item, SymbolOrigin::FallbackPublicSymbols);
                }
            }
        }
    }

    match policy.type_refs_mode {
        TypeRefsMode::Only => {
            set = SymbolSet::default();
            for item in type_refs {
                set.add(item, SymbolOrigin::TypeRefs);
            }
        }
        TypeRefsMode::Additive if !type_refs.is_empty() => {
            if policy.type_refs_priority == TypeRefsPriority::Prefer && has_fallback {
                set.drop_fallback();
            }
            for item in type_refs {
                set.add(item, SymbolOrigin::TypeRefs);
            }
        }
        _ => {}
    }
    set
}

fn filter_type_refs(
    symbols: &[String],
    include_prefixes: &[String],
    exclude_prefixes: &[String],
) -> Vec<String> {
    symbols
        .iter()
        .map(|raw| raw.trim())
        .filter(|symbol| !symbol.is_empty())
        .filter(|symbol| {
            let lowered = symbol.to_lowercase();
            if !include_prefixes.is_empty()
                && !include_prefixes
                    .iter()
                    .any(|prefix| lowered.starts_with(&prefix.to_lowercase()))
            {
                return false;
            }
            !exclude_prefixes
                .iter()
                .any(|prefix| lowered.starts_with(&prefix.to_lowercase()))
        })
        .map(|symbol| symbol.to_string())
        .collect()
}

/// First line containing the symbol on a word boundary, falling back to
/// plain substring containment.
fn match_line(text: &str, symbol: &str) -> Option<(u32, String)> {
    if symbol.is_empty() {
        return None;
    }
    if let Ok(pattern) = Regex::new(&format!(r"\b{}\b", regex::escape(symbol))) {
        for (idx, line) in text.lines().enumerate() {
            if pattern.is_match(line) {
                return Some((idx as u32 + 1, line.to_string()));
            }
        }
    }
    if text.contains(symbol) {
        for (idx, line) in text.lines().enumerate() {
            if line.contains(symbol) {
                return Some((idx as u32 + 1, line.to_string()));
            }
        }
    }
    None
}

fn classify_link_type(line_text: &str) -> LinkType {
    let lowered = line_text.trim().to_lowercase();
    if lowered.is_empty() {
        return LinkType::Calls;
    }
    if lowered.starts_with("import ") || lowered.starts_with("from ") {
        return LinkType::Imports;
    }
    if has_word(&lowered, "extends") {
        return LinkType::Extends;
    }
    if has_word(&lowered, "implements") {
        return LinkType::Implements;
    }
    LinkType::Calls
}

fn has_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|token| token == word)
}

fn make_link(
    src_file_id: &str,
    dst_file_id: &str,
    evidence_path: &str,
    line_no: u32,
    line_text: &str,
    extractor: Extractor,
    unverified: bool,
) -> Link {
    let link_type = classify_link_type(line_text);
    let normalized: String = line_text.split_whitespace().collect::<Vec<_>>().join(" ");
    let match_hash = format!(
        "{:x}",
        Sha256::digest(format!("{evidence_path}:{line_no}:{line_no}:{normalized}").as_bytes())
    );
    let link_id = format!(
        "{:x}",
        Sha256::digest(
            format!(
                "{src_file_id}:{dst_file_id}:{}:{match_hash}",
                link_type.as_str()
            )
            .as_bytes()
        )
    );
    Link {
        schema: LINK_SCHEMA.to_string(),
        schema_version: LINK_SCHEMA_VERSION.to_string(),
        link_id,
        src_file_id: src_file_id.to_string(),
        dst_file_id: dst_file_id.to_string(),
        link_type,
        evidence_ref: EvidenceRef {
            path: evidence_path.to_string(),
            line_start: line_no,
            line_end: line_no,
            extractor,
            match_hash,
        },
        unverified,
    }
}

/// Which file list the external search fans out over, and how it was
/// narrowed along the way.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSelection {
    pub files: Vec<String>,
    pub source: String,
    pub total: usize,
    pub trimmed: usize,
    pub scope_stats: BTreeMap<String, serde_json::Value>,
}

/// Resolve the target-file list for the link builder: explicit targets,
/// else manifest paths; prefer keyword hits once the list grows past the
/// configured threshold; trim to `max_files` last, recording the cut.
pub fn select_target_files(
    base_root: &Path,
    targets: &TargetsDoc,
    manifest: Option<&Manifest>,
    worklist_scope: Option<&WorklistScope>,
    settings: &RlmSettings,
    search: &dyn DefinitionSearch,
) -> TargetSelection {
    let mut files: Vec<String> = targets
        .files
        .iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    let mut keyword_hits: Vec<String> = targets
        .keyword_hits
        .iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    let mut source = "targets".to_string();

    if files.is_empty() {
        if let Some(manifest) = manifest {
            let mut manifest_files: Vec<String> = manifest
                .files
                .iter()
                .map(|record| record.path.clone())
                .filter(|path| !path.trim().is_empty())
                .collect();
            if settings.max_files > 0 && manifest_files.len() > settings.max_files {
                manifest_files.truncate(settings.max_files);
            }
            if !manifest_files.is_empty() {
                files = manifest_files;
                source = "manifest".to_string();
            }
        }
    }

    let mut scope_stats: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    if let Some(scope) = worklist_scope {
        let filter = ScopeFilter::new(scope.paths.clone(), scope.keywords.clone());
        if filter.is_empty() {
            scope_stats.insert("target_files_scope".into(), "targets".into());
            scope_stats.insert("target_files_scope_total".into(), files.len().into());
        } else {
            files = filter.filter_paths(&files);
            keyword_hits = filter.filter_paths(&keyword_hits);
            scope_stats.insert("target_files_scope".into(), "worklist".into());
            scope_stats.insert("target_files_scope_total".into(), files.len().into());
            scope_stats.insert("worklist_scope_paths".into(), filter.paths.len().into());
            scope_stats.insert(
                "worklist_scope_keywords".into(),
                filter.keywords.len().into(),
            );
            if !filter.keywords.is_empty() {
                let roots = filter.keyword_roots(base_root);
                let hits = if roots.is_empty() {
                    BTreeSet::new()
                } else {
                    search.files_with_matches(
                        base_root,
                        &filter.keywords,
                        &roots,
                        &settings.ignore_dirs,
                        base_root,
                    )
                };
                let in_scope: BTreeSet<String> = files
                    .iter()
                    .map(|path| normalize_path(Path::new(path)))
                    .collect();
                keyword_hits = hits
                    .into_iter()
                    .filter(|path| in_scope.contains(path))
                    .collect();
                scope_stats.insert("worklist_keyword_hits".into(), keyword_hits.len().into());
            }
        }
    } else {
        scope_stats.insert("target_files_scope".into(), "targets".into());
        scope_stats.insert("target_files_scope_total".into(), files.len().into());
    }

    if !files.is_empty()
        && settings.link_target_threshold > 0
        && files.len() >= settings.link_target_threshold
        && !keyword_hits.is_empty()
    {
        files = keyword_hits.clone();
        source = "keyword_hits".to_string();
    }
    if !files.is_empty()
        && settings.max_files > 0
        && files.len() > settings.max_files
        && !keyword_hits.is_empty()
    {
        files = keyword_hits.clone();
        source = "keyword_hits".to_string();
    }

    let total = files.len();
    let mut trimmed = 0usize;
    if settings.max_files > 0 && files.len() > settings.max_files {
        trimmed = files.len() - settings.max_files;
        files.truncate(settings.max_files);
    }

    TargetSelection {
        files,
        source,
        total,
        trimmed,
        scope_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rlm_store::NodeRecord;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct NoSearch;

    impl DefinitionSearch for NoSearch {
        fn find_matches(
            &self,
            _root: &Path,
            _symbols: &[String],
            _files: &[String],
            _timeout: Duration,
            _max_hits: usize,
        ) -> std::result::Result<BTreeMap<String, SearchHit>, SearchFailure> {
            Ok(BTreeMap::new())
        }

        fn files_with_matches(
            &self,
            _root: &Path,
            _keywords: &[String],
            _roots: &[PathBuf],
            _ignore_dirs: &BTreeSet<String>,
            _base_root: &Path,
        ) -> BTreeSet<String> {
            BTreeSet::new()
        }
    }

    fn node(id: &str, path: &str, public: &[&str], calls: &[&str]) -> NodeRecord {
        NodeRecord::File(FileNode {
            id: id.into(),
            file_id: id.into(),
            path: path.into(),
            public_symbols: public.iter().map(|s| s.to_string()).collect(),
            key_calls: calls.iter().map(|s| s.to_string()).collect(),
            ..FileNode::default()
        })
    }

    fn policy() -> LinkPolicy {
        LinkPolicy::from_settings(&RlmSettings::default())
    }

    #[test]
    fn key_call_to_public_symbol_produces_one_calls_link() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.kt"), "val x = Bar()\n").unwrap();
        fs::write(dir.path().join("b.kt"), "class Bar {}\n").unwrap();
        let store = NodeStore::from_nodes(vec![
            node("a", "a.kt", &[], &["Bar"]),
            node("b", "b.kt", &["Bar"], &[]),
        ]);
        let outcome = build_links(dir.path(), &store, &[], &policy(), &NoSearch);
        assert_eq!(outcome.links.len(), 1);
        let link = &outcome.links[0];
        assert_eq!(link.src_file_id, "a");
        assert_eq!(link.dst_file_id, "b");
        assert_eq!(link.link_type, LinkType::Calls);
        assert_eq!(link.evidence_ref.extractor, Extractor::Regex);
        assert!(!link.unverified);
        assert!(!outcome.truncated);
    }

    #[test]
    fn rebuilding_identical_inputs_is_deterministic() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.kt"), "Bar()\nBaz()\n").unwrap();
        fs::write(dir.path().join("b.kt"), "class Bar {}\nclass Baz {}\n").unwrap();
        let store = NodeStore::from_nodes(vec![
            node("a", "a.kt", &[], &["Bar", "Baz"]),
            node("b", "b.kt", &["Bar", "Baz"], &[]),
        ]);
        let first = build_links(dir.path(), &store, &[], &policy(), &NoSearch);
        let second = build_links(dir.path(), &store, &[], &policy(), &NoSearch);
        assert_eq!(first.links, second.links);
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn import_and_extends_lines_classify_by_keyword() {
        assert_eq!(classify_link_type("import com.acme.Bar"), LinkType::Imports);
        assert_eq!(classify_link_type("from acme import Bar"), LinkType::Imports);
        assert_eq!(
            classify_link_type("class Foo extends Bar {"),
            LinkType::Extends
        );
        assert_eq!(
            classify_link_type("class Foo implements Bar {"),
            LinkType::Implements
        );
        assert_eq!(classify_link_type("Bar.call()"), LinkType::Calls);
        assert_eq!(classify_link_type("extendsFoo()"), LinkType::Calls);
    }

    #[test]
    fn max_links_stops_early_and_flags_truncation() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.kt"), "Bar()\nBaz()\n").unwrap();
        fs::write(dir.path().join("b.kt"), "class Bar {}\nclass Baz {}\n").unwrap();
        let store = NodeStore::from_nodes(vec![
            node("a", "a.kt", &[], &["Bar", "Baz"]),
            node("b", "b.kt", &["Bar", "Baz"], &[]),
        ]);
        let mut policy = policy();
        policy.max_links = 1;
        let outcome = build_links(dir.path(), &store, &[], &policy, &NoSearch);
        assert_eq!(outcome.links.len(), 1);
        assert!(outcome.truncated);
    }

    #[test]
    fn types_only_fallback_marks_links_unverified() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.kt"), "uses Widget here\n").unwrap();
        fs::write(dir.path().join("b.kt"), "class Widget {}\n").unwrap();
        // Source node has no key calls, so its public symbols kick in.
        let store = NodeStore::from_nodes(vec![
            node("a", "a.kt", &["Widget"], &[]),
            node("b", "b.kt", &["Widget"], &["noSuchThing"]),
        ]);
        let outcome = build_links(dir.path(), &store, &[], &policy(), &NoSearch);
        assert_eq!(outcome.links.len(), 1);
        assert!(outcome.links[0].unverified);
        assert_eq!(outcome.stats.fallback_nodes, 1);
    }

    #[test]
    fn fallback_filters_to_type_like_symbols() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.kt"), "fetchData()\nWidget()\n").unwrap();
        // Destination node has no readable source, so it only feeds the index.
        let store = NodeStore::from_nodes(vec![
            node("a", "a.kt", &["fetchData", "Widget"], &[]),
            node("b", "b.kt", &["fetchData", "Widget"], &[]),
        ]);
        let outcome = build_links(dir.path(), &store, &[], &policy(), &NoSearch);
        // Only the PascalCase symbol survives the types_only filter.
        assert_eq!(outcome.stats.symbols_scanned, 1);
        assert_eq!(outcome.stats.fallback_symbols, 1);
        assert_eq!(outcome.links.len(), 1);
    }

    #[test]
    fn type_refs_only_mode_replaces_the_scan_set() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.kt"), "Bar()\nRef()\n").unwrap();
        fs::write(dir.path().join("b.kt"), "class Ref {}\n").unwrap();
        let mut source = node("a", "a.kt", &[], &["Bar"]);
        source.as_file_mut().unwrap().type_refs = vec!["Ref".into()];
        let store = NodeStore::from_nodes(vec![source, node("b", "b.kt", &["Ref"], &[])]);
        let mut policy = policy();
        policy.type_refs_mode = TypeRefsMode::Only;
        let outcome = build_links(dir.path(), &store, &[], &policy, &NoSearch);
        assert_eq!(outcome.links.len(), 1);
        assert_eq!(outcome.stats.type_refs_used, 1);
        assert_eq!(outcome.stats.symbols_source.as_deref(), Some("type_refs"));
    }

    #[test]
    fn exclude_prefixes_drop_framework_type_refs() {
        let refs = vec!["java.util.List".to_string(), "com.acme.Order".to_string()];
        let filtered = filter_type_refs(&refs, &[], &["java.".to_string()]);
        assert_eq!(filtered, vec!["com.acme.Order"]);
    }

    #[test]
    fn search_only_hit_derives_destination_from_path() {
        struct HitSearch;
        impl DefinitionSearch for HitSearch {
            fn find_matches(
                &self,
                _root: &Path,
                symbols: &[String],
                _files: &[String],
                _timeout: Duration,
                _max_hits: usize,
            ) -> std::result::Result<BTreeMap<String, SearchHit>, SearchFailure> {
                let mut out = BTreeMap::new();
                for sym in symbols {
                    out.insert(
                        sym.clone(),
                        SearchHit {
                            path: "vendor/ext.kt".into(),
                            line: 7,
                            text: "object Hidden".into(),
                        },
                    );
                }
                Ok(out)
            }

            fn files_with_matches(
                &self,
                _root: &Path,
                _keywords: &[String],
                _roots: &[PathBuf],
                _ignore_dirs: &BTreeSet<String>,
                _base_root: &Path,
            ) -> BTreeSet<String> {
                BTreeSet::new()
            }
        }

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.kt"), "nothing here\n").unwrap();
        let store = NodeStore::from_nodes(vec![node("a", "a.kt", &[], &["Hidden"])]);
        let targets = vec!["vendor/ext.kt".to_string()];
        let outcome = build_links(dir.path(), &store, &targets, &policy(), &HitSearch);
        assert_eq!(outcome.links.len(), 1);
        let link = &outcome.links[0];
        assert!(link.unverified);
        assert_eq!(link.evidence_ref.extractor, Extractor::ExternalSearch);
        assert_eq!(link.evidence_ref.path, "vendor/ext.kt");
        assert_eq!(outcome.stats.rg_calls, 1);
    }

    #[test]
    fn search_timeout_is_counted_not_fatal() {
        struct TimeoutSearch;
        impl DefinitionSearch for TimeoutSearch {
            fn find_matches(
                &self,
                _root: &Path,
                _symbols: &[String],
                _files: &[String],
                _timeout: Duration,
                _max_hits: usize,
            ) -> std::result::Result<BTreeMap<String, SearchHit>, SearchFailure> {
                Err(SearchFailure::Timeout)
            }

            fn files_with_matches(
                &self,
                _root: &Path,
                _keywords: &[String],
                _roots: &[PathBuf],
                _ignore_dirs: &BTreeSet<String>,
                _base_root: &Path,
            ) -> BTreeSet<String> {
                BTreeSet::new()
            }
        }

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.kt"), "nothing\n").unwrap();
        let store = NodeStore::from_nodes(vec![node("a", "a.kt", &[], &["Missing"])]);
        let targets = vec!["a.kt".to_string()];
        let outcome = build_links(dir.path(), &store, &targets, &policy(), &TimeoutSearch);
        assert!(outcome.links.is_empty());
        assert_eq!(outcome.stats.rg_timeouts, 1);
    }

    #[test]
    fn target_selection_falls_back_to_manifest_paths() {
        let manifest = Manifest {
            schema: rlm_store::MANIFEST_SCHEMA.into(),
            ticket: "T-1".into(),
            slug_hint: None,
            generated_at: "2026-01-01T00:00:00Z".into(),
            targets_path: None,
            files: vec![rlm_store::FileRecord {
                file_id: "a".into(),
                path: "src/a.rs".into(),
                rev_sha: "r".into(),
                lang: "rs".into(),
                size: 1,
                prompt_version: "v1".into(),
            }],
            stats: rlm_store::ManifestStats { files_total: 1 },
        };
        let selection = select_target_files(
            Path::new("/tmp"),
            &TargetsDoc::default(),
            Some(&manifest),
            None,
            &RlmSettings::default(),
            &NoSearch,
        );
        assert_eq!(selection.source, "manifest");
        assert_eq!(selection.files, vec!["src/a.rs"]);
    }

    #[test]
    fn target_selection_prefers_keyword_hits_past_the_threshold() {
        let targets = TargetsDoc {
            files: vec!["a.rs".into(), "b.rs".into(), "c.rs".into()],
            keyword_hits: vec!["b.rs".into()],
            ..TargetsDoc::default()
        };
        let settings = RlmSettings {
            link_target_threshold: 3,
            ..RlmSettings::default()
        };
        let selection = select_target_files(
            Path::new("/tmp"),
            &targets,
            None,
            None,
            &settings,
            &NoSearch,
        );
        assert_eq!(selection.source, "keyword_hits");
        assert_eq!(selection.files, vec!["b.rs"]);
    }

    #[test]
    fn target_selection_trims_to_max_files_and_records_it() {
        let targets = TargetsDoc {
            files: vec!["a.rs".into(), "b.rs".into(), "c.rs".into()],
            ..TargetsDoc::default()
        };
        let settings = RlmSettings {
            max_files: 2,
            ..RlmSettings::default()
        };
        let selection = select_target_files(
            Path::new("/tmp"),
            &targets,
            None,
            None,
            &settings,
            &NoSearch,
        );
        assert_eq!(selection.total, 3);
        assert_eq!(selection.trimmed, 1);
        assert_eq!(selection.files.len(), 2);
    }
}
