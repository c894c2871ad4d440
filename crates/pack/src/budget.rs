//! Canonical pack serialization and deterministic budget trimming.
//!
//! Packs are consumed by tooling with hard context limits, so an
//! oversized pack degrades through an ordered step list: table rows go
//! first, then evidence snippets, then (under `enforce`) whole sections.
//! Every removal is recorded in `pack_trim_stats` unless that record is
//! itself what pushes the pack over budget.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

pub const RLM_MAX_CHARS: usize = 12_000;
pub const RLM_MAX_LINES: usize = 240;
pub const RESEARCH_MAX_CHARS: usize = 2_000;
pub const RESEARCH_MAX_LINES: usize = 120;

const BUDGET_HINT: &str = "Reduce top-N, trim snippets, or lower pack_budget limits.";

/// Identity and provenance keys that survive every compaction pass.
pub(crate) const ESSENTIAL_FIELDS: &[&str] = &[
    "schema",
    "pack_version",
    "type",
    "kind",
    "ticket",
    "slug",
    "slug_hint",
    "generated_at",
    "source_path",
];

/// Trim order for the rlm pack's node/link tables; `trim_priority`
/// settings may move entries to the front.
const RLM_LIST_FIELDS: [&str; 7] = [
    "links",
    "recommended_reads",
    "hotspots",
    "integration_points",
    "entrypoints",
    "test_hooks",
    "risks",
];

/// Whole sections dropped, in order, when `enforce` still cannot meet
/// the budget after row trimming.
const RLM_DROP_FIELDS: [&str; 11] = [
    "warnings",
    "stats",
    "entrypoints",
    "hotspots",
    "integration_points",
    "test_hooks",
    "risks",
    "recommended_reads",
    "links",
    "slug_hint",
    "source_path",
];

pub struct TrimOutcome {
    /// Serialized pack text after trimming, with trailing newline.
    pub text: String,
    /// Human-readable `field(-count)` summaries of what was removed.
    pub trimmed: Vec<String>,
    /// Remaining budget violations; empty means the pack fits.
    pub errors: Vec<String>,
    /// The final `pack_trim_stats` value, `Null` when nothing was trimmed.
    pub trim_stats: Value,
}

/// Report budget violations for serialized pack text.
pub fn check_budget(text: &str, max_chars: usize, max_lines: usize, label: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let char_count = text.chars().count();
    let line_count = text.matches('\n').count() + usize::from(!text.is_empty());
    if char_count > max_chars {
        errors.push(format!(
            "{label} pack budget exceeded: {char_count} chars > {max_chars}. {BUDGET_HINT}"
        ));
    }
    if line_count > max_lines {
        errors.push(format!(
            "{label} pack budget exceeded: {line_count} lines > {max_lines}. {BUDGET_HINT}"
        ));
    }
    errors
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn compact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let is_columnar = map.contains_key("cols") && map.contains_key("rows");
            let mut compacted = Map::new();
            for (key, val) in map {
                let cleaned = compact_value(val);
                if is_columnar && (key == "cols" || key == "rows") {
                    compacted.insert(key.clone(), cleaned);
                    continue;
                }
                if is_empty_value(&cleaned) {
                    continue;
                }
                compacted.insert(key.clone(), cleaned);
            }
            Value::Object(compacted)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(compact_value)
                .filter(|item| !is_empty_value(item))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn compact_payload(payload: &Value) -> Value {
    let Value::Object(map) = payload else {
        return payload.clone();
    };
    let mut compacted = Map::new();
    for (key, value) in map {
        let cleaned = compact_value(value);
        if !ESSENTIAL_FIELDS.contains(&key.as_str()) && is_empty_value(&cleaned) {
            continue;
        }
        compacted.insert(key.clone(), cleaned);
    }
    Value::Object(compacted)
}

/// Serialize a pack payload canonically: empty fields dropped (except
/// essentials and columnar `cols`/`rows`), keys sorted, two-space
/// indent, trailing newline.
pub fn serialize_pack(payload: &Value) -> String {
    let compacted = compact_payload(payload);
    // Value-to-string serialization has no failure mode.
    let mut text = serde_json::to_string_pretty(&compacted).unwrap_or_default();
    text.push('\n');
    text
}

fn object_mut<'a>(payload: &'a mut Value) -> Option<&'a mut Map<String, Value>> {
    payload.as_object_mut()
}

fn set_field(payload: &mut Value, key: &str, value: Value) {
    if let Some(map) = object_mut(payload) {
        map.insert(key.to_string(), value);
    }
}

fn has_field(payload: &Value, key: &str) -> bool {
    payload.as_object().is_some_and(|map| map.contains_key(key))
}

fn drop_field(payload: &mut Value, key: &str) -> bool {
    object_mut(payload).is_some_and(|map| map.remove(key).is_some())
}

fn trim_list_field(payload: &mut Value, key: &str, min_len: usize) -> bool {
    let Some(items) = payload.get_mut(key).and_then(Value::as_array_mut) else {
        return false;
    };
    if items.len() <= min_len {
        return false;
    }
    items.pop();
    true
}

fn trim_columnar_rows(payload: &mut Value, key: &str) -> bool {
    let Some(rows) = payload
        .get_mut(key)
        .and_then(|section| section.get_mut("rows"))
        .and_then(Value::as_array_mut)
    else {
        return false;
    };
    if rows.is_empty() {
        return false;
    }
    rows.pop();
    true
}

fn trim_profile_list(payload: &mut Value, key: &str) -> bool {
    let Some(items) = payload
        .get_mut("profile")
        .and_then(|profile| profile.get_mut(key))
        .and_then(Value::as_array_mut)
    else {
        return false;
    };
    if items.is_empty() {
        return false;
    }
    items.pop();
    true
}

/// Pop one sample from the first path entry that still has any.
fn trim_path_samples(payload: &mut Value, key: &str) -> bool {
    let Some(entries) = payload.get_mut(key).and_then(Value::as_array_mut) else {
        return false;
    };
    for entry in entries {
        let Some(samples) = entry.get_mut("sample").and_then(Value::as_array_mut) else {
            continue;
        };
        if !samples.is_empty() {
            samples.pop();
            return true;
        }
    }
    false
}

fn drop_columnar_if_empty(payload: &mut Value, key: &str) -> bool {
    let rows_empty = payload
        .get(key)
        .and_then(|section| section.get("rows"))
        .and_then(Value::as_array)
        .is_some_and(Vec::is_empty);
    if !rows_empty {
        return false;
    }
    drop_field(payload, key)
}

fn max_snippet_len(payload: &Value) -> Option<usize> {
    let links = payload.get("links").and_then(Value::as_array)?;
    if links.is_empty() {
        return None;
    }
    Some(
        links
            .iter()
            .filter_map(|link| link.get("evidence_snippet").and_then(Value::as_str))
            .map(|snippet| snippet.chars().count())
            .max()
            .unwrap_or(0),
    )
}

fn trim_evidence_snippets(payload: &mut Value, max_chars: usize) -> bool {
    let Some(links) = payload.get_mut("links").and_then(Value::as_array_mut) else {
        return false;
    };
    let mut trimmed = false;
    for link in links {
        let Some(snippet) = link.get("evidence_snippet").and_then(Value::as_str) else {
            continue;
        };
        if snippet.chars().count() <= max_chars {
            continue;
        }
        let shorter: String = snippet.chars().take(max_chars).collect();
        link["evidence_snippet"] = Value::String(shorter.trim_end().to_string());
        trimmed = true;
    }
    trimmed
}

struct Trimmer<'a> {
    payload: &'a mut Value,
    max_chars: usize,
    max_lines: usize,
    label: &'static str,
    counts: BTreeMap<String, usize>,
    steps: Vec<String>,
    text: String,
    errors: Vec<String>,
}

impl Trimmer<'_> {
    fn over(&self) -> bool {
        !self.errors.is_empty()
    }

    fn reserialize(&mut self) {
        self.text = serialize_pack(self.payload);
        self.errors = check_budget(&self.text, self.max_chars, self.max_lines, self.label);
    }

    fn bump_count(&mut self, name: &str) {
        *self.counts.entry(name.to_string()).or_insert(0) += 1;
    }

    fn record(&mut self, name: &str) {
        self.bump_count(name);
        self.steps.push(name.to_string());
    }

    fn summary(&self) -> Vec<String> {
        self.counts
            .iter()
            .map(|(name, count)| format!("{name}(-{count})"))
            .collect()
    }
}

fn ordered_rlm_fields(trim_priority: &[String]) -> Vec<&'static str> {
    let mut ordered: Vec<&'static str> = Vec::new();
    for raw in trim_priority {
        let key = raw.trim();
        if let Some(field) = RLM_LIST_FIELDS.iter().find(|f| **f == key) {
            if !ordered.contains(field) {
                ordered.push(field);
            }
        }
    }
    for field in RLM_LIST_FIELDS {
        if !ordered.contains(&field) {
            ordered.push(field);
        }
    }
    ordered
}

fn rlm_trim_stats(
    enforce: bool,
    counts: &BTreeMap<String, usize>,
    snippet_chars: Option<usize>,
    steps: Option<&[String]>,
) -> Value {
    let mut stats = Map::new();
    stats.insert("enforce".into(), Value::Bool(enforce));
    if !counts.is_empty() {
        let fields: Map<String, Value> = counts
            .iter()
            .map(|(name, count)| (name.clone(), json!(count)))
            .collect();
        stats.insert("fields_trimmed".into(), Value::Object(fields));
    }
    if let Some(chars) = snippet_chars {
        stats.insert("evidence_snippet_chars".into(), json!(chars));
    }
    if let Some(steps) = steps {
        stats.insert("steps".into(), json!(steps));
    }
    Value::Object(stats)
}

fn rlm_trim_pass(
    trimmer: &mut Trimmer<'_>,
    fields: &[&'static str],
    min_len: usize,
    snippet_floor: usize,
    snippet_chars: &mut Option<usize>,
) {
    while trimmer.over() {
        let mut progress = false;
        for key in fields {
            if trim_list_field(trimmer.payload, key, min_len) {
                trimmer.record(key);
                progress = true;
                break;
            }
        }
        if progress {
            trimmer.reserialize();
            continue;
        }
        if let Some(current) = max_snippet_len(trimmer.payload) {
            if current > snippet_floor {
                let next = snippet_floor.max(current.saturating_sub(20));
                if next < current && trim_evidence_snippets(trimmer.payload, next) {
                    *snippet_chars = Some(next);
                    trimmer.steps.push("evidence_snippet_chars".to_string());
                    trimmer.reserialize();
                    continue;
                }
            }
        }
        break;
    }
}

/// Trim an rlm pack payload in place until it fits the budget.
///
/// Lenient mode keeps at least one row per table on the first pass, then
/// retries with no floor; `enforce` starts at floor zero and escalates
/// to dropping whole sections. Remaining errors are returned rather than
/// raised so lenient callers can ship the best-effort text.
pub fn auto_trim_rlm_pack(
    payload: &mut Value,
    max_chars: usize,
    max_lines: usize,
    enforce: bool,
    trim_priority: &[String],
) -> TrimOutcome {
    let text = serialize_pack(payload);
    let errors = check_budget(&text, max_chars, max_lines, "rlm");
    if errors.is_empty() {
        return TrimOutcome {
            text,
            trimmed: Vec::new(),
            errors,
            trim_stats: Value::Null,
        };
    }

    let fields = ordered_rlm_fields(trim_priority);
    let mut trimmer = Trimmer {
        payload,
        max_chars,
        max_lines,
        label: "rlm",
        counts: BTreeMap::new(),
        steps: Vec::new(),
        text,
        errors,
    };
    let mut snippet_chars: Option<usize> = None;
    let snippet_floor = if enforce { 0 } else { 40 };

    rlm_trim_pass(
        &mut trimmer,
        &fields,
        usize::from(!enforce),
        snippet_floor,
        &mut snippet_chars,
    );
    if trimmer.over() && !enforce {
        rlm_trim_pass(&mut trimmer, &fields, 0, 0, &mut snippet_chars);
    }

    let mut trim_stats = Value::Null;
    if !trimmer.counts.is_empty() || snippet_chars.is_some() {
        let steps = (!enforce).then(|| trimmer.steps.clone());
        trim_stats = rlm_trim_stats(enforce, &trimmer.counts, snippet_chars, steps.as_deref());
        set_field(trimmer.payload, "pack_trim_stats", trim_stats.clone());
        trimmer.reserialize();
    }

    if trimmer.over() && !enforce && has_field(trimmer.payload, "pack_trim_stats") {
        set_field(trimmer.payload, "pack_trim_stats", json!({ "enforce": false }));
        trimmer.bump_count("drop.pack_trim_stats_details");
        trimmer.reserialize();
        if trimmer.over() {
            drop_field(trimmer.payload, "pack_trim_stats");
            trimmer.bump_count("drop.pack_trim_stats");
            trimmer.reserialize();
        }
    }

    if trimmer.over() && enforce {
        for key in RLM_DROP_FIELDS {
            if !drop_field(trimmer.payload, key) {
                continue;
            }
            trimmer.record(&format!("drop.{key}"));
            let stats = rlm_trim_stats(enforce, &trimmer.counts, snippet_chars, None);
            set_field(trimmer.payload, "pack_trim_stats", stats.clone());
            trim_stats = stats;
            trimmer.reserialize();
            if !trimmer.over() {
                break;
            }
        }
        if trimmer.over() && has_field(trimmer.payload, "pack_trim_stats") {
            set_field(trimmer.payload, "pack_trim_stats", json!({ "enforce": enforce }));
            trimmer.bump_count("drop.pack_trim_stats_details");
            trimmer.reserialize();
        }
    }

    TrimOutcome {
        trimmed: trimmer.summary(),
        text: trimmer.text,
        errors: trimmer.errors,
        trim_stats,
    }
}

/// One degradation action for the research pack, applied row/item at a
/// time in declaration order.
enum ResearchStep {
    Rows(&'static str),
    List(&'static str),
    Profile(&'static str),
    Samples(&'static str),
    DropEmptyRows(&'static str),
    Drop(&'static str),
}

const RESEARCH_STEPS: &[(&str, ResearchStep)] = &[
    ("matches", ResearchStep::Rows("matches")),
    ("reuse_candidates", ResearchStep::Rows("reuse_candidates")),
    ("manual_notes", ResearchStep::List("manual_notes")),
    ("profile.recommendations", ResearchStep::Profile("recommendations")),
    ("paths.sample", ResearchStep::Samples("paths")),
    ("docs.sample", ResearchStep::Samples("docs")),
    ("paths", ResearchStep::List("paths")),
    ("docs", ResearchStep::List("docs")),
    ("paths_discovered", ResearchStep::List("paths_discovered")),
    ("invalid_paths", ResearchStep::List("invalid_paths")),
    ("keywords_raw", ResearchStep::List("keywords_raw")),
    ("keywords", ResearchStep::List("keywords")),
    ("profile.tests_evidence", ResearchStep::Profile("tests_evidence")),
    ("profile.suggested_test_tasks", ResearchStep::Profile("suggested_test_tasks")),
    ("profile.logging_artifacts", ResearchStep::Profile("logging_artifacts")),
    ("drop.matches", ResearchStep::DropEmptyRows("matches")),
    ("drop.reuse_candidates", ResearchStep::DropEmptyRows("reuse_candidates")),
    ("drop.profile", ResearchStep::Drop("profile")),
    ("drop.stats", ResearchStep::Drop("stats")),
    ("drop.rlm_targets_path", ResearchStep::Drop("rlm_targets_path")),
    ("drop.rlm_manifest_path", ResearchStep::Drop("rlm_manifest_path")),
    ("drop.rlm_worklist_path", ResearchStep::Drop("rlm_worklist_path")),
    ("drop.rlm_nodes_path", ResearchStep::Drop("rlm_nodes_path")),
    ("drop.rlm_links_path", ResearchStep::Drop("rlm_links_path")),
    ("drop.rlm_pack_path", ResearchStep::Drop("rlm_pack_path")),
    ("drop.rlm_status", ResearchStep::Drop("rlm_status")),
    ("drop.tags", ResearchStep::Drop("tags")),
    ("drop.keywords_raw", ResearchStep::Drop("keywords_raw")),
    ("drop.keywords", ResearchStep::Drop("keywords")),
    ("drop.non_negotiables", ResearchStep::Drop("non_negotiables")),
];

fn apply_research_step(payload: &mut Value, step: &ResearchStep) -> bool {
    match step {
        ResearchStep::Rows(key) => trim_columnar_rows(payload, key),
        ResearchStep::List(key) => trim_list_field(payload, key, 0),
        ResearchStep::Profile(key) => trim_profile_list(payload, key),
        ResearchStep::Samples(key) => trim_path_samples(payload, key),
        ResearchStep::DropEmptyRows(key) => drop_columnar_if_empty(payload, key),
        ResearchStep::Drop(key) => drop_field(payload, key),
    }
}

/// Trim a research pack payload in place. Always lenient.
pub fn auto_trim_research_pack(payload: &mut Value, max_chars: usize, max_lines: usize) -> TrimOutcome {
    let text = serialize_pack(payload);
    let errors = check_budget(&text, max_chars, max_lines, "research");
    if errors.is_empty() {
        return TrimOutcome {
            text,
            trimmed: Vec::new(),
            errors,
            trim_stats: Value::Null,
        };
    }

    let mut trimmer = Trimmer {
        payload,
        max_chars,
        max_lines,
        label: "research",
        counts: BTreeMap::new(),
        steps: Vec::new(),
        text,
        errors,
    };
    for (name, step) in RESEARCH_STEPS {
        while trimmer.over() && apply_research_step(trimmer.payload, step) {
            trimmer.record(name);
            trimmer.reserialize();
        }
        if !trimmer.over() {
            break;
        }
    }

    let mut trim_stats = Value::Null;
    if !trimmer.counts.is_empty() {
        let mut stats = Map::new();
        let fields: Map<String, Value> = trimmer
            .counts
            .iter()
            .map(|(name, count)| (name.clone(), json!(count)))
            .collect();
        stats.insert("fields_trimmed".into(), Value::Object(fields));
        if !trimmer.steps.is_empty() {
            stats.insert("steps".into(), json!(trimmer.steps));
        }
        trim_stats = Value::Object(stats);
        set_field(trimmer.payload, "pack_trim_stats", trim_stats.clone());
        trimmer.reserialize();
        if trimmer.over() && has_field(trimmer.payload, "pack_trim_stats") {
            drop_field(trimmer.payload, "pack_trim_stats");
            trimmer.bump_count("drop.pack_trim_stats");
            trimmer.reserialize();
        }
    }

    TrimOutcome {
        trimmed: trimmer.summary(),
        text: trimmer.text,
        errors: trimmer.errors,
        trim_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pack_with_links(count: usize, snippet: &str) -> Value {
        let links: Vec<Value> = (0..count)
            .map(|i| json!({ "link_id": format!("l{i}"), "evidence_snippet": snippet }))
            .collect();
        json!({
            "schema": "aidd.report.pack.v1",
            "type": "rlm",
            "ticket": "T-1",
            "links": links,
            "hotspots": [{ "path": "a.rs" }, { "path": "b.rs" }],
        })
    }

    #[test]
    fn compliant_payload_is_returned_unchanged() {
        let mut payload = pack_with_links(1, "short");
        let before = serialize_pack(&payload);
        let outcome = auto_trim_rlm_pack(&mut payload, 100_000, 10_000, false, &[]);
        assert_eq!(outcome.text, before);
        assert!(outcome.trimmed.is_empty());
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.trim_stats, Value::Null);
    }

    #[test]
    fn serialization_drops_empty_fields_but_keeps_essentials_and_columnar() {
        let payload = json!({
            "schema": "aidd.report.pack.v1",
            "slug_hint": null,
            "warnings": [],
            "note": "  ",
            "matches": { "cols": ["id"], "rows": [] },
        });
        let text = serialize_pack(&payload);
        assert!(text.contains("\"schema\""));
        assert!(text.contains("\"slug_hint\""));
        assert!(text.contains("\"rows\": []"));
        assert!(!text.contains("\"warnings\""));
        assert!(!text.contains("\"note\""));
    }

    #[test]
    fn lenient_trim_keeps_one_row_then_retries_to_zero() {
        let mut payload = pack_with_links(6, &"x".repeat(50));
        let outcome = auto_trim_rlm_pack(&mut payload, 700, 240, false, &[]);
        let links = payload.get("links").and_then(Value::as_array);
        // Second lenient pass may empty the table entirely.
        assert!(links.is_none_or(|l| l.len() <= 1) || outcome.errors.is_empty());
        assert!(!outcome.trimmed.is_empty());
    }

    #[test]
    fn trim_priority_reorders_the_table_trim_order() {
        let wide = "w".repeat(200);
        let mut payload = json!({
            "schema": "aidd.report.pack.v1",
            "type": "rlm",
            "ticket": "T-1",
            "links": [{ "link_id": "l0", "evidence_snippet": wide }],
            "hotspots": [{ "path": wide }, { "path": wide }, { "path": wide }],
        });
        let priority = vec!["hotspots".to_string()];
        let before = serialize_pack(&payload).chars().count();
        let outcome = auto_trim_rlm_pack(&mut payload, before - 1, 240, false, &priority);
        // hotspots shrinks before links under the reordered priority.
        let first_step = outcome
            .trim_stats
            .get("steps")
            .and_then(Value::as_array)
            .and_then(|steps| steps.first())
            .and_then(Value::as_str);
        assert_eq!(first_step, Some("hotspots"));
    }

    #[test]
    fn snippets_shrink_toward_the_floor_in_lenient_mode() {
        let mut payload = pack_with_links(1, &"y".repeat(200));
        let outcome = auto_trim_rlm_pack(&mut payload, 260, 240, false, &[]);
        let snippet = payload
            .get("links")
            .and_then(Value::as_array)
            .and_then(|links| links.first())
            .and_then(|link| link.get("evidence_snippet"))
            .and_then(Value::as_str)
            .unwrap_or("");
        assert!(snippet.chars().count() < 200 || outcome.errors.is_empty());
    }

    #[test]
    fn enforce_mode_escalates_to_section_drops() {
        let mut payload = pack_with_links(4, &"z".repeat(100));
        let outcome = auto_trim_rlm_pack(&mut payload, 220, 240, true, &[]);
        assert!(outcome
            .trimmed
            .iter()
            .any(|entry| entry.starts_with("drop.")));
        // Essentials survive even the harshest escalation.
        assert!(outcome.text.contains("\"schema\""));
    }

    #[test]
    fn research_steps_trim_columnar_rows_first() {
        let rows: Vec<Value> = (0..8)
            .map(|i| json!([format!("id{i}"), "tok", "src/a.rs", 1, "snippet text"]))
            .collect();
        let mut payload = json!({
            "schema": "aidd.report.pack.v1",
            "type": "research",
            "ticket": "T-1",
            "matches": { "cols": ["id", "token", "file", "line", "snippet"], "rows": rows },
            "keywords": ["alpha", "beta"],
        });
        let outcome = auto_trim_research_pack(&mut payload, 400, 120);
        assert!(outcome
            .trimmed
            .iter()
            .any(|entry| entry.starts_with("matches")));
    }
}
