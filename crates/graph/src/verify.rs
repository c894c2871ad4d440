use std::fs;
use std::path::Path;

use rlm_config::symbol_tail;
use rlm_store::{FileNode, NodeStore, Verification};

use crate::util::resolve_source;

/// Check every file node's declared symbols against its source text and
/// assign a verification state in place. Returns the number of file
/// nodes updated.
///
/// Unreadable, missing, or over-ceiling sources fail closed: the node is
/// marked `failed` with no missing tokens, so downstream stages drop it
/// from the symbol index rather than trusting stale facts.
pub fn verify_nodes(base_root: &Path, store: &mut NodeStore, max_file_bytes: u64) -> usize {
    let mut updated = 0usize;
    for record in store.nodes_mut() {
        let Some(node) = record.as_file_mut() else {
            continue;
        };
        updated += 1;
        if node.path.trim().is_empty() {
            fail_closed(node);
            continue;
        }
        let source = resolve_source(base_root, &node.path);
        let Ok(data) = fs::read(&source) else {
            fail_closed(node);
            continue;
        };
        if max_file_bytes > 0 && data.len() as u64 > max_file_bytes {
            fail_closed(node);
            continue;
        }
        let text = String::from_utf8_lossy(&data);

        let expected: Vec<&str> = node
            .public_symbols
            .iter()
            .chain(node.type_refs.iter())
            .chain(node.key_calls.iter())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        let missing: Vec<String> = expected
            .iter()
            .filter(|symbol| !token_present(&text, symbol))
            .map(|s| s.to_string())
            .collect();

        node.verification = if expected.is_empty() {
            Verification::Passed
        } else if missing.len() >= expected.len() {
            Verification::Failed
        } else if missing.is_empty() {
            Verification::Passed
        } else {
            Verification::Partial
        };
        node.missing_tokens = missing;
    }
    updated
}

/// A token matches if it, or its last `.`/`::` segment, occurs literally.
/// Deliberately permissive; this is a textual proxy, not a compiler.
fn token_present(text: &str, symbol: &str) -> bool {
    if text.contains(symbol) {
        return true;
    }
    let tail = symbol_tail(symbol);
    tail != symbol && text.contains(tail)
}

fn fail_closed(node: &mut FileNode) {
    node.verification = Verification::Failed;
    node.missing_tokens = Vec::new();
}
