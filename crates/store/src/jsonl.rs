use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Read a JSONL file, skipping blank and unparsable lines. A missing file
/// reads as empty; the stores are append-only and multi-producer, so
/// availability wins over strictness here.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut items = Vec::new();
    let mut skipped = 0usize;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(item) => items.push(item),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        log::debug!("skipped {skipped} unparsable lines in {}", path.display());
    }
    items
}

/// Rewrite a JSONL file atomically (temp file + rename).
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        let mut handle = fs::File::create(&tmp)?;
        for item in items {
            serde_json::to_writer(&mut handle, item)?;
            handle.write_all(b"\n")?;
        }
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Write a pretty-printed JSON document atomically with a trailing newline.
pub fn write_json_pretty<T: Serialize>(path: &Path, payload: &T) -> Result<()> {
    let mut text = serde_json::to_string_pretty(payload)?;
    text.push('\n');
    write_text_atomic(path, &text)
}

/// Write pre-serialized text atomically (temp file + rename).
pub fn write_text_atomic(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileNode, NodeRecord};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn read_skips_garbage_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.jsonl");
        fs::write(
            &path,
            "{\"node_kind\":\"file\",\"file_id\":\"a\",\"path\":\"a.rs\"}\n\
             not json\n\
             \n\
             {\"node_kind\":\"file\",\"file_id\":\"b\",\"path\":\"b.rs\"}\n",
        )
        .unwrap();

        let nodes: Vec<NodeRecord> = read_jsonl(&path);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].node_id(), "a");
    }

    #[test]
    fn write_is_atomic_and_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("deep").join("nodes.jsonl");
        let nodes = vec![NodeRecord::File(FileNode {
            file_id: "x".into(),
            id: "x".into(),
            path: "x.rs".into(),
            ..FileNode::default()
        })];
        write_jsonl(&path, &nodes).unwrap();
        assert!(!path.with_file_name("nodes.jsonl.tmp").exists());

        let loaded: Vec<NodeRecord> = read_jsonl(&path);
        assert_eq!(loaded, nodes);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let nodes: Vec<NodeRecord> = read_jsonl(&dir.path().join("absent.jsonl"));
        assert!(nodes.is_empty());
    }
}
