use std::fs;
use std::path::Path;

use rlm_config::{detect_lang, file_id_for_path, normalize_path, rev_sha_for_bytes, RlmSettings};
use rlm_store::{FileRecord, Manifest, ManifestStats, TargetsDoc, MANIFEST_SCHEMA};

use crate::util::now_utc_stamp;

/// Build the hashed, language-tagged manifest for a targets document.
///
/// Candidates that are missing, not regular files, over the byte ceiling,
/// or without a recognized language are excluded silently; the manifest
/// describes what is indexable, not what was asked for.
pub fn build_manifest(
    base_root: &Path,
    ticket: &str,
    targets: &TargetsDoc,
    targets_path: Option<String>,
    settings: &RlmSettings,
) -> Manifest {
    let mut files: Vec<FileRecord> = Vec::new();
    for raw in &targets.files {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let candidate = Path::new(raw);
        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            base_root.join(candidate)
        };
        if !resolved.is_file() {
            continue;
        }
        let Ok(data) = fs::read(&resolved) else {
            continue;
        };
        let size = data.len() as u64;
        if settings.max_file_bytes > 0 && size > settings.max_file_bytes {
            continue;
        }
        let Some(lang) = detect_lang(&resolved) else {
            continue;
        };
        let rel = if candidate.is_absolute() {
            match resolved.strip_prefix(base_root) {
                Ok(stripped) => normalize_path(stripped),
                Err(_) => normalize_path(&resolved),
            }
        } else {
            normalize_path(candidate)
        };
        files.push(FileRecord {
            file_id: file_id_for_path(Path::new(&rel)),
            path: rel,
            rev_sha: rev_sha_for_bytes(&data),
            lang: lang.to_string(),
            size,
            prompt_version: settings.prompt_version.clone(),
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    log::info!("manifest built with {} files", files.len());

    let files_total = files.len();
    Manifest {
        schema: MANIFEST_SCHEMA.to_string(),
        ticket: ticket.to_string(),
        slug_hint: targets.slug_hint.clone(),
        generated_at: now_utc_stamp(),
        targets_path,
        files,
        stats: ManifestStats { files_total },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn targets(files: &[&str]) -> TargetsDoc {
        TargetsDoc {
            files: files.iter().map(|s| s.to_string()).collect(),
            ..TargetsDoc::default()
        }
    }

    #[test]
    fn manifest_skips_missing_and_unrecognized_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        fs::write(dir.path().join("notes.unknownext"), "n/a\n").unwrap();

        let manifest = build_manifest(
            dir.path(),
            "T-1",
            &targets(&["main.rs", "absent.rs", "notes.unknownext"]),
            None,
            &RlmSettings::default(),
        );
        assert_eq!(manifest.stats.files_total, 1);
        assert_eq!(manifest.files[0].path, "main.rs");
        assert_eq!(manifest.files[0].lang, "rs");
        assert_eq!(manifest.files[0].prompt_version, "v1");
    }

    #[test]
    fn manifest_enforces_byte_ceiling_and_sorts_by_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.rs"), "fn b() {}\n").unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        fs::write(dir.path().join("big.rs"), "x".repeat(64)).unwrap();

        let settings = RlmSettings {
            max_file_bytes: 32,
            ..RlmSettings::default()
        };
        let manifest = build_manifest(
            dir.path(),
            "T-1",
            &targets(&["b.rs", "a.rs", "big.rs"]),
            None,
            &settings,
        );
        let paths: Vec<&str> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn rev_sha_tracks_bytes_and_file_id_tracks_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "one").unwrap();
        let first = build_manifest(
            dir.path(),
            "T-1",
            &targets(&["a.rs"]),
            None,
            &RlmSettings::default(),
        );
        fs::write(dir.path().join("a.rs"), "two").unwrap();
        let second = build_manifest(
            dir.path(),
            "T-1",
            &targets(&["a.rs"]),
            None,
            &RlmSettings::default(),
        );
        assert_eq!(first.files[0].file_id, second.files[0].file_id);
        assert_ne!(first.files[0].rev_sha, second.files[0].rev_sha);
    }
}
