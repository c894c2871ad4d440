use sha2::{Digest, Sha256};
use std::path::Path;

/// Directories skipped by default when resolving keyword scopes.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    ".git",
    ".gradle",
    ".idea",
    ".venv",
    "build",
    "dist",
    "node_modules",
    "out",
    "output",
    "target",
    "vendor",
];

const LANG_BY_EXT: &[(&str, &str)] = &[
    ("kt", "kt"),
    ("kts", "kts"),
    ("java", "java"),
    ("py", "py"),
    ("js", "js"),
    ("jsx", "js"),
    ("ts", "ts"),
    ("tsx", "ts"),
    ("go", "go"),
    ("rs", "rs"),
    ("rb", "rb"),
    ("cs", "cs"),
    ("php", "php"),
    ("swift", "swift"),
    ("scala", "scala"),
    ("sql", "sql"),
    ("sh", "sh"),
    ("bash", "sh"),
    ("zsh", "sh"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("json", "json"),
    ("toml", "toml"),
    ("xml", "xml"),
    ("properties", "properties"),
    ("gradle", "gradle"),
];

const SPECIAL_FILES: &[(&str, &str)] = &[("Makefile", "make"), ("Dockerfile", "docker")];

/// Normalize a path to forward slashes without a leading `./`.
pub fn normalize_path(path: &Path) -> String {
    let mut raw = path
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(name) => Some(name.to_string_lossy()),
            std::path::Component::ParentDir => Some("..".into()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    if raw.is_empty() {
        raw = path.to_string_lossy().trim_start_matches("./").to_string();
    }
    raw
}

/// Stable file id derived from the normalized relative path alone.
pub fn file_id_for_path(path: &Path) -> String {
    let normalized = normalize_path(path);
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}

/// Content revision hash; stable for identical bytes.
pub fn rev_sha_for_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Map a file to its language tag. `None` means the file is not indexable.
pub fn detect_lang(path: &Path) -> Option<&'static str> {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if let Some((_, lang)) = SPECIAL_FILES.iter().find(|(n, _)| *n == name) {
            return Some(lang);
        }
    }
    let ext = path.extension().and_then(|e| e.to_str())?.to_lowercase();
    LANG_BY_EXT
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, lang)| *lang)
}

/// Last segment of a dotted or `::`-qualified symbol.
pub fn symbol_tail(symbol: &str) -> &str {
    let tail = symbol.rsplit("::").next().unwrap_or(symbol);
    tail.rsplit('.').next().unwrap_or(tail)
}

/// PascalCase tail heuristic used by the types-only link fallback.
pub fn is_type_symbol(symbol: &str) -> bool {
    let tail = symbol_tail(symbol);
    let mut chars = tail.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn file_id_depends_on_normalized_path_only() {
        let plain = file_id_for_path(Path::new("src/main.rs"));
        let dotted = file_id_for_path(Path::new("./src/main.rs"));
        assert_eq!(plain, dotted);
        assert_ne!(plain, file_id_for_path(Path::new("src/lib.rs")));
    }

    #[test]
    fn rev_sha_tracks_bytes() {
        assert_eq!(rev_sha_for_bytes(b"abc"), rev_sha_for_bytes(b"abc"));
        assert_ne!(rev_sha_for_bytes(b"abc"), rev_sha_for_bytes(b"abd"));
    }

    #[test]
    fn detects_languages_and_special_files() {
        assert_eq!(detect_lang(Path::new("src/app.kt")), Some("kt"));
        assert_eq!(detect_lang(Path::new("Dockerfile")), Some("docker"));
        assert_eq!(detect_lang(Path::new("notes.org")), None);
        assert_eq!(detect_lang(Path::new("no_extension")), None);
    }

    #[test]
    fn type_symbol_heuristic_checks_qualified_tail() {
        assert!(is_type_symbol("OrderService"));
        assert!(is_type_symbol("com.acme.OrderService"));
        assert!(is_type_symbol("crate::model::Order"));
        assert!(!is_type_symbol("fetchOrders"));
        assert!(!is_type_symbol("com.acme.fetchOrders"));
        assert!(!is_type_symbol(""));
    }
}
