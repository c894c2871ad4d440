use chrono::Utc;
use rlm_config::normalize_path;
use std::path::{Path, PathBuf};

/// UTC timestamp in the artifact format, second precision.
pub fn now_utc_stamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Resolve an artifact-relative source path against the base root.
pub(crate) fn resolve_source(base_root: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_root.join(path)
    }
}

/// Path-prefix and keyword scope shared by the worklist differ and the
/// link builder's target narrowing. Prefixes are normalized to POSIX
/// separators without leading `./` or trailing `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    pub paths: Vec<String>,
    pub keywords: Vec<String>,
}

impl ScopeFilter {
    pub fn new<P, K>(paths: P, keywords: K) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        Self {
            paths: normalize_prefixes(paths),
            keywords: dedup_nonempty(keywords),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.keywords.is_empty()
    }

    pub fn matches_path(&self, path: &str) -> bool {
        if self.paths.is_empty() {
            return true;
        }
        let normalized = normalize_path(Path::new(path));
        self.paths
            .iter()
            .any(|prefix| normalized == *prefix || normalized.starts_with(&format!("{prefix}/")))
    }

    pub fn filter_paths(&self, paths: &[String]) -> Vec<String> {
        paths
            .iter()
            .filter(|path| !path.trim().is_empty())
            .filter(|path| self.matches_path(path))
            .cloned()
            .collect()
    }

    /// Existing directories the keyword search should cover.
    pub fn keyword_roots(&self, base_root: &Path) -> Vec<PathBuf> {
        let roots: Vec<PathBuf> = if self.paths.is_empty() {
            vec![base_root.to_path_buf()]
        } else {
            self.paths
                .iter()
                .map(|prefix| base_root.join(prefix))
                .collect()
        };
        roots.into_iter().filter(|path| path.exists()).collect()
    }
}

pub(crate) fn normalize_prefixes<I>(values: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut prefixes: Vec<String> = Vec::new();
    for raw in values {
        let text = raw.as_ref().trim().replace('\\', "/");
        let cleaned = text
            .trim_start_matches("./")
            .trim_end_matches('/')
            .to_string();
        if !cleaned.is_empty() && !prefixes.contains(&cleaned) {
            prefixes.push(cleaned);
        }
    }
    prefixes
}

fn dedup_nonempty<I>(values: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut items: Vec<String> = Vec::new();
    for raw in values {
        let text = raw.as_ref().trim().to_string();
        if !text.is_empty() && !items.contains(&text) {
            items.push(text);
        }
    }
    items
}
