use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use rlm_config::normalize_path;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One matched line from the external search utility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub path: String,
    pub line: u32,
    pub text: String,
}

/// Why a search call produced no results. Callers count these; they are
/// never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFailure {
    Timeout,
    Unavailable,
    Failed,
}

/// External text-search capability used by the link builder and the
/// worklist keyword scope. Production wiring is [`RgSearch`]; tests
/// substitute an in-memory double.
pub trait DefinitionSearch {
    /// Batch several literal symbols into one call over a fixed file list.
    /// Returns the first hit per symbol; a zero timeout means unbounded.
    fn find_matches(
        &self,
        root: &Path,
        symbols: &[String],
        files: &[String],
        timeout: Duration,
        max_hits: usize,
    ) -> std::result::Result<BTreeMap<String, SearchHit>, SearchFailure>;

    /// Paths (relative to `base_root`) of files containing any keyword,
    /// case-insensitive. Failures degrade to an empty set.
    fn files_with_matches(
        &self,
        root: &Path,
        keywords: &[String],
        roots: &[PathBuf],
        ignore_dirs: &BTreeSet<String>,
        base_root: &Path,
    ) -> BTreeSet<String>;
}

/// `rg`-backed implementation. Every call is a fresh blocking process,
/// polled against a deadline and killed on overrun.
#[derive(Debug, Default)]
pub struct RgSearch;

impl DefinitionSearch for RgSearch {
    fn find_matches(
        &self,
        root: &Path,
        symbols: &[String],
        files: &[String],
        timeout: Duration,
        max_hits: usize,
    ) -> std::result::Result<BTreeMap<String, SearchHit>, SearchFailure> {
        if symbols.is_empty() || files.is_empty() {
            return Ok(BTreeMap::new());
        }
        let mut cmd = Command::new("rg");
        cmd.current_dir(root);
        cmd.args(["--no-messages", "-n", "-F"]);
        if max_hits > 0 && symbols.len() == 1 {
            cmd.args(["-m", &max_hits.to_string()]);
        }
        for symbol in symbols {
            if !symbol.is_empty() {
                cmd.args(["-e", symbol]);
            }
        }
        cmd.arg("--");
        cmd.args(files);

        match run_with_deadline(cmd, timeout) {
            RgOutcome::Completed { code, stdout } => {
                if code == 0 || code == 1 {
                    Ok(parse_line_hits(&stdout, symbols))
                } else {
                    Err(SearchFailure::Failed)
                }
            }
            RgOutcome::TimedOut => Err(SearchFailure::Timeout),
            RgOutcome::Unavailable => Err(SearchFailure::Unavailable),
            RgOutcome::SpawnFailed => Err(SearchFailure::Failed),
        }
    }

    fn files_with_matches(
        &self,
        root: &Path,
        keywords: &[String],
        roots: &[PathBuf],
        ignore_dirs: &BTreeSet<String>,
        base_root: &Path,
    ) -> BTreeSet<String> {
        let escaped: Vec<String> = keywords
            .iter()
            .filter(|k| !k.is_empty())
            .map(|k| regex::escape(k))
            .collect();
        if escaped.is_empty() || roots.is_empty() {
            return BTreeSet::new();
        }
        let mut cmd = Command::new("rg");
        cmd.current_dir(root);
        cmd.args(["--files-with-matches", "--no-messages", "-i"]);
        for ignored in ignore_dirs {
            cmd.args(["-g", &format!("!{ignored}/**")]);
        }
        cmd.args(["--", &escaped.join("|")]);
        cmd.args(roots);

        let stdout = match run_with_deadline(cmd, Duration::ZERO) {
            RgOutcome::Completed { code, stdout } if code == 0 || code == 1 => stdout,
            outcome => {
                log::debug!("keyword scope search degraded: {outcome:?}");
                return BTreeSet::new();
            }
        };

        let mut hits = BTreeSet::new();
        for line in stdout.lines() {
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }
            let absolute = if Path::new(raw).is_absolute() {
                PathBuf::from(raw)
            } else {
                root.join(raw)
            };
            if let Ok(rel) = absolute.strip_prefix(base_root) {
                hits.insert(normalize_path(rel));
            }
        }
        hits
    }
}

#[derive(Debug)]
enum RgOutcome {
    Completed { code: i32, stdout: String },
    TimedOut,
    Unavailable,
    SpawnFailed,
}

/// Run the command, draining stdout on a helper thread, and kill the
/// child if it outlives the deadline. A zero deadline disables the kill.
fn run_with_deadline(mut cmd: Command, timeout: Duration) -> RgOutcome {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::null());
    cmd.stdin(Stdio::null());
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return RgOutcome::Unavailable,
        Err(_) => return RgOutcome::SpawnFailed,
    };
    let Some(mut stdout_pipe) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return RgOutcome::SpawnFailed;
    };
    let reader = std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stdout_pipe.read_to_string(&mut buf);
        buf
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if !timeout.is_zero() && started.elapsed() >= timeout {
                    kill_and_reap(&mut child);
                    let _ = reader.join();
                    return RgOutcome::TimedOut;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(_) => {
                kill_and_reap(&mut child);
                let _ = reader.join();
                return RgOutcome::SpawnFailed;
            }
        }
    };

    let stdout = reader.join().unwrap_or_default();
    RgOutcome::Completed {
        code: status.code().unwrap_or(-1),
        stdout,
    }
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Parse `path:line:text` output, assigning each symbol its first line
/// whose text contains it. Garbage lines are skipped.
fn parse_line_hits(stdout: &str, symbols: &[String]) -> BTreeMap<String, SearchHit> {
    let mut matches: BTreeMap<String, SearchHit> = BTreeMap::new();
    for line in stdout.lines() {
        let mut parts = line.splitn(3, ':');
        let (Some(raw_path), Some(raw_line), Some(raw_text)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Ok(line_no) = raw_line.parse::<u32>() else {
            continue;
        };
        let path = raw_path.trim();
        if path.is_empty() {
            continue;
        }
        let text = raw_text.trim_end();
        for symbol in symbols {
            if symbol.is_empty() || matches.contains_key(symbol) {
                continue;
            }
            if text.contains(symbol.as_str()) {
                matches.insert(
                    symbol.clone(),
                    SearchHit {
                        path: path.to_string(),
                        line: line_no,
                        text: text.to_string(),
                    },
                );
            }
        }
        if matches.len() == symbols.len() {
            break;
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn symbols(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hit_parsing_assigns_first_line_per_symbol() {
        let stdout = "src/a.rs:3:use crate::OrderService;\n\
                      src/b.rs:9:let svc = OrderService::new();\n\
                      src/b.rs:12:fetchOrders(&svc);\n";
        let hits = parse_line_hits(stdout, &symbols(&["OrderService", "fetchOrders"]));
        assert_eq!(hits["OrderService"].path, "src/a.rs");
        assert_eq!(hits["OrderService"].line, 3);
        assert_eq!(hits["fetchOrders"].line, 12);
    }

    #[test]
    fn hit_parsing_skips_garbage_lines() {
        let stdout = "not a hit\nsrc/a.rs:notanumber:text\nsrc/a.rs:4:Foo here\n";
        let hits = parse_line_hits(stdout, &symbols(&["Foo"]));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits["Foo"].line, 4);
    }

    #[test]
    fn colons_in_matched_text_survive() {
        let stdout = "src/a.kt:7:val x: Map<String, Foo> = mapOf()\n";
        let hits = parse_line_hits(stdout, &symbols(&["Foo"]));
        assert_eq!(hits["Foo"].text, "val x: Map<String, Foo> = mapOf()");
    }
}
