use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

use rlm_config::RlmSettings;
use rlm_graph::{
    bootstrap_nodes, build_dir_nodes, build_links, build_manifest, build_worklist_pack,
    select_target_files, verify_nodes, LinkPolicy, RgSearch, ScopeFilter,
};
use rlm_pack::{paths, write_rlm_pack, write_slice_pack, SliceRequest};
use rlm_store::{
    compact_links, read_jsonl, write_json_pretty, write_jsonl, Link, Manifest, NodeRecord,
    NodeStore, TargetsDoc, LINK_STATS_SCHEMA,
};

#[derive(Parser)]
#[command(name = "rlm")]
#[command(about = "Repository code-graph extraction and pack serialization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct CommonArgs {
    /// Ticket identifier; artifacts are keyed by it
    #[arg(long)]
    ticket: String,

    /// Repository root (defaults to the current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash and language-tag the target files into a manifest
    Manifest(ManifestArgs),

    /// Diff the manifest against the node store into a worklist pack
    Worklist(WorklistArgs),

    /// Seed placeholder nodes for every manifest entry
    Bootstrap(BootstrapArgs),

    /// Recompute directory rollup nodes from file nodes
    #[command(name = "dir-nodes")]
    DirNodes(DirNodesArgs),

    /// Check declared symbols against source text
    Verify(VerifyArgs),

    /// Build the evidence-backed cross-file link set
    Links(LinksArgs),

    /// Assemble the size-bounded rlm pack
    Pack(PackArgs),

    /// Cut a compact query slice from the stores
    Slice(SliceArgs),

    /// Deduplicate and order-normalize the stores in place
    Compact(CompactArgs),
}

#[derive(Args)]
struct ManifestArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Targets document (default: reports/research/<ticket>-rlm-targets.json)
    #[arg(long)]
    targets: Option<PathBuf>,

    /// Output path (default: reports/research/<ticket>-rlm-manifest.json)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct WorklistArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Comma-separated path prefixes overriding the configured scope
    #[arg(long)]
    paths: Option<String>,

    /// Comma-separated keywords overriding the configured scope
    #[arg(long)]
    keywords: Option<String>,

    /// Output path (default: reports/research/<ticket>-rlm.worklist.pack.json)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct BootstrapArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Replace existing nodes instead of preserving them
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct DirNodesArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct VerifyArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct LinksArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output path (default: reports/research/<ticket>-rlm.links.jsonl)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct PackArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output path (default: reports/research/<ticket>-rlm.pack.json)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct SliceArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Regex or token to match in nodes and links
    #[arg(long)]
    query: String,

    /// Maximum number of nodes to include
    #[arg(long)]
    max_nodes: Option<usize>,

    /// Maximum number of links to include
    #[arg(long)]
    max_links: Option<usize>,

    /// Comma-separated path fragments to keep
    #[arg(long)]
    paths: Option<String>,

    /// Comma-separated languages to keep
    #[arg(long)]
    lang: Option<String>,

    /// Output path (default: reports/context/<ticket>-rlm-slice-<hash>.pack.json)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct CompactArgs {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Manifest(args) => run_manifest(args),
        Commands::Worklist(args) => run_worklist(args),
        Commands::Bootstrap(args) => run_bootstrap(args),
        Commands::DirNodes(args) => run_dir_nodes(args),
        Commands::Verify(args) => run_verify(args),
        Commands::Links(args) => run_links(args),
        Commands::Pack(args) => run_pack(args),
        Commands::Slice(args) => run_slice(args),
        Commands::Compact(args) => run_compact(args),
    }
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_targets(root: &Path, ticket: &str, explicit: Option<&Path>) -> Result<(TargetsDoc, PathBuf)> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths::targets_path(root, ticket));
    let raw = fs::read_to_string(&path).with_context(|| {
        format!(
            "cannot read targets document {}; produce targets first",
            path.display()
        )
    })?;
    let doc: TargetsDoc = serde_json::from_str(&raw)
        .with_context(|| format!("invalid targets document {}", path.display()))?;
    Ok((doc, path))
}

fn load_manifest(root: &Path, ticket: &str) -> Result<Manifest> {
    let path = paths::manifest_path(root, ticket);
    let raw = fs::read_to_string(&path).with_context(|| {
        format!(
            "cannot read manifest {}; run `rlm manifest --ticket {ticket}` first",
            path.display()
        )
    })?;
    serde_json::from_str(&raw).with_context(|| format!("invalid manifest {}", path.display()))
}

fn run_manifest(args: ManifestArgs) -> Result<()> {
    let root = &args.common.root;
    let ticket = &args.common.ticket;
    let settings = RlmSettings::load(root);
    let (targets, targets_path) = load_targets(root, ticket, args.targets.as_deref())?;

    let manifest = build_manifest(
        root,
        ticket,
        &targets,
        Some(paths::rel_path(&targets_path, root)),
        &settings,
    );
    let out = args
        .out
        .unwrap_or_else(|| paths::manifest_path(root, ticket));
    write_json_pretty(&out, &manifest)?;
    log::info!(
        "manifest saved to {} ({} files)",
        paths::rel_path(&out, root),
        manifest.stats.files_total
    );
    Ok(())
}

fn run_worklist(args: WorklistArgs) -> Result<()> {
    let root = &args.common.root;
    let ticket = &args.common.ticket;
    let settings = RlmSettings::load(root);
    let manifest = load_manifest(root, ticket)?;
    let store = NodeStore::load(&paths::nodes_path(root, ticket));

    let scope_paths = split_csv(args.paths.as_deref());
    let scope_keywords = split_csv(args.keywords.as_deref());
    let scope_override = (!scope_paths.is_empty() || !scope_keywords.is_empty())
        .then(|| ScopeFilter::new(scope_paths, scope_keywords));

    let manifest_rel = paths::rel_path(&paths::manifest_path(root, ticket), root);
    let nodes_rel = paths::rel_path(&paths::nodes_path(root, ticket), root);
    let pack = build_worklist_pack(
        root,
        ticket,
        &manifest,
        &store,
        &settings,
        scope_override,
        &RgSearch,
        &manifest_rel,
        &nodes_rel,
    );
    let out = args
        .out
        .unwrap_or_else(|| paths::worklist_pack_path(root, ticket));
    write_json_pretty(&out, &pack)?;
    log::info!(
        "worklist saved to {} (status={}, entries={})",
        paths::rel_path(&out, root),
        pack.status,
        pack.entries.len()
    );
    Ok(())
}

fn run_bootstrap(args: BootstrapArgs) -> Result<()> {
    let root = &args.common.root;
    let ticket = &args.common.ticket;
    let manifest = load_manifest(root, ticket)?;
    let nodes_path = paths::nodes_path(root, ticket);
    let existing: Vec<NodeRecord> = read_jsonl(&nodes_path);

    let (combined, outcome) = bootstrap_nodes(&manifest, existing, args.force);
    let mut store = NodeStore::from_nodes(combined);
    store.compact();
    store.save_to(&nodes_path)?;
    log::info!(
        "bootstrap added {} nodes ({} total) in {}",
        outcome.added,
        outcome.total,
        paths::rel_path(&nodes_path, root)
    );
    Ok(())
}

fn run_dir_nodes(args: DirNodesArgs) -> Result<()> {
    let root = &args.common.root;
    let ticket = &args.common.ticket;
    let settings = RlmSettings::load(root);
    let nodes_path = paths::nodes_path(root, ticket);
    let mut store = NodeStore::load(&nodes_path);
    if store.is_empty() {
        bail!(
            "no nodes in {}; run `rlm bootstrap --ticket {ticket}` first",
            paths::rel_path(&nodes_path, root)
        );
    }

    let dirs = build_dir_nodes(
        &store,
        settings.dir_children_limit,
        settings.dir_summary_max_chars,
    );
    let dirs_total = dirs.len();
    store.merge(dirs);
    store.compact();
    store.save_to(&nodes_path)?;
    log::info!("dir rollup produced {dirs_total} nodes");
    Ok(())
}

fn run_verify(args: VerifyArgs) -> Result<()> {
    let root = &args.common.root;
    let ticket = &args.common.ticket;
    let settings = RlmSettings::load(root);
    let nodes_path = paths::nodes_path(root, ticket);
    let mut store = NodeStore::load(&nodes_path);
    if store.is_empty() {
        bail!(
            "no nodes in {}; run `rlm bootstrap --ticket {ticket}` first",
            paths::rel_path(&nodes_path, root)
        );
    }

    let updated = verify_nodes(root, &mut store, settings.max_file_bytes);
    store.save_to(&nodes_path)?;
    log::info!("verified {updated} file nodes");
    Ok(())
}

fn run_links(args: LinksArgs) -> Result<()> {
    let root = &args.common.root;
    let ticket = &args.common.ticket;
    let settings = RlmSettings::load(root);
    let nodes_path = paths::nodes_path(root, ticket);
    let store = NodeStore::load(&nodes_path);
    if store.is_empty() {
        bail!(
            "no nodes in {}; run `rlm bootstrap --ticket {ticket}` first",
            paths::rel_path(&nodes_path, root)
        );
    }

    let targets = load_targets(root, ticket, None)
        .map(|(doc, _)| doc)
        .unwrap_or_default();
    let manifest = load_manifest(root, ticket).ok();
    let worklist_scope = read_worklist_scope(root, ticket);
    let search = RgSearch;
    let selection = select_target_files(
        root,
        &targets,
        manifest.as_ref(),
        worklist_scope.as_ref(),
        &settings,
        &search,
    );

    let policy = LinkPolicy::from_settings(&settings);
    let outcome = build_links(root, &store, &selection.files, &policy, &search);
    // Builder output is already deduplicated and path-sorted; that order
    // is part of the artifact contract. Id-order normalization belongs to
    // `rlm compact`.
    let links = outcome.links;

    let out = args.out.unwrap_or_else(|| paths::links_path(root, ticket));
    write_jsonl(&out, &links)?;
    let stats_path = paths::links_stats_path(root, ticket);
    let sidecar = links_stats_sidecar(ticket, &links, outcome.truncated, &outcome.stats, &selection, &policy)?;
    write_json_pretty(&stats_path, &sidecar)?;
    log::info!(
        "links saved to {} ({} links, truncated={})",
        paths::rel_path(&out, root),
        links.len(),
        outcome.truncated
    );
    Ok(())
}

fn read_worklist_scope(root: &Path, ticket: &str) -> Option<rlm_graph::WorklistScope> {
    let raw = fs::read_to_string(paths::worklist_pack_path(root, ticket)).ok()?;
    let pack: rlm_graph::WorklistPack = serde_json::from_str(&raw).ok()?;
    pack.worklist_scope
}

/// Merge the link-builder counters with the target-selection record into
/// the stats sidecar consumed by the pack assembler.
fn links_stats_sidecar(
    ticket: &str,
    links: &[Link],
    truncated: bool,
    stats: &rlm_graph::LinkStats,
    selection: &rlm_graph::TargetSelection,
    policy: &LinkPolicy,
) -> Result<Value> {
    let mut sidecar = serde_json::to_value(stats)?;
    let map = sidecar
        .as_object_mut()
        .context("link stats serialized to a non-object")?;
    map.insert("schema".into(), json!(LINK_STATS_SCHEMA));
    map.insert("ticket".into(), json!(ticket));
    map.insert("generated_at".into(), json!(rlm_graph::now_utc_stamp()));
    map.insert("links_total".into(), json!(links.len()));
    map.insert("links_truncated".into(), json!(truncated));
    map.insert("target_files_source".into(), json!(selection.source));
    map.insert("target_files_total".into(), json!(selection.total));
    map.insert("target_files_trimmed".into(), json!(selection.trimmed));
    for (key, value) in &selection.scope_stats {
        map.insert(key.clone(), value.clone());
    }
    if !map.contains_key("symbols_source") {
        map.insert("symbols_source".into(), json!(policy.default_source_label()));
    }
    Ok(sidecar)
}

fn run_pack(args: PackArgs) -> Result<()> {
    let root = &args.common.root;
    let ticket = &args.common.ticket;
    let settings = RlmSettings::load(root);
    let slug_hint = load_targets(root, ticket, None)
        .ok()
        .and_then(|(doc, _)| doc.slug_hint);

    let pack_path = write_rlm_pack(
        root,
        ticket,
        slug_hint.as_deref(),
        args.out.as_deref(),
        &settings,
    )
    .with_context(|| format!("pack assembly failed; run `rlm bootstrap --ticket {ticket}` and `rlm links --ticket {ticket}` first"))?;
    log::info!("rlm pack saved to {}", paths::rel_path(&pack_path, root));
    Ok(())
}

fn run_slice(args: SliceArgs) -> Result<()> {
    let root = &args.common.root;
    let ticket = &args.common.ticket;
    let settings = RlmSettings::load(root);
    let slug_hint = load_targets(root, ticket, None)
        .ok()
        .and_then(|(doc, _)| doc.slug_hint);

    let request = SliceRequest {
        query: args.query,
        paths: split_csv(args.paths.as_deref()),
        langs: split_csv(args.lang.as_deref()),
        max_nodes: args.max_nodes,
        max_links: args.max_links,
    };
    let outcome = write_slice_pack(
        root,
        ticket,
        slug_hint.as_deref(),
        &request,
        &settings,
        args.out.as_deref(),
    )
    .with_context(|| {
        format!("slice failed; run `rlm bootstrap --ticket {ticket}` and `rlm links --ticket {ticket}` first")
    })?;
    log::info!(
        "slice saved to {} ({} nodes, {} links)",
        paths::rel_path(&outcome.output_path, root),
        outcome.nodes,
        outcome.links
    );
    Ok(())
}

fn run_compact(args: CompactArgs) -> Result<()> {
    let root = &args.common.root;
    let ticket = &args.common.ticket;
    let nodes_path = paths::nodes_path(root, ticket);
    let mut store = NodeStore::load(&nodes_path);
    let before = store.len();
    store.compact();
    store.save_to(&nodes_path)?;
    log::info!("compacted nodes: {before} -> {}", store.len());

    let links_path = paths::links_path(root, ticket);
    if links_path.is_file() {
        let links: Vec<Link> = read_jsonl(&links_path);
        let before = links.len();
        let links = compact_links(links);
        write_jsonl(&links_path, &links)?;
        log::info!("compacted links: {before} -> {}", links.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rlm_config::file_id_for_path;
    use tempfile::tempdir;

    #[test]
    fn links_command_keeps_builder_source_path_order() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        // Paths chosen so source-path order and hashed-id order disagree;
        // the written file must follow the former.
        fs::write(
            root.join("src/a.kt"),
            "class AlphaThing {\n    fun run() {\n        GammaThing()\n    }\n}\n",
        )
        .unwrap();
        fs::write(
            root.join("src/c.kt"),
            "class GammaThing {\n    fun run() {\n        AlphaThing()\n    }\n}\n",
        )
        .unwrap();
        assert!(
            file_id_for_path(Path::new("src/c.kt")) < file_id_for_path(Path::new("src/a.kt"))
        );

        let ticket = "T-9";
        let targets = TargetsDoc {
            ticket: ticket.into(),
            files: vec!["src/a.kt".into(), "src/c.kt".into()],
            ..TargetsDoc::default()
        };
        write_json_pretty(&paths::targets_path(root, ticket), &targets).unwrap();
        let settings = RlmSettings::default();
        let manifest = build_manifest(root, ticket, &targets, None, &settings);
        write_json_pretty(&paths::manifest_path(root, ticket), &manifest).unwrap();

        let (nodes, _) = bootstrap_nodes(&manifest, Vec::new(), false);
        let mut store = NodeStore::from_nodes(nodes);
        store.compact();
        for record in store.nodes_mut() {
            let Some(node) = record.as_file_mut() else {
                continue;
            };
            if node.path == "src/a.kt" {
                node.public_symbols = vec!["AlphaThing".into()];
                node.key_calls = vec!["GammaThing".into()];
            } else {
                node.public_symbols = vec!["GammaThing".into()];
                node.key_calls = vec!["AlphaThing".into()];
            }
        }
        store.save_to(&paths::nodes_path(root, ticket)).unwrap();

        run_links(LinksArgs {
            common: CommonArgs {
                ticket: ticket.into(),
                root: root.to_path_buf(),
            },
            out: None,
        })
        .unwrap();

        let links: Vec<Link> = read_jsonl(&paths::links_path(root, ticket));
        let by_path = store.paths_by_id();
        let sources: Vec<&str> = links
            .iter()
            .map(|link| {
                by_path
                    .get(&link.src_file_id)
                    .map(String::as_str)
                    .unwrap_or("")
            })
            .collect();
        assert_eq!(sources, vec!["src/a.kt", "src/c.kt"]);
    }

    #[test]
    fn csv_splitting_trims_and_drops_empties() {
        assert_eq!(split_csv(Some("a, b ,,c")), vec!["a", "b", "c"]);
        assert_eq!(split_csv(None), Vec::<String>::new());
    }

    #[test]
    fn sidecar_merges_counters_selection_and_source_label() {
        let stats = rlm_graph::LinkStats::default();
        let selection = rlm_graph::TargetSelection {
            files: vec!["a.kt".into()],
            source: "manifest".into(),
            total: 1,
            trimmed: 0,
            scope_stats: Default::default(),
        };
        let policy = LinkPolicy::from_settings(&RlmSettings::default());
        let sidecar = links_stats_sidecar("T-1", &[], false, &stats, &selection, &policy).unwrap();
        assert_eq!(sidecar["schema"], json!(LINK_STATS_SCHEMA));
        assert_eq!(sidecar["target_files_source"], json!("manifest"));
        assert_eq!(sidecar["links_total"], json!(0));
        assert!(sidecar["symbols_source"].is_string());
    }
}
