//! Misdirect CLI
//!
//! CLI tool for checking rule lists and testing how requests resolve.

mod load;

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use md_core::{Decision, NodeId, RequestContext, SiteTree};
use md_core::url::split_query;
use md_rules::{build_rules, export_rules};

use crate::load::{build_engine, build_fallback_engine, compile_rules, load_config, load_tree, read_rules};

#[derive(Parser)]
#[command(name = "md-cli")]
#[command(about = "Redirect rule checker and resolution tester")]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct EngineArgs {
    /// Rule files (text rule lists or .json rule documents)
    #[arg(short, long, required = true)]
    rules: Vec<PathBuf>,

    /// Engine configuration (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Page tree (JSON)
    #[arg(short, long)]
    tree: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate rule files
    Check {
        /// Rule files to check
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Engine configuration to validate alongside the rules
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Resolve a request through the mapping rules
    Resolve {
        #[command(flatten)]
        engine: EngineArgs,

        /// Request hostname
        #[arg(long)]
        host: Option<String>,

        /// Request path, optionally with a query string
        url: String,
    },

    /// Print every rule a request passes through, as JSON
    Trace {
        #[command(flatten)]
        engine: EngineArgs,

        /// Request hostname
        #[arg(long)]
        host: Option<String>,

        /// Request path, optionally with a query string
        url: String,
    },

    /// Resolve a missing page through the page tree fallbacks
    Fallback {
        /// Page tree (JSON)
        #[arg(short, long)]
        tree: PathBuf,

        /// Engine configuration (YAML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Request path
        url: String,
    },

    /// Decide what the request pipeline should do with a request
    Handle {
        #[command(flatten)]
        engine: EngineArgs,

        /// Request hostname
        #[arg(long)]
        host: Option<String>,

        /// Status the pipeline produced for the request
        #[arg(long, default_value_t = 404)]
        status: u16,

        /// Request path, optionally with a query string
        url: String,
    },

    /// Export rules to a JSON rule document
    Export {
        /// Rule files to export
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List page URLs from a page tree
    Pages {
        /// Page tree (JSON)
        #[arg(short, long)]
        tree: PathBuf,

        /// Only list pages below this node
        #[arg(short, long)]
        node: Option<u32>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Check { input, config } => cmd_check(&input, config, cli.verbose),
        Commands::Resolve { engine, host, url } => cmd_resolve(&engine, host.as_deref(), &url),
        Commands::Trace { engine, host, url } => cmd_trace(&engine, host.as_deref(), &url),
        Commands::Fallback { tree, config, url } => cmd_fallback(tree, config, &url),
        Commands::Handle {
            engine,
            host,
            status,
            url,
        } => cmd_handle(&engine, host.as_deref(), status, &url),
        Commands::Export { input, output } => cmd_export(&input, output),
        Commands::Pages { tree, node } => cmd_pages(tree, node),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn cmd_check(inputs: &[PathBuf], config: Option<PathBuf>, verbose: bool) -> Result<()> {
    if let Some(path) = config.as_deref() {
        load_config(Some(path))?;
        println!("Config '{}' is valid", path.display());
    }

    let loaded = read_rules(inputs, verbose)?;
    for (path, line) in &loaded.rejected {
        println!("  {}:{}: {} ({})", path.display(), line.line, line.error, line.text);
    }
    if !loaded.rejected.is_empty() {
        bail!("{} lines rejected", loaded.rejected.len());
    }

    let output = build_rules(loaded.rules)?;
    let stats = output.stats;

    println!("Checked {} rule files", inputs.len());
    println!("  Rules:    {} -> {} (dedupe removed {})", stats.before, stats.after, stats.deduped);

    Ok(())
}

fn cmd_resolve(engine: &EngineArgs, host: Option<&str>, url: &str) -> Result<()> {
    let engine = build_engine(&engine.rules, engine.config.as_deref(), engine.tree.as_deref())?;

    match engine.resolve(url, host) {
        Some(redirect) => println!("{} {}", redirect.status_code, redirect.target),
        None => println!("no match"),
    }

    Ok(())
}

fn cmd_trace(engine: &EngineArgs, host: Option<&str>, url: &str) -> Result<()> {
    let engine = build_engine(&engine.rules, engine.config.as_deref(), engine.tree.as_deref())?;
    let trace = engine.resolve_trace(url, host);
    println!("{}", serde_json::to_string_pretty(&trace)?);
    Ok(())
}

fn cmd_fallback(tree: PathBuf, config: Option<PathBuf>, url: &str) -> Result<()> {
    let engine = build_fallback_engine(&tree, config.as_deref())?;

    match engine.resolve_fallback(url) {
        Some(redirect) => println!("{} {}", redirect.status_code, redirect.target),
        None => println!("no fallback"),
    }

    Ok(())
}

fn cmd_handle(engine: &EngineArgs, host: Option<&str>, status: u16, url: &str) -> Result<()> {
    let engine = build_engine(&engine.rules, engine.config.as_deref(), engine.tree.as_deref())?;

    let (path, query) = split_query(url);
    let mut request = RequestContext::new(path).with_status(status);
    if let Some(query) = query {
        request = request.with_query(query);
    }
    if let Some(host) = host {
        request = request.with_host(host);
    }

    let resolution = engine.handle(&request);
    match resolution.decision {
        Decision::Redirect => {
            let source = if resolution.from_fallback {
                "fallback".to_string()
            } else {
                resolution
                    .rule_id
                    .map_or_else(|| "mapping".to_string(), |id| format!("rule {}", id))
            };
            println!(
                "redirect {} {} ({})",
                resolution.status_code,
                resolution.location.unwrap_or_default(),
                source
            );
        }
        Decision::NotFound => println!("not found"),
        Decision::Continue => println!("continue"),
    }

    Ok(())
}

fn cmd_export(inputs: &[PathBuf], output: Option<PathBuf>) -> Result<()> {
    let (rules, _) = compile_rules(inputs)?;
    let json = export_rules(&rules)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create '{}'", parent.display()))?;
                }
            }
            fs::write(&path, json).with_context(|| format!("Failed to write '{}'", path.display()))?;
            println!("Exported {} rules to '{}'", rules.len(), path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

fn cmd_pages(tree: PathBuf, node: Option<u32>) -> Result<()> {
    let tree: SiteTree = load_tree(&tree)?;

    let ids: Vec<NodeId> = match node {
        Some(node) => tree.descendants(NodeId(node))?,
        None => {
            let mut ids = Vec::new();
            for root in tree.roots() {
                ids.push(root);
                ids.extend(tree.descendants(root)?);
            }
            ids
        }
    };

    for id in ids {
        let url = tree.url_of(id).unwrap_or_default();
        let marker = if tree.is_live(id) { "" } else { " (unpublished)" };
        println!("{:>6}  {}{}", id.0, url, marker);
    }

    Ok(())
}
