use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use quick_proxy_setup::Result;
use quick_proxy_setup::address::SSH_CONNECTION_VAR;
use quick_proxy_setup::config::RecipeDoc;
use quick_proxy_setup::executor::{ExecCtx, PreparedRecipe, StdoutSink};
use quick_proxy_setup::planner::Plan;
use quick_proxy_setup::targets::Operation;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a recipe and run its pipeline
    Run {
        /// Path to a recipe (JSON, or TOML by extension)
        recipe: PathBuf,
        /// Report the steps without touching any file
        #[arg(long)]
        dry_run: bool,
    },
    /// Load a recipe and print the ordered steps
    Plan {
        /// Path to a recipe (JSON, or TOML by extension)
        recipe: PathBuf,
    },
    /// Print the recipe with the client address substituted
    Resolve {
        /// Path to a recipe (JSON, or TOML by extension)
        recipe: PathBuf,
    },
}

fn main() {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args.cmd) {
        eprintln!("qps: {e} [{}]", e.kind().as_str());
        std::process::exit(1);
    }
}

fn run(cmd: Command) -> Result<()> {
    match cmd {
        Command::Run { recipe, dry_run } => cmd_run(&recipe, dry_run),
        Command::Plan { recipe } => cmd_plan(&recipe),
        Command::Resolve { recipe } => cmd_resolve(&recipe),
    }
}

fn ssh_connection() -> Option<String> {
    std::env::var(SSH_CONNECTION_VAR).ok()
}

fn endpoint(ip: &str, port: Option<i64>) -> String {
    match port {
        Some(p) => format!("{ip}:{p}"),
        None => "(not set)".into(),
    }
}

fn cmd_run(path: &Path, dry_run: bool) -> Result<()> {
    let doc = quick_proxy_setup::config::load(path)?;
    let run = PreparedRecipe::new(&doc, ssh_connection)?;
    if run.plan.is_empty() {
        warn!(recipe = %path.display(), "pipeline is empty; nothing to do");
    }

    println!("[quick-proxy-setup] Start.");
    if run.plan.runs(Operation::Proxy) {
        let p = &run.params;
        println!("  [HTTP Proxy Server] {}", endpoint(&p.ip, p.http_port));
        println!("  [Socks Proxy Server] {}", endpoint(&p.ip, p.socks_port));
    }

    let mut ctx = ExecCtx::new(dry_run, Arc::new(StdoutSink::default()));
    run.execute(&mut ctx)?;

    println!("[quick-proxy-setup] Done.");
    Ok(())
}

fn cmd_plan(path: &Path) -> Result<()> {
    let doc = quick_proxy_setup::config::load(path)?;
    let plan = Plan::from_pipeline(&doc.recipe.pipeline)?;

    for (i, group) in plan.groups().iter().enumerate() {
        for op in &group.ops {
            println!(
                "{:>2}. {:<22}  {:<14} {}",
                i + 1,
                group.step_id(*op),
                group.kind,
                op
            );
        }
    }
    for (kind, n) in plan.ops_per_kind() {
        println!("    {kind}: {n} step(s)");
    }
    Ok(())
}

fn cmd_resolve(path: &Path) -> Result<()> {
    let doc = quick_proxy_setup::config::load(path)?;
    let params = doc.proxy_params(ssh_connection)?;

    let mut resolved: RecipeDoc = doc.clone();
    resolved.recipe.network.ip = params.ip;
    let s = serde_json::to_string_pretty(&resolved.recipe)?;
    println!("{s}");
    Ok(())
}
