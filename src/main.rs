//! # Produce Scout CLI (`scout`)
//!
//! Watches a drop directory for a produce photo and resolves it against the
//! picklist.
//!
//! ## Usage
//!
//! ```bash
//! scout [--config ./config/scout.toml] <DIR>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scout <DIR>` | Wait for one new image in `DIR` and resolve it |
//! | `scout --loop <DIR>` | Resolve every new image until Ctrl-C |
//! | `scout classify <IMAGE>` | Resolve an existing image file |
//! | `scout picklist` | Print the loaded catalog |
//! | `scout serve` | Start the HTTP front end |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use produce_scout::config::{self, Config};
use produce_scout::gateway::{load_prompt, ClassificationGateway};
use produce_scout::logging;
use produce_scout::matcher::Matcher;
use produce_scout::picklist::Picklist;
use produce_scout::progress::ProgressMode;
use produce_scout::resolver::{Report, Resolver, RetryPolicy};
use produce_scout::server;
use produce_scout::vision;
use produce_scout::watcher::{DirectoryWatcher, Shutdown};

/// Produce Scout: resolve produce photos against a PLU picklist.
#[derive(Parser)]
#[command(
    name = "scout",
    about = "Produce Scout: classify produce photos and resolve them against a PLU picklist",
    version,
    args_conflicts_with_subcommands = true,
    long_about = "Watches a directory for a newly dropped produce photo, asks a vision model \
    what it shows, and matches the answer against a picklist of known products. When several \
    products match, the model is asked a second time to choose among them."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/scout.toml`. Built-in defaults are used when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/scout.toml")]
    config: PathBuf,

    /// Print reports as JSON instead of status lines.
    #[arg(long, global = true)]
    json: bool,

    /// Stage output on stderr. Defaults to `human` on a terminal, `off` otherwise.
    #[arg(long, global = true, value_parser = ["off", "human", "json"])]
    progress: Option<String>,

    /// Debug-level diagnostics.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep watching after each report until interrupted.
    #[arg(long = "loop")]
    keep_watching: bool,

    /// Directory to watch for new images (created if missing).
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an existing image file without watching.
    Classify {
        /// Path to the image.
        image: PathBuf,
    },

    /// Print the loaded picklist.
    Picklist,

    /// Start the HTTP front end.
    ///
    /// Binds to `[server].bind` and accepts images on `POST /classify`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    if cli.command.is_none() && cli.dir.is_none() {
        println!("Error: missing directory to watch.\nUsage: scout [--config <PATH>] <DIR>");
        return Ok(());
    }

    let cfg = config::load_config_or_default(&cli.config)?;
    let progress = match cli.progress.as_deref() {
        Some("off") => ProgressMode::Off,
        Some("json") => ProgressMode::Json,
        Some(_) => ProgressMode::Human,
        None => ProgressMode::default_for_tty(),
    };

    match cli.command {
        Some(Commands::Picklist) => {
            list_picklist(&cfg);
        }
        Some(Commands::Serve) => {
            server::run_server(&cfg, Shutdown::on_ctrl_c()).await?;
        }
        Some(Commands::Classify { image }) => {
            let mut resolver = build_resolver(&cfg)?
                .with_progress(progress.reporter())
                .with_shutdown(Shutdown::on_ctrl_c());
            let report = resolver.resolve_file(&image).await?;
            print_report(&report, cli.json)?;
        }
        None => {
            if let Some(dir) = cli.dir {
                run_watch(&cfg, &dir, cli.keep_watching, cli.json, progress).await?;
            }
        }
    }

    Ok(())
}

fn build_resolver(cfg: &Config) -> Result<Resolver> {
    let model = vision::create_model(&cfg.model)?;

    let picklist = Picklist::load(&cfg.picklist.path);
    if picklist.is_empty() {
        tracing::warn!(path = %cfg.picklist.path.display(), "picklist is empty; nothing will match");
    }

    let gateway = ClassificationGateway::new(model, load_prompt(&cfg.prompt.path));
    Ok(Resolver::new(
        gateway,
        Matcher::new(Arc::new(picklist)),
        RetryPolicy::from_config(&cfg.retry),
        cfg.refine.clone(),
    ))
}

async fn run_watch(
    cfg: &Config,
    dir: &Path,
    keep_watching: bool,
    json: bool,
    progress: ProgressMode,
) -> Result<()> {
    let watcher = DirectoryWatcher::new(dir, cfg.watcher.poll_interval())?;
    let shutdown = Shutdown::on_ctrl_c();
    let mut resolver = build_resolver(cfg)?
        .with_progress(progress.reporter())
        .with_shutdown(shutdown.clone());

    if !json {
        println!("Watching {}", watcher.dir().display());
    }

    if keep_watching {
        let summary = resolver
            .run_continuously(&watcher, |report| print_report(report, json))
            .await?;
        tracing::info!(reports = summary.reports, failures = summary.failures, "watch loop stopped");
    } else {
        let report = resolver.run(&watcher, shutdown.wait()).await?;
        print_report(&report, json)?;
    }

    Ok(())
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        println!("{}", report.render_human());
    }
    Ok(())
}

fn list_picklist(cfg: &Config) {
    let picklist = Picklist::load(&cfg.picklist.path);

    println!("{:<32} {:>8} {:>10}", "FRUIT", "PLU", "PRICE");
    for product in picklist.iter() {
        println!(
            "{:<32} {:>8} {:>10.2}",
            product.name, product.code, product.price
        );
    }
    println!("{} products from {}", picklist.len(), cfg.picklist.path.display());
}
