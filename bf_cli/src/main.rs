//! binforge CLI - build standalone executables of AI coding CLIs.

use clap::{Args, Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bf_core::{BuildOptions, PatchMode, Paths, Registry};

mod commands;
mod display;

#[derive(Parser)]
#[command(name = "binforge")]
#[command(about = "Download, patch and compile AI coding CLIs into standalone executables")]
#[command(version)]
struct Cli {
    /// Root directory for binforge data [default: ~/.binforge]
    #[arg(long, env = "BINFORGE_ROOT", global = true)]
    root: Option<PathBuf>,

    /// Log debug output from binforge
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tools binforge can build
    Tools {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List build targets
    Targets {
        /// Render output names for this tool (default: the first tool)
        #[arg(long)]
        tool: Option<String>,

        /// Only targets for this platform
        #[arg(long)]
        platform: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the build target matching this machine
    Current,

    /// Download a tool's source package
    Download {
        /// Tool id
        tool: String,

        /// Version, dist-tag or release tag (default: latest)
        #[arg(long)]
        version: Option<String>,

        /// Download even when the cached copy is up to date
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        network: NetworkArgs,
    },

    /// Build executables for one or more targets
    Build(BuildArgs),

    /// Remove prepared sources left next to a tool's entry point
    Clean {
        /// Tool id
        tool: String,

        /// Source directory (default: the downloaded source)
        #[arg(long)]
        source_dir: Option<PathBuf>,
    },

    /// Inspect or clear downloaded sources
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Clone)]
pub enum CacheAction {
    /// List cached packages and their versions
    Status,

    /// Delete cached sources (all tools if none given)
    Clear {
        /// Tool id
        tool: Option<String>,
    },
}

#[derive(Args, Clone)]
pub struct NetworkArgs {
    /// Seconds to wait for a response or the next chunk of a download
    #[arg(long, env = "BINFORGE_DOWNLOAD_TIMEOUT", default_value = "60")]
    pub download_timeout: u64,

    /// Maximum redirects to follow per download
    #[arg(long, default_value = "10")]
    pub max_redirects: usize,
}

#[derive(Args, Clone)]
pub struct BuildArgs {
    /// Tool id
    pub tool: String,

    /// Target id (repeatable)
    #[arg(long = "target", short = 't')]
    pub targets: Vec<String>,

    /// Every target of one platform
    #[arg(long, conflicts_with_all = ["targets", "all", "current"])]
    pub platform: Option<String>,

    /// Every known target
    #[arg(long, conflicts_with_all = ["targets", "current"])]
    pub all: bool,

    /// The target matching this machine (default when nothing else is selected)
    #[arg(long, conflicts_with = "targets")]
    pub current: bool,

    /// Build from this directory instead of downloading
    #[arg(long)]
    pub source_dir: Option<PathBuf>,

    /// Output directory [default: <root>/dist]
    #[arg(long, short = 'o', env = "BINFORGE_OUT")]
    pub out: Option<PathBuf>,

    /// Source version to download (default: latest)
    #[arg(long)]
    pub version: Option<String>,

    /// Re-download the source even when cached
    #[arg(long)]
    pub force_download: bool,

    /// Compiler executable name
    #[arg(long, env = "BINFORGE_COMPILER", default_value = "bun")]
    pub compiler: String,

    /// Seconds before a compilation is killed
    #[arg(long, env = "BINFORGE_COMPILE_TIMEOUT", default_value = "600")]
    pub compile_timeout: u64,

    /// Build even when a required source patch does not apply
    #[arg(long)]
    pub lenient_patches: bool,

    /// Pass no --minify to the compiler
    #[arg(long)]
    pub no_minify: bool,

    /// Pass no --sourcemap to the compiler
    #[arg(long)]
    pub no_sourcemap: bool,

    /// Delete prepared sources after building
    #[arg(long)]
    pub clean: bool,

    #[command(flatten)]
    pub network: NetworkArgs,
}

impl NetworkArgs {
    fn apply(&self, options: &mut BuildOptions) {
        options.download_timeout = Duration::from_secs(self.download_timeout);
        options.max_redirects = self.max_redirects;
    }
}

impl BuildArgs {
    fn options(&self) -> BuildOptions {
        let mut options = BuildOptions {
            compiler: self.compiler.clone(),
            compile_timeout: Duration::from_secs(self.compile_timeout),
            patch_mode: if self.lenient_patches {
                PatchMode::Lenient
            } else {
                PatchMode::Strict
            },
            minify: !self.no_minify,
            sourcemap: !self.no_sourcemap,
            ..BuildOptions::default()
        };
        self.network.apply(&mut options);
        options
    }
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".binforge")
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,bf_core=debug,bf_io=debug,binforge=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

/// Cancels `token` on Ctrl-C so in-flight downloads and compilers stop and
/// clean up after themselves.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} cancelling...", style("==>").yellow().bold());
            token.cancel();
        }
    });
}

async fn run(cli: Cli) -> Result<(), bf_core::Error> {
    let registry = Registry::builtin()?;
    let paths = Paths::from_root(cli.root.unwrap_or_else(default_root));
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    match cli.command {
        Commands::Tools { json } => commands::list::run_tools(&registry, json),
        Commands::Targets {
            tool,
            platform,
            json,
        } => commands::list::run_targets(&registry, tool.as_deref(), platform.as_deref(), json),
        Commands::Current => commands::list::run_current(&registry),
        Commands::Download {
            tool,
            version,
            force,
            network,
        } => {
            let mut options = BuildOptions::default();
            network.apply(&mut options);
            commands::download::run_download(
                &registry, &paths, &tool, version, force, &options, &cancel,
            )
            .await
        }
        Commands::Build(args) => {
            let options = args.options();
            commands::build::run_build(&registry, &paths, &args, options, cancel).await
        }
        Commands::Clean { tool, source_dir } => {
            commands::cache::run_clean(&registry, &paths, &tool, source_dir.as_deref())
        }
        Commands::Cache { action } => match action {
            CacheAction::Status => commands::cache::run_status(&paths),
            CacheAction::Clear { tool } => {
                commands::cache::run_clear(&registry, &paths, tool.as_deref())
            }
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("error:").red().bold(), e);
        std::process::exit(1);
    }
}
