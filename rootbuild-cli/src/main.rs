//! rootbuild CLI - build packages in disposable buildroots.
//! rootbuild CLI - 在一次性构建根中构建软件包。

mod commands;
mod output;

use clap::{Parser, Subcommand};
use rootbuild_builder::{BuildError, BuildrootConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Configuration used when `--config` is not given and the file exists.
/// 未指定 `--config` 且该文件存在时使用的配置。
const DEFAULT_CONFIG: &str = "/etc/rootbuild/default.json";

/// Main CLI structure.
/// 主 CLI 结构体。
#[derive(Parser)]
#[command(name = "rootbuild")]
#[command(author, version, about = "rootbuild - build packages in disposable buildroots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON). / 配置文件（JSON）。
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Suffix for the buildroot name, for concurrent use of one config.
    /// 构建根名称的后缀，用于同一配置的并发使用。
    #[arg(long, global = true)]
    uniqueext: Option<String>,

    /// Enable verbose output. / 启用详细输出。
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress output. / 抑制输出。
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Available CLI commands.
/// 可用的 CLI 命令。
#[derive(Subcommand)]
enum Commands {
    /// Prepare the buildroot. / 准备构建根。
    Init,

    /// Build a source package. / 构建源码包。
    Rebuild {
        /// The source package. / 源码包。
        srpm: PathBuf,

        /// Remove the buildroot after the build. / 构建后删除构建根。
        #[arg(long)]
        cleanup_after: bool,
    },

    /// Unmount and remove the buildroot. / 卸载并删除构建根。
    Clean,

    /// Print the build order of source packages. / 打印源码包的构建顺序。
    Order {
        /// Source packages. / 源码包。
        #[arg(required = true)]
        srpms: Vec<PathBuf>,

        /// Read package metadata from a JSON manifest. / 从 JSON 清单读取软件包元数据。
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Build source packages group by group. / 按分组构建源码包。
    Chain {
        /// Source packages. / 源码包。
        #[arg(required = true)]
        srpms: Vec<PathBuf>,

        /// Read package metadata from a JSON manifest. / 从 JSON 清单读取软件包元数据。
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

/// Main entry point.
/// 主入口点。
fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Err(e) = run(&cli) {
        if !cli.quiet {
            output::error(&e.to_string());
        }
        std::process::exit(e.exit_code());
    }
}

fn run(cli: &Cli) -> Result<(), BuildError> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(ext) = &cli.uniqueext {
        config.root = format!("{}-{ext}", config.root);
        config.validate()?;
    }

    match &cli.command {
        Commands::Init => commands::init::run(&config),
        Commands::Rebuild {
            srpm,
            cleanup_after,
        } => commands::rebuild::run(&config, srpm, *cleanup_after),
        Commands::Clean => commands::clean::run(&config),
        Commands::Order { srpms, manifest } => commands::order::run(srpms, manifest.as_deref()),
        Commands::Chain { srpms, manifest } => {
            commands::chain::run(&config, cli.config.as_deref(), srpms, manifest.as_deref())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<BuildrootConfig, BuildError> {
    match path {
        Some(path) => Ok(BuildrootConfig::load(path)?),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            Ok(BuildrootConfig::load(Path::new(DEFAULT_CONFIG))?)
        }
        None => Ok(BuildrootConfig::default()),
    }
}

/// Log to stderr; `RUST_LOG` overrides the level picked by the flags.
/// 日志输出到 stderr；`RUST_LOG` 会覆盖由参数决定的级别。
fn init_tracing(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
