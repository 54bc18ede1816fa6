mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stowage")]
#[command(about = "Ship backup volumes to object storage")]
#[command(version)]
struct Cli {
    /// Path to the Stowage config directory (default: ~/.stowage)
    #[arg(long, global = true, env = "STOWAGE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration
    Init,

    /// Show current configuration
    Config,

    /// Upload volume files to the configured target
    Send {
        /// Volume files; each is stored under its file name
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List objects in the configured target
    List {
        /// Only list names starting with this prefix
        prefix: Option<String>,
    },

    /// Restore archived objects if needed, then download them
    Fetch {
        #[arg(required = true)]
        keys: Vec<String>,
        /// Destination directory
        #[arg(long)]
        dest: PathBuf,
    },

    /// Delete objects from the configured target
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stowage=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.config_dir {
        Some(ref dir) => dir.clone(),
        None => stowage_core::config::StowageConfig::default_base_dir()?,
    };

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Init => commands::init::run(&base_dir),
        Commands::Config => commands::config::run(&base_dir),
        Commands::Send { ref files } => rt.block_on(commands::send::run(files, &base_dir)),
        Commands::List { ref prefix } => {
            rt.block_on(commands::list::run(prefix.as_deref().unwrap_or(""), &base_dir))
        }
        Commands::Fetch { ref keys, ref dest } => {
            rt.block_on(commands::fetch::run(keys, dest, &base_dir))
        }
        Commands::Delete { ref keys } => rt.block_on(commands::delete::run(keys, &base_dir)),
    }
}
