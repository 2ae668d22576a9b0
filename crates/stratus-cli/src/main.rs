//! stratus CLI - deploy serverless functions from definition files.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stratus_control::config::CONFIG_FILE;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use commands::Context;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Deploy serverless functions from definition files")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Control plane endpoint (overrides stratus.toml)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the code package and write it out
    Archive {
        /// Source directory
        #[arg(long)]
        src: Option<PathBuf>,

        /// Output file, `-` for stdout
        #[arg(long, default_value = "function.zip")]
        dest: PathBuf,

        /// Ignore file (defaults to <src>/.stratusignore)
        #[arg(long)]
        exclude_file: Option<PathBuf>,

        /// Store symlinks as links instead of following them
        #[arg(long)]
        symlink: bool,
    },

    /// Show differences between the definitions and the deployed function
    Diff {
        /// Source directory or zip, for --code-sha256
        #[arg(long)]
        src: Option<PathBuf>,

        /// Compare the code digest as well
        #[arg(long)]
        code_sha256: bool,

        /// Function definition file
        #[arg(long)]
        function: Option<PathBuf>,

        /// Function URL definition file
        #[arg(long)]
        function_url: Option<PathBuf>,
    },

    /// Deploy the function, its code and its function URL
    Deploy {
        /// Source directory or zip
        #[arg(long)]
        src: Option<PathBuf>,

        /// Function definition file
        #[arg(long)]
        function: Option<PathBuf>,

        /// Function URL definition file
        #[arg(long)]
        function_url: Option<PathBuf>,

        /// Show what would change without changing it
        #[arg(long)]
        dry_run: bool,

        /// Leave the deployed code alone
        #[arg(long)]
        skip_code: bool,

        /// Store symlinks as links instead of following them
        #[arg(long)]
        symlink: bool,
    },

    /// Write definition files from a deployed function
    Init {
        /// Name of the deployed function
        #[arg(long)]
        function_name: String,

        /// Alias or version of the function URL
        #[arg(long)]
        qualifier: Option<String>,

        /// Overwrite existing definition files
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current call");
            on_interrupt.cancel();
        }
    });

    let result = match Context::load(&cli.config, cli.endpoint, cancel) {
        Ok(context) => run(cli.command, &context).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, context: &Context) -> anyhow::Result<()> {
    match command {
        Commands::Archive {
            src,
            dest,
            exclude_file,
            symlink,
        } => {
            commands::archive::run(
                context,
                commands::archive::ArchiveArgs {
                    src,
                    dest,
                    exclude_file,
                    symlink,
                },
            )
            .await
        }
        Commands::Diff {
            src,
            code_sha256,
            function,
            function_url,
        } => {
            commands::diff::run(
                context,
                commands::diff::DiffArgs {
                    src,
                    code_sha256,
                    function,
                    function_url,
                },
            )
            .await
        }
        Commands::Deploy {
            src,
            function,
            function_url,
            dry_run,
            skip_code,
            symlink,
        } => {
            commands::deploy::run(
                context,
                commands::deploy::DeployArgs {
                    src,
                    function,
                    function_url,
                    dry_run,
                    skip_code,
                    symlink,
                },
            )
            .await
        }
        Commands::Init {
            function_name,
            qualifier,
            force,
        } => {
            commands::init::run(
                context,
                commands::init::InitArgs {
                    function_name,
                    qualifier,
                    force,
                },
            )
            .await
        }
    }
}
