//! devbox CLI
//!
//! # Usage
//!
//! ```bash
//! # Container entrypoint (ENABLE_SSH=true starts sshd)
//! devbox entrypoint
//!
//! # Run first-boot setup only
//! devbox entrypoint --init-only
//!
//! # Verify a built image
//! devbox verify devbox:full
//!
//! # Check host requirements
//! devbox preflight
//!
//! # Install pinned tools
//! devbox tools install --group base
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use devbox::bootstrap::authorized_keys::HttpKeySource;
use devbox::bootstrap::host_keys::SshKeygen;
use devbox::bootstrap::launch::ProcessLauncher;
use devbox::bootstrap::Bootstrap;
use devbox::config::{BootstrapConfig, VerifyConfig, DEFAULT_IMAGE};
use devbox::preflight::PreflightChecker;
use devbox::tools::{self, InstallOptions};
use devbox::verify::runtime::CliRuntime;
use devbox::verify::{Harness, Variant};

#[derive(Parser)]
#[command(name = "devbox")]
#[command(author, version, about = "Development container entrypoint and image verifier", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Container entrypoint: host keys, authorized keys, then sshd or a shell
    Entrypoint {
        /// Run setup and exit instead of starting sshd or a shell
        #[arg(long)]
        init_only: bool,
    },

    /// Verify a built image
    Verify {
        /// Image reference
        #[arg(default_value = DEFAULT_IMAGE)]
        image: String,

        /// Also run the full-variant checks
        #[arg(long)]
        full: bool,
    },

    /// Check host requirements
    Preflight,

    /// Pinned tool management
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },
}

#[derive(Subcommand)]
enum ToolsAction {
    /// List available tools
    List,

    /// Download, verify and install tools
    Install {
        /// Tool names
        names: Vec<String>,

        /// Install every tool
        #[arg(long)]
        all: bool,

        /// Install every tool in a group (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,

        /// Destination directory
        #[arg(long, default_value = "/usr/local/bin")]
        dest: PathBuf,

        /// Copy into the destination with sudo
        #[arg(long)]
        sudo: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Entrypoint { init_only } => cmd_entrypoint(init_only).await,
        Commands::Verify { image, full } => cmd_verify(&image, full),
        Commands::Preflight => cmd_preflight().await,
        Commands::Tools { action } => match action {
            ToolsAction::List => {
                tools::list_tools();
                Ok(0)
            }
            ToolsAction::Install {
                names,
                all,
                groups,
                dest,
                sudo,
            } => cmd_tools_install(&names, all, &groups, dest, sudo),
        },
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn cmd_entrypoint(init_only: bool) -> Result<i32> {
    let config = BootstrapConfig::from_env();
    let keygen = SshKeygen::new("root@devbox");
    let source = HttpKeySource::new(&config.keys_url, config.fetch_timeout);

    let code = Bootstrap::new(&config, &keygen, &source, &ProcessLauncher)
        .run(init_only)
        .await
        .context("entrypoint failed")?;
    Ok(code)
}

fn cmd_verify(image: &str, full: bool) -> Result<i32> {
    let config = VerifyConfig::from_env();
    let runtime = CliRuntime::new(&config.runtime);
    let variant = Variant::detect(image, full);

    let report = Harness::new(&runtime, &config.home)
        .verify(image, variant)
        .with_context(|| format!("could not verify {}", image))?;
    Ok(report.exit_code())
}

async fn cmd_preflight() -> Result<i32> {
    let verify = VerifyConfig::from_env();
    let bootstrap = BootstrapConfig::from_env();

    let report = PreflightChecker::new(&verify.runtime, &bootstrap.keys_url)
        .run_all()
        .await;
    report.print_summary();

    Ok(if report.is_ok() { 0 } else { 1 })
}

fn cmd_tools_install(
    names: &[String],
    all: bool,
    groups: &[String],
    dest: PathBuf,
    sudo: bool,
) -> Result<i32> {
    let selected = tools::select(names, all, groups);
    if selected.is_empty() {
        anyhow::bail!("no tools selected. Use NAMES, --group or --all (see `devbox tools list`)");
    }

    // fail before downloading anything
    tools::ensure_destination(&dest)?;

    let options = InstallOptions::new(dest, sudo);
    Ok(if tools::install_tools(&selected, &options) { 0 } else { 1 })
}
