//! provisio: operator CLI for the IaC deployment core.
//!
//! ```text
//! provisio design create --file arch.json --design-type cloud
//! provisio iac add --design <id> --tool terraform --file main.tf
//! provisio deploy --design <id> --version <version-id> --var region=\"eu-west-1\"
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use provisio_core::{DeploymentStatus, DesignType, IacTool, ProvisioConfig};
use provisio_state::StateStore;
use tracing::info;

mod commands;

#[derive(Parser)]
#[command(
    name = "provisio",
    about = "Provisio: versioned IaC deployment orchestration",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to provisio.toml. Defaults apply when the file is absent.
    #[arg(short, long, global = true, default_value = "provisio.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the target environment is reachable.
    Precheck {
        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Manage infrastructure designs.
    Design {
        #[command(subcommand)]
        action: DesignAction,
    },
    /// Manage versioned IaC sources.
    Iac {
        #[command(subcommand)]
        action: IacAction,
    },
    /// Deploy an IaC version and wait for the run to finish.
    #[command(disable_version_flag = true)]
    Deploy {
        #[arg(long)]
        design: String,
        /// IaC version id.
        #[arg(long)]
        version: String,
        /// Skip the advisory reachability precheck.
        #[arg(long)]
        no_precheck: bool,
        /// Deployment variable as key=value. JSON values are parsed, anything
        /// else is taken as a string.
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, serde_json::Value)>,
    },
    /// Roll back a successful deployment and wait for it to finish.
    Rollback {
        #[arg(long)]
        deployment: String,
    },
    /// Show one deployment.
    Status {
        #[arg(long)]
        deployment: String,
    },
    /// List deployments of a design.
    Deployments {
        #[arg(long)]
        design: String,
        #[arg(long)]
        status: Option<DeploymentStatus>,
    },
}

#[derive(Subcommand)]
enum DesignAction {
    /// Register a design from an architecture JSON document.
    Create {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long, default_value = "cloud")]
        design_type: DesignType,
    },
    /// List stored designs.
    List,
}

#[derive(Subcommand)]
enum IacAction {
    /// Store a source file as the new current version.
    Add {
        #[arg(long)]
        design: String,
        #[arg(long)]
        tool: IacTool,
        #[arg(short, long)]
        file: PathBuf,
        /// Record the version as modified by a user prompt.
        #[arg(long)]
        prompt_modified: bool,
    },
    /// Version history of a design, newest first.
    List {
        #[arg(long)]
        design: String,
    },
    /// Show the current version for a design and tool.
    Current {
        #[arg(long)]
        design: String,
        #[arg(long)]
        tool: IacTool,
    },
    /// Run the heuristic validator on a file without storing it.
    Validate {
        #[arg(long)]
        tool: IacTool,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Line diff between two versions.
    Diff { from: String, to: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let mut config = ProvisioConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    apply_overrides(
        &mut config,
        std::env::var("PROVISIO_DATA_DIR").ok(),
        std::env::var("PROVISIO_RETAIN_WORKSPACES").ok(),
    )?;

    let state = || open_state(&config.state.data_dir);
    match cli.command {
        Commands::Precheck { json } => commands::precheck::run(&config, json).await,
        Commands::Design { action } => match action {
            DesignAction::Create {
                file,
                provider,
                design_type,
            } => commands::design::create(&state()?, &file, provider, design_type),
            DesignAction::List => commands::design::list(&state()?),
        },
        Commands::Iac { action } => match action {
            IacAction::Add {
                design,
                tool,
                file,
                prompt_modified,
            } => commands::iac::add(&state()?, &design, tool, &file, prompt_modified).await,
            IacAction::List { design } => commands::iac::list(&state()?, &design),
            IacAction::Current { design, tool } => commands::iac::current(&state()?, &design, tool),
            IacAction::Validate { tool, file } => commands::iac::validate(tool, &file),
            IacAction::Diff { from, to } => commands::iac::diff(&state()?, &from, &to),
        },
        Commands::Deploy {
            design,
            version,
            no_precheck,
            vars,
        } => {
            let variables = vars.into_iter().collect();
            commands::deploy::deploy(&config, state()?, design, version, variables, !no_precheck).await
        }
        Commands::Rollback { deployment } => {
            commands::deploy::rollback(&config, state()?, &deployment).await
        }
        Commands::Status { deployment } => commands::deploy::status(&state()?, &deployment),
        Commands::Deployments { design, status } => {
            commands::deploy::list(&state()?, &design, status)
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => "info,provisio=debug".parse()?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn open_state(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let db_path = data_dir.join("provisio.redb");
    let state = StateStore::open(&db_path)
        .with_context(|| format!("failed to open state store at {}", db_path.display()))?;
    info!(path = ?db_path, "state store opened");
    Ok(state)
}

/// Apply `PROVISIO_DATA_DIR` / `PROVISIO_RETAIN_WORKSPACES` on top of the file.
fn apply_overrides(
    config: &mut ProvisioConfig,
    data_dir: Option<String>,
    retain: Option<String>,
) -> anyhow::Result<()> {
    if let Some(dir) = data_dir.filter(|d| !d.is_empty()) {
        config.state.data_dir = PathBuf::from(dir);
    }
    if let Some(flag) = retain {
        config.execution.retain_workspaces = match flag.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            other => anyhow::bail!("PROVISIO_RETAIN_WORKSPACES: expected a boolean, got {other:?}"),
        };
    }
    Ok(())
}

fn parse_var(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in {raw:?}"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
