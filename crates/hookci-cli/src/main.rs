//! hookci CLI tool.

use clap::{Parser, Subcommand};
use hookci_core::BuildRequest;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::ApiClient;

#[derive(Parser)]
#[command(name = "hookci")]
#[command(about = "hookci build relay CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "HOOKCI_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the server to build a commit
    Trigger {
        #[arg(long)]
        org: String,
        #[arg(long)]
        name: String,
        /// Clone URL
        #[arg(long)]
        url: String,
        #[arg(long)]
        commit: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// Run an existing build again
    Retrigger {
        /// Build ID
        id: String,
    },
    /// Print the log of a build or deploy
    Logs {
        /// Build or deploy ID
        id: String,
        /// Treat the ID as a deploy
        #[arg(long)]
        deploy: bool,
    },
    /// List a project's builds, oldest first
    Builds {
        /// Project ID
        project_id: String,
    },
    /// Compute record ids without contacting the server
    Id {
        #[command(subcommand)]
        command: IdCommands,
    },
    /// Run the build steps locally
    Run {
        /// Path to hookci.kdl
        #[arg(short, long, env = "HOOKCI_CONFIG")]
        config: Option<PathBuf>,
        #[arg(long, default_value = "local")]
        org: String,
        #[arg(long, default_value = "project")]
        name: String,
        /// Clone URL
        #[arg(long)]
        url: String,
        #[arg(long)]
        commit: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "hookci.kdl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum IdCommands {
    /// Project id for org/name
    Project { org: String, name: String },
    /// Build id for a commit of org/name
    Build {
        org: String,
        name: String,
        commit: String,
    },
    /// Deploy id for the build of a commit of org/name
    Deploy {
        org: String,
        name: String,
        commit: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Trigger {
            org,
            name,
            url,
            commit,
            branch,
        } => {
            let client = ApiClient::new(&cli.api_url)?;
            let request = BuildRequest {
                org,
                name,
                url,
                commit_id: commit,
                branch,
            };
            request.validate()?;
            commands::builds::trigger(&client, request).await?;
        }
        Commands::Retrigger { id } => {
            let client = ApiClient::new(&cli.api_url)?;
            commands::builds::retrigger(&client, &id).await?;
        }
        Commands::Logs { id, deploy } => {
            let client = ApiClient::new(&cli.api_url)?;
            commands::builds::logs(&client, &id, deploy).await?;
        }
        Commands::Builds { project_id } => {
            let client = ApiClient::new(&cli.api_url)?;
            commands::builds::list(&client, &project_id).await?;
        }
        Commands::Id { command } => match command {
            IdCommands::Project { org, name } => commands::ids::project(&org, &name),
            IdCommands::Build { org, name, commit } => commands::ids::build(&org, &name, &commit),
            IdCommands::Deploy { org, name, commit } => {
                commands::ids::deploy(&org, &name, &commit)
            }
        },
        Commands::Run {
            config,
            org,
            name,
            url,
            commit,
            branch,
        } => {
            commands::run::run_local(commands::run::LocalRun {
                config: config.as_deref(),
                org: &org,
                name: &name,
                url: &url,
                branch: &branch,
                commit: &commit,
            })
            .await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}
