// ABOUTME: Entry point for the codenest binary
// ABOUTME: Parses subcommands, runs the server or a one-shot session command and maps errors to exit codes

use clap::{Parser, Subcommand};
use codenest_api::OwnerDirectory;
use codenest_cli::commands;
use codenest_cli::config::Config;
use codenest_sandbox::default_resource_profile;
use colored::*;
use std::net::IpAddr;
use std::process;

#[derive(Parser)]
#[command(name = "codenest")]
#[command(about = "Codenest - per-user and per-project Docker sandbox sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Port to listen on (overrides CODENEST_API_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind (overrides CODENEST_API_HOST)
        #[arg(long)]
        host: Option<IpAddr>,
    },
    /// Run a command in a project's sandbox
    Exec {
        user: String,
        project: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show a project's sandbox status
    Status { user: String, project: String },
    /// Stop a project's sandbox
    Stop { user: String, project: String },
    /// Remove a project's sandbox, keeping its workspace
    Delete { user: String, project: String },
    /// List all sandbox sessions
    Sessions,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    codenest_cli::init_tracing();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(0) => {}
        Ok(code) => process::exit(i32::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<i64> {
    let config = Config::from_env()?;

    if let Commands::Serve { port, host } = command {
        let config = config.with_overrides(host, port)?;
        codenest_cli::server::run_server(config).await?;
        return Ok(0);
    }

    let manager = codenest_cli::build_manager(&config).await?;
    let owners = OwnerDirectory::new(config.workspace_root.clone(), default_resource_profile());

    let code = match command {
        Commands::Exec {
            user,
            project,
            command,
        } => commands::exec(&manager, &owners, &user, &project, &command.join(" ")).await?,
        Commands::Status { user, project } => {
            commands::status(&manager, &owners, &user, &project).await?;
            0
        }
        Commands::Stop { user, project } => {
            commands::stop(&manager, &owners, &user, &project).await?;
            0
        }
        Commands::Delete { user, project } => {
            commands::delete(&manager, &owners, &user, &project).await?;
            0
        }
        Commands::Sessions => {
            commands::sessions(&manager).await?;
            0
        }
        Commands::Serve { .. } => 0,
    };

    manager.shutdown();
    Ok(code)
}
