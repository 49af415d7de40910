use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use civic_report::config::{CivicToml, DEFAULT_CONFIG_FILE};

mod cmd;

#[derive(Parser)]
#[command(name = "civic")]
#[command(version, about = "Citizen issue reporting service")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to civic.toml. A missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Database path. Overrides civic.toml and CIVIC_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP and WebSocket server
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for a local front-end dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and seed the default departments
    Init,
    /// Manage admin accounts
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Manage departments
    Department {
        #[command(subcommand)]
        command: DepartmentCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum AdminCommands {
    /// Create a sign-in and its admin profile
    Create {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CIVIC_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "staff")]
        role: String,
        /// Department name
        #[arg(long)]
        department: Option<String>,
    },
    /// List admin accounts
    List {
        /// Include deactivated accounts
        #[arg(long)]
        all: bool,
    },
    /// Deactivate an admin account
    Deactivate { email: String },
    /// Reactivate a deactivated admin account
    Activate { email: String },
}

#[derive(Subcommand, Clone)]
pub enum DepartmentCommands {
    /// Add a department
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        contact_email: Option<String>,
        #[arg(long)]
        contact_phone: Option<String>,
    },
    /// List departments
    List,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default civic.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = CivicToml::load_or_default(&cli.config)?;
    config.apply_env();
    if let Some(db_path) = &cli.db_path {
        config.database.path = db_path.clone();
    }

    let _log_guard = civic_report::logging::init_tracing(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { host, port, dev } => {
            cmd::cmd_serve(&config, host.clone(), *port, *dev).await?;
        }
        Commands::Init => cmd::cmd_init(&config)?,
        Commands::Admin { command } => cmd::cmd_admin(&config, command.clone())?,
        Commands::Department { command } => cmd::cmd_department(&config, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&cli.config, &config, command.clone())?,
    }

    Ok(())
}
