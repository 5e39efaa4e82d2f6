//! Visitgate CLI
//!
//! Terminal front end for the Visitgate visitor registration engine.
//!
//! # Usage
//!
//! ```bash
//! visitgate form c1
//! visitgate schema c1 --format json
//! visitgate status c1 --label "Mobile No" --number 9876543210
//! visitgate session login watchmen 9876543210
//! visitgate config set company_id c1
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use visitgate_client::{ClientConfig, Role};

mod commands;
mod config;
mod output;

#[derive(Parser)]
#[command(name = "visitgate")]
#[command(author = "Visitgate")]
#[command(version)]
#[command(about = "Visitgate visitor check-in kiosk and admin tools", long_about = None)]
struct Cli {
    /// API endpoint URL
    #[arg(long, env = "VISITGATE_API_URL")]
    api_url: Option<String>,

    /// Engine config file (JSON)
    #[arg(long, env = "VISITGATE_CLIENT_CONFIG")]
    client_config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, env = "VISITGATE_FORMAT")]
    format: Option<output::OutputFormat>,

    /// Profile name from config file
    #[arg(long, short, env = "VISITGATE_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the visitor form for a company
    Form {
        /// Company id; defaults to the configured company_id
        company_id: Option<String>,
    },
    /// Show a company's form fields
    Schema { company_id: Option<String> },
    /// Check whether a visitor is currently checked in
    Status {
        company_id: Option<String>,
        #[arg(long)]
        label: String,
        #[arg(long)]
        number: String,
    },
    /// Manage staff sessions
    Session {
        #[command(subcommand)]
        action: SessionCommands,
    },
    /// Configure CLI
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    SuperAdmin,
    CompanyAdmin,
    Watchmen,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::SuperAdmin => Role::SuperAdmin,
            RoleArg::CompanyAdmin => Role::CompanyAdmin,
            RoleArg::Watchmen => Role::Watchmen,
        }
    }
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Sign in and store the token
    Login {
        role: RoleArg,
        /// Email (admins) or mobile number (watchmen)
        identifier: String,
        #[arg(long, env = "VISITGATE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget a stored session
    Logout {
        role: Option<RoleArg>,
        #[arg(long, conflicts_with = "role")]
        all: bool,
    },
    /// List stored sessions
    Show,
    /// Check a stored token against the server
    Verify { role: RoleArg },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set configuration value
    Set { key: String, value: String },
    /// Get configuration value
    Get { key: String },
    /// List all configuration
    List,
    /// Initialize configuration
    Init,
}

fn load_client_config(cli: &Cli, config: &config::Config) -> anyhow::Result<ClientConfig> {
    let mut client = match &cli.client_config {
        Some(path) => ClientConfig::load(path)?,
        None => {
            let path = ClientConfig::default_path();
            if path.exists() {
                ClientConfig::load(&path)?
            } else {
                ClientConfig::default()
            }
        }
    };
    if let Some(url) = cli.api_url.clone().or_else(|| config.api_url.clone()) {
        client.api_url = url;
    }
    Ok(client)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match config::Config::load(cli.profile.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    let client = match load_client_config(&cli, &config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| client.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let format = cli
        .format
        .or_else(|| config.default_format.as_deref().and_then(output::OutputFormat::parse_name))
        .unwrap_or(output::OutputFormat::Table);

    let ctx = commands::Context {
        client,
        config,
        profile: cli.profile,
        format,
    };

    let result = match cli.command {
        Commands::Form { company_id } => commands::form::run(&ctx, company_id).await,
        Commands::Schema { company_id } => commands::schema::handle(&ctx, company_id).await,
        Commands::Status { company_id, label, number } => {
            commands::status::handle(&ctx, company_id, &label, &number).await
        }
        Commands::Session { action } => commands::session::handle(action, &ctx).await,
        Commands::Config { action } => commands::config::handle(action, &ctx).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
