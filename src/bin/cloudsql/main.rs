use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gcloudsql::{Config, Connection};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cloudsql", about = "Cloud SQL security settings: ssl/whitelist/blacklist/set-password")]
struct Cli {
    /// GCP project (defaults to $CLOUDSQL_PROJECT)
    #[arg(long, global = true)]
    project: Option<String>,
    /// Cloud SQL instance name (defaults to $CLOUDSQL_INSTANCE)
    #[arg(long, global = true)]
    instance: Option<String>,
    /// Do not show a spinner while waiting for operations
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SslState {
    Enable,
    Disable,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the instance's addresses, SSL policy and authorized networks
    Show,

    /// Require or stop requiring SSL connections
    Ssl {
        #[arg(value_enum)]
        state: SslState,
    },

    /// Authorize a network (address or CIDR)
    Whitelist {
        #[arg(name = "NAME")]
        name: String,
        #[arg(name = "VALUE")]
        value: String,
    },

    /// Remove every authorized network with the given value
    Blacklist {
        #[arg(name = "VALUE")]
        value: String,
    },

    /// Set a database user's password
    SetPassword {
        #[arg(name = "USER")]
        user: String,
        /// Password to set (defaults to $CLOUDSQL_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },

    /// Print what the token introspection endpoint reports for the current token
    Token,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project = common::arg_or_env(cli.project, "CLOUDSQL_PROJECT")?;
    let instance = common::arg_or_env(cli.instance, "CLOUDSQL_INSTANCE")?;

    let mut config = Config::from_env().context("Invalid CLOUDSQL_* configuration")?;
    config.poll.progress = !cli.quiet;

    let conn = Connection::builder(&project, &instance)
        .config(config)
        .connect()
        .with_context(|| format!("Failed to connect to {}:{}", project, instance))?;

    // Ctrl+C stops waiting on the current operation; the API keeps running it.
    let cancel = conn.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("Ctrl+C detected, no longer waiting for the operation.");
        cancel.cancel();
    })
    .context("Failed to install Ctrl+C handler")?;

    match cli.cmd {
        Commands::Show => commands::show(&conn),
        Commands::Ssl { state } => commands::ssl(&conn, matches!(state, SslState::Enable)),
        Commands::Whitelist { name, value } => commands::whitelist(&conn, &name, &value),
        Commands::Blacklist { value } => commands::blacklist(&conn, &value),
        Commands::SetPassword { user, password } => {
            let password = common::arg_or_env(password, "CLOUDSQL_PASSWORD")?;
            commands::set_password(&conn, &user, &password)
        }
        Commands::Token => commands::token(&conn),
    }
}

mod commands;
mod common;
