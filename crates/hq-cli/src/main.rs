//! Hypequest CLI - Session management from the shell
//!
//! Usage:
//!   hq login <email> [--password <pw>]
//!   hq register <email> <display-name> [--password <pw>]
//!   hq whoami
//!   hq refresh
//!   hq token
//!   hq get <path>
//!   hq logout

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use hq_core::{AppConfig, LoggingConfig, SessionState};
use hq_session::{AuthorizedClient, SessionBridge, SessionManager};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hq")]
#[command(about = "Hypequest session CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API base URL (overrides configuration)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        email: String,
        #[arg(long, env = "HQ_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and sign in
    Register {
        email: String,
        display_name: String,
        #[arg(long, env = "HQ_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Show the signed-in user
    Whoami,
    /// Renew the access token
    Refresh,
    /// Print the current access token
    Token,
    /// GET an API path with the session's credentials
    Get {
        /// Path such as /api/posts
        path: String,
    },
    /// Sign out and forget the stored tokens
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    if let Some(url) = cli.api_url {
        config.api.base_url = url.trim_end_matches('/').to_string();
    }

    init_tracing(&config.logging);

    let manager = SessionManager::from_config(&config)?;

    match cli.command {
        Commands::Login { email, password } => {
            let password = require_password(password)?;
            let state = manager.login(&email, &password).await?;
            print_signed_in(&state)?;
        }
        Commands::Register {
            email,
            display_name,
            password,
        } => {
            let password = require_password(password)?;
            let state = manager.register(&email, &password, &display_name).await?;
            print_signed_in(&state)?;
        }
        Commands::Whoami => match manager.bootstrap().await {
            SessionState::Authenticated(user) => {
                println!("id:    {}", user.id);
                println!("email: {}", user.email);
                if let Some(name) = &user.display_name {
                    println!("name:  {name}");
                }
                match (user.created(), &user.created_at) {
                    (Some(created), _) => println!("since: {}", created.format("%Y-%m-%d")),
                    (None, Some(raw)) => println!("since: {raw}"),
                    (None, None) => {}
                }
            }
            SessionState::Unauthenticated => bail!("Not signed in"),
        },
        Commands::Refresh => match manager.refresh().await {
            Some(_) => println!("Access token renewed"),
            None => bail!("Session expired; sign in again"),
        },
        Commands::Token => match manager.token() {
            Some(token) => println!("{}", token.as_str()),
            None => bail!("Not signed in"),
        },
        Commands::Get { path } => {
            let bridge = match manager.store().backend() {
                Some(storage) => SessionBridge::new(storage.clone()),
                None => SessionBridge::detached(),
            };
            let _registration = bridge.register(&manager);

            let client = AuthorizedClient::from_config(&config.api, bridge.clone())?;
            let body: serde_json::Value = client
                .get_json(&path)
                .await
                .with_context(|| format!("GET {path} failed"))?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Logout => {
            manager.logout().await;
            println!("Signed out");
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("hq={level},hq_session={level}", level = logging.level).into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn require_password(password: Option<String>) -> anyhow::Result<String> {
    match password {
        Some(password) if !password.is_empty() => Ok(password),
        _ => bail!("Password required: pass --password or set HQ_PASSWORD"),
    }
}

fn print_signed_in(state: &SessionState) -> anyhow::Result<()> {
    match state.user() {
        Some(user) => {
            println!("Signed in as {} <{}>", user.label(), user.email);
            Ok(())
        }
        None => bail!("Signed in, but the identity check failed"),
    }
}
