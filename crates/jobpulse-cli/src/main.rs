mod commands;
mod state;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use state::{AppState, SecretName};
use tokio::time::{sleep, Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "jobpulse")]
#[command(about = "Classify job-application mail into status updates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Liveness check
    Health,

    /// Print the OAuth consent URL for a mailbox
    AuthUrl {
        #[arg(long)]
        user: String,
    },

    /// Finish the OAuth callback with the returned code and state
    CompleteAuth {
        #[arg(long)]
        code: String,

        /// The `state` parameter of the callback (the mailbox address)
        #[arg(long)]
        state: String,
    },

    /// Start a scan and wait for its final status
    Scan {
        #[arg(long)]
        user: String,

        /// Number of recent inbox messages to classify
        #[arg(long)]
        limit: Option<usize>,

        /// Seconds between status polls
        #[arg(long, default_value_t = 2)]
        poll_secs: u64,
    },

    /// Store a secret in the OS keychain (value read from stdin)
    SetSecret {
        #[arg(value_enum)]
        name: SecretName,

        /// Remove the stored secret instead
        #[arg(long)]
        clear: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Health => print_json(&commands::health()),
        Command::SetSecret { name, clear } => {
            let secrets = state::secret_store();
            if clear {
                commands::clear_secret(&secrets, name).map_err(|err| anyhow!(err))?;
                eprintln!("Removed {name:?}");
                return Ok(());
            }

            eprintln!("Paste the secret value (end with Ctrl-D):");
            let mut value = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut value)
                .context("read secret from stdin")?;
            commands::set_secret(&secrets, name, &value).map_err(|err| anyhow!(err))?;
            eprintln!("Saved {name:?}");
            Ok(())
        }
        Command::AuthUrl { user } => {
            let state = AppState::initialize().await?;
            print_json(&commands::auth_url(&state, &user).map_err(|err| anyhow!(err))?)
        }
        Command::CompleteAuth { code, state: oauth_state } => {
            let state = AppState::initialize().await?;
            let response = commands::complete_auth(&state, &code, &oauth_state).await;
            print_json(&response)?;
            match response {
                commands::CompleteAuthResponse::Connected { .. } => Ok(()),
                commands::CompleteAuthResponse::Failed { error } => Err(anyhow!(error)),
            }
        }
        Command::Scan {
            user,
            limit,
            poll_secs,
        } => {
            let state = AppState::initialize().await?;
            scan(&state, &user, limit, Duration::from_secs(poll_secs.max(1))).await
        }
    }
}

async fn scan(state: &AppState, user: &str, limit: Option<usize>, poll_every: Duration) -> Result<()> {
    let started = commands::start_job(state, user, limit)
        .await
        .map_err(|err| anyhow!(err))?;
    if let commands::StartJobResponse::AuthUrl { .. } = started {
        tracing::warn!("mailbox is not connected; open the URL and run complete-auth");
        return print_json(&started);
    }
    tracing::info!(user, "scan scheduled");

    loop {
        let report = commands::get_status(state, user)
            .await
            .map_err(|err| anyhow!(err))?;
        if report.status.is_terminal() {
            print_json(&report)?;
            return match report.error {
                Some(error) => Err(anyhow!("scan failed: {error}")),
                None => Ok(()),
            };
        }

        tracing::info!(user, status = ?report.status, "scan in progress");
        sleep(poll_every).await;
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("render response")?;
    println!("{rendered}");
    Ok(())
}
