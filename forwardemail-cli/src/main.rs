//! Forward Email CLI
//!
//! Command-line interface for managing Forward Email API credentials and
//! profiles.
//!
//! # Usage
//!
//! ```bash
//! # Store an API key for the current profile in the OS keyring
//! echo "$KEY" | forward-email auth login
//!
//! # Show where the key for a profile comes from
//! forward-email --profile work auth status
//!
//! # Check the key against the API
//! forward-email auth verify
//! ```

mod commands;

use std::error::Error as StdError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use forwardemail_core::{
    ApiError, ClientError, ConfigError, CredentialError, ForwardEmailError, StoreError,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How long to wait for blocked store calls when the runtime shuts down.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "forward-email")]
#[command(about = "Command-line client for the Forward Email API")]
#[command(version)]
struct Cli {
    /// Profile to use instead of the configured current profile
    #[arg(short, long, global = true, env = "FORWARDEMAIL_PROFILE")]
    profile: Option<String>,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the API key of a profile
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Manage profiles
    #[command(subcommand)]
    Profile(ProfileCommand),
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Store an API key read from stdin
    Login {
        /// Where to keep the key
        #[arg(short, long, value_enum, default_value_t = StoreTarget::Keyring)]
        store: StoreTarget,

        /// Store the key without checking it against the API
        #[arg(long)]
        no_verify: bool,
    },

    /// Remove the stored API key
    Logout,

    /// Show which source provides the API key
    Status,

    /// Check the API key against the API
    Verify,

    /// List profiles with a stored API key
    List,
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// List all profiles
    List,

    /// Show the settings of a profile
    Show {
        /// Profile name (defaults to the active profile)
        name: Option<String>,
    },

    /// Make a profile the current one
    Use {
        /// Profile name
        name: String,
    },
}

/// Destination for `auth login`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreTarget {
    /// The configured secure store (OS keyring by default)
    Keyring,
    /// Plain text in the config file
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(cli));

    // A keyring call stuck on an OS prompt must not keep the process alive.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code(&err)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: tracing subscriber already installed");
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut ctx = commands::Context::load(cli.config, cli.profile)?;
    tracing::debug!(
        "Using profile '{}' with {} store",
        ctx.profile,
        ctx.store.backend_name()
    );

    match cli.command {
        Commands::Auth(command) => match command {
            AuthCommand::Login { store, no_verify } => {
                commands::auth_login(&mut ctx, store == StoreTarget::Config, !no_verify).await
            }
            AuthCommand::Logout => commands::auth_logout(&mut ctx).await,
            AuthCommand::Status => commands::auth_status(&ctx).await,
            AuthCommand::Verify => commands::auth_verify(&ctx).await,
            AuthCommand::List => commands::auth_list(&ctx).await,
        },
        Commands::Profile(command) => match command {
            ProfileCommand::List => commands::profile_list(&ctx),
            ProfileCommand::Show { name } => commands::profile_show(&ctx, name.as_deref()),
            ProfileCommand::Use { name } => commands::profile_use(&mut ctx, &name),
        },
    }
}

/// Map a failure to the process exit code.
///
/// 2: no usable configuration or credential, 3: the API answered with an
/// error (including a rejected key), 4: the API could not be reached,
/// 1: anything else.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    err.chain()
        .find_map(classify)
        .map(ExitCode::from)
        .unwrap_or(ExitCode::FAILURE)
}

fn classify(cause: &(dyn StdError + 'static)) -> Option<u8> {
    if let Some(err) = cause.downcast_ref::<ForwardEmailError>() {
        return Some(match err {
            ForwardEmailError::Client(client) => client_code(client),
            ForwardEmailError::Credential(credential) => credential_code(credential),
            ForwardEmailError::Config(_) => 2,
            ForwardEmailError::Store(_) => 1,
        });
    }
    if let Some(client) = cause.downcast_ref::<ClientError>() {
        return Some(client_code(client));
    }
    if let Some(credential) = cause.downcast_ref::<CredentialError>() {
        return Some(credential_code(credential));
    }
    if cause.is::<ApiError>() {
        return Some(3);
    }
    if cause.is::<ConfigError>() {
        return Some(2);
    }
    if cause.is::<StoreError>() {
        return Some(1);
    }
    None
}

fn client_code(err: &ClientError) -> u8 {
    match err {
        ClientError::Credential(credential) | ClientError::InvalidCredential(credential) => {
            credential_code(credential)
        }
        ClientError::Config(_) => 2,
        ClientError::Api(_) => 3,
        ClientError::Network(_) => 4,
        ClientError::Decode(_) | ClientError::Url(_) => 1,
    }
}

fn credential_code(err: &CredentialError) -> u8 {
    match err {
        CredentialError::NotFound { .. } => 2,
        CredentialError::Invalid { .. } => 3,
    }
}
