//! `lusolve` umbrella CLI.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use anyhow::anyhow;
use clap::Parser;

mod admin_cli;
mod auth_cli;
mod config;
mod tasks_cli;

pub use config::{DEFAULT_BASE_URL, ENV_BASE_URL, ENV_WS_URL};

use config::CliContext;

#[derive(Parser)]
#[command(name = "lusolve")]
#[command(about = "Client for the lusolve linear-system task service")]
pub struct LusolveCli {
    /// REST base URL (falls back to LUSOLVE_BASE_URL, then the local
    /// default)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Log in and store the credential pair
    Login(auth_cli::LoginArgs),
    /// Register a new account (logs in on success)
    Register(auth_cli::RegisterArgs),
    /// Forget the stored credentials
    Logout,
    /// Show the authenticated profile
    Profile,
    /// Change the account password
    ChangePassword(auth_cli::ChangePasswordArgs),
    /// Task operations
    #[command(subcommand)]
    Tasks(tasks_cli::TasksCommand),
    /// Staff-only monitoring
    #[command(subcommand)]
    Admin(admin_cli::AdminCommand),
}

pub async fn run() -> anyhow::Result<()> {
    let cli = LusolveCli::parse();
    let context = CliContext::new(cli.base_url.as_deref())?;

    let result = match cli.command {
        Commands::Login(args) => auth_cli::login(&context, args).await,
        Commands::Register(args) => auth_cli::register(&context, args).await,
        Commands::Logout => auth_cli::logout(&context),
        Commands::Profile => auth_cli::profile(&context).await,
        Commands::ChangePassword(args) => auth_cli::change_password(&context, args).await,
        Commands::Tasks(command) => tasks_cli::run(&context, command).await,
        Commands::Admin(command) => admin_cli::run(&context, command).await,
    };

    result.map_err(|error| with_login_hint(error))
}

/// Refresh failure tears the session down; point the user at the login
/// entry point instead of leaving a bare error.
fn with_login_hint(error: anyhow::Error) -> anyhow::Error {
    let session_fatal = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<lusolve_client::ApiError>())
        .any(lusolve_client::ApiError::is_session_fatal);
    if session_fatal {
        anyhow!("{error:#}\nyour session has expired — log in again with `lusolve login`")
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use clap::error::ErrorKind;

    use super::LusolveCli;

    #[test]
    fn cli_requires_subcommand() {
        let err = match LusolveCli::try_parse_from(["lusolve"]) {
            Ok(_) => panic!("expected missing subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        let err = match LusolveCli::try_parse_from(["lusolve", "frobnicate"]) {
            Ok(_) => panic!("expected invalid subcommand parse error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn submit_rejects_both_matrix_sources() {
        let err = match LusolveCli::try_parse_from([
            "lusolve",
            "tasks",
            "submit",
            "--name",
            "solve",
            "--matrix-text",
            "1 2\n3 4",
            "--matrix-file",
            "matrix.txt",
        ]) {
            Ok(_) => panic!("expected conflicting arguments parse error"),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn watch_takes_a_task_id() {
        let cli = match LusolveCli::try_parse_from(["lusolve", "tasks", "watch", "42"]) {
            Ok(cli) => cli,
            Err(err) => panic!("parse failed: {err}"),
        };
        match cli.command {
            super::Commands::Tasks(super::tasks_cli::TasksCommand::Watch(args)) => {
                assert_eq!(args.id, 42);
                assert!(args.ws_url.is_none());
            }
            _ => panic!("expected tasks watch subcommand"),
        }
    }
}
