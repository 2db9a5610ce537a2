use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "schoold=info";

#[derive(Debug, Parser)]
#[command(name = "schoold", version, about = "School administration sidecar")]
pub struct Cli {
    /// Workspace directory holding the database; opened at startup if set
    #[arg(long, env = "SCHOOLD_WORKSPACE", global = true)]
    pub workspace: Option<PathBuf>,

    /// tracing filter directive, logs go to stderr
    #[arg(long, env = "SCHOOLD_LOG", default_value = DEFAULT_LOG_FILTER, global = true)]
    pub log_filter: String,

    /// Session lifetime in hours
    #[arg(long, env = "SCHOOLD_SESSION_TTL_HOURS", default_value_t = 336, global = true)]
    pub session_ttl_hours: u32,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Answer JSON requests on stdin, one per line (default)
    Serve,
    /// Create or reuse the demo class, student and exam
    SeedDemo,
    /// Create a staff superuser account
    CreateAdmin {
        #[arg(long)]
        username: String,
        #[arg(long, env = "SCHOOLD_ADMIN_PASSWORD")]
        password: String,
        #[arg(long, default_value = "")]
        email: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub session_ttl: chrono::Duration,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        Config {
            workspace: cli.workspace.clone(),
            log_filter: cli.log_filter.clone(),
            session_ttl: chrono::Duration::hours(i64::from(cli.session_ttl_hours)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::try_parse_from(["schoold"]).expect("parse");
        assert!(cli.command.is_none());
        let cfg = Config::from_cli(&cli);
        assert_eq!(cfg.session_ttl, chrono::Duration::hours(336));
    }

    #[test]
    fn global_workspace_after_subcommand() {
        let cli = Cli::try_parse_from([
            "schoold",
            "create-admin",
            "--workspace",
            "/tmp/ws",
            "--username",
            "office",
            "--password",
            "pw",
        ])
        .expect("parse");
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/ws")));
        match cli.command {
            Some(Command::CreateAdmin { username, .. }) => assert_eq!(username, "office"),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
