mod auth;
mod bulk;
mod cascade;
mod config;
mod db;
mod demo;
mod eligibility;
mod exchange;
mod ipc;
mod registry;
mod results;

use anyhow::Context;
use clap::Parser;
use config::{Cli, Command, Config};
use std::io::{self, BufRead, Write};

fn init_tracing(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn open_workspace(cfg: &Config) -> anyhow::Result<rusqlite::Connection> {
    let Some(path) = cfg.workspace.as_ref() else {
        anyhow::bail!("--workspace (or SCHOOLD_WORKSPACE) is required for this command");
    };
    db::open_db(path).with_context(|| format!("open workspace {}", path.display()))
}

fn serve(cfg: Config) -> anyhow::Result<()> {
    let mut state = ipc::AppState::new(cfg);
    if let Some(path) = state.config.workspace.clone() {
        state.db = Some(db::open_db(&path).with_context(|| format!("open workspace {}", path.display()))?);
        tracing::info!(workspace = %path.display(), "workspace opened");
        state.workspace = Some(path);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                tracing::warn!(error = %e, "unparseable request");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_cli(&cli);
    init_tracing(&cfg.log_filter);

    match cli.command {
        None | Some(Command::Serve) => serve(cfg),
        Some(Command::SeedDemo) => {
            let conn = open_workspace(&cfg)?;
            let summary = demo::seed(&conn)?;
            println!("{}", serde_json::to_string(&summary)?);
            Ok(())
        }
        Some(Command::CreateAdmin {
            username,
            password,
            email,
        }) => {
            let conn = open_workspace(&cfg)?;
            let user_id = auth::create_user(
                &conn,
                &auth::NewUser {
                    username: username.trim().to_string(),
                    password,
                    email,
                    is_staff: true,
                    is_superuser: true,
                    ..auth::NewUser::default()
                },
            )
            .with_context(|| format!("create admin {}", username))?;
            tracing::info!(username = %username, "admin created");
            println!("{}", serde_json::json!({ "userId": user_id, "username": username }));
            Ok(())
        }
    }
}
