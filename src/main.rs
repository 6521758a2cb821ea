//! Mission Control server binary.

use anyhow::Result;
use clap::{Parser, Subcommand};
use mission_control::config::Settings;
use mission_control::db::Database;
use mission_control::gateway::{GatewayClient, GatewayConfig, GatewayTransport};
use mission_control::server::{AppState, serve};
use mission_control::{leads, tokens};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mission-control", version, about = "Mission Control backend")]
struct Cli {
    /// Path to a YAML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Retry gateway provisioning for agents flagged pending-sync.
    Sync,
    /// Seed a demo organization, board, and gateway for local development.
    Seed,
}

fn init_logging(settings: &Settings, verbose: bool) {
    let directive = if verbose {
        "debug".to_string()
    } else {
        settings.log_filter.clone()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    init_logging(&settings, cli.verbose);

    match cli.command {
        Command::Serve => {
            let db = Database::open(&settings.database_path)?;
            let state = AppState::new(db, settings);
            serve(state).await?;
        }
        Command::Migrate => {
            // Migrations run as part of opening the database.
            Database::open(&settings.database_path)?;
            info!(path = %settings.database_path.display(), "database migrated");
        }
        Command::Sync => {
            let db = Database::open(&settings.database_path)?;
            let timeout = Duration::from_secs(settings.gateway_timeout_secs);
            let db_for_lookup = db.clone();
            let reconciled = leads::sync_pending_agents(&db, move |agent| {
                let board_id = agent.board_id?;
                let board = db_for_lookup.get_board(board_id).ok().flatten()?;
                let gateway_id = board.gateway_id?;
                let gateway = db_for_lookup.get_gateway(gateway_id).ok().flatten()?;
                Some(Box::new(GatewayClient::new(
                    GatewayConfig {
                        url: gateway.url,
                        token: gateway.token,
                    },
                    timeout,
                )) as Box<dyn GatewayTransport>)
            })?;
            info!(reconciled, "pending-sync reconciliation finished");
        }
        Command::Seed => {
            let db = Database::open(&settings.database_path)?;
            seed_demo(&db)?;
        }
    }
    Ok(())
}

/// Create a demo tenant for local development: a user, an organization, a
/// gateway, a board wired to it, and a couple of tasks.
fn seed_demo(db: &Database) -> Result<()> {
    use mission_control::db::boards::BoardPatch;
    use mission_control::db::tasks::NewTask;

    let (user, created) = db.get_or_create_user(
        "demo-user",
        Some("demo@example.com"),
        Some("Demo User"),
    )?;
    if !created {
        warn!("demo user already exists, reusing");
    }

    let org = match db.create_organization("Demo Org", user.id) {
        Ok(org) => org,
        Err(e) => {
            warn!(error = %e, "demo org not created (already seeded?)");
            return Ok(());
        }
    };
    db.set_active_organization(user.id, org.id)?;

    let gateway = db.create_gateway(
        org.id,
        "Local Gateway",
        "http://127.0.0.1:18789",
        Some(&tokens::generate_agent_token()),
        "agent:main:main",
        "/srv/openclaw/workspaces",
    )?;

    let board = db.create_board(
        org.id,
        BoardPatch {
            name: Some("Demo Board".to_string()),
            gateway_id: Some(Some(gateway.id)),
            board_type: Some("goal".to_string()),
            ..Default::default()
        },
    )?;

    for title in ["Wire up the gateway", "Draft the launch checklist"] {
        db.create_task(NewTask {
            board_id: Some(board.id),
            title: title.to_string(),
            description: None,
            status: None,
            priority: None,
            due_at: None,
            created_by_user_id: Some(user.id),
            assigned_agent_id: None,
            auto_created: false,
            auto_reason: None,
        })?;
    }

    info!(org = %org.id, board = %board.id, "demo data seeded");
    Ok(())
}
