use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use collectify::config::Config;
use collectify::db;
use collectify::routes::build_router;
use collectify::services::auth_service;
use collectify::state::AppState;
use collectify::storage::{LocalBackend, R2Backend, StorageBackend};

#[derive(Parser)]
#[command(name = "collectify", version, about = "Personal collection catalog server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Apply migrations; with --drop, drop all tables first
    InitDb {
        #[arg(long)]
        drop: bool,
        /// Skip the confirmation prompt for --drop
        #[arg(long)]
        yes: bool,
    },
    /// Report whether the tables exist and how many rows they hold
    CheckDb,
    /// Build field rows from legacy category schemas
    MigrateSpecs,
    /// Create an admin account
    CreateAdmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

fn confirm_drop() -> io::Result<bool> {
    print!("This deletes every category, item, photo record and user. Type 'yes' to continue: ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}

async fn serve(config: Config, pool: sqlx::PgPool) -> anyhow::Result<()> {
    db::run_migrations(&pool).await.context("failed to run migrations")?;

    if db::categories::ensure_default_category(&pool).await? {
        tracing::info!("Created default category '{}'", db::categories::DEFAULT_CATEGORY_NAME);
    }

    match &config.admin {
        Some(admin) => {
            auth_service::bootstrap_admin(&pool, admin).await?;
        }
        None => tracing::debug!(
            "ADMIN_PASSWORD not set; the first admin comes from /api/init-admin or registration"
        ),
    }

    let storage: Arc<dyn StorageBackend> = match &config.r2 {
        Some(r2) => Arc::new(R2Backend::new(r2)?),
        None => Arc::new(LocalBackend::new(&config.upload_dir).await?),
    };
    tracing::info!(
        "{} storage enabled: {}",
        if config.r2.is_some() { "R2" } else { "Local" },
        storage.bucket()
    );

    let state = AppState::new(pool, storage, config.jwt_secret.clone(), config.token_ttl_hours);
    let app = build_router(state, config.max_upload_bytes);

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collectify=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration (DATABASE_URL and JWT_SECRET are required)")?;

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, pool).await?,
        Command::InitDb { drop, yes } => {
            if drop {
                if !yes && !confirm_drop()? {
                    tracing::info!("Aborted");
                    return Ok(());
                }
                db::drop_all(&pool).await?;
            }
            db::run_migrations(&pool).await?;
            db::categories::ensure_default_category(&pool).await?;
            tracing::info!("Database initialised");
        }
        Command::CheckDb => {
            if !db::is_initialized(&pool).await? {
                tracing::warn!("Tables are missing; run `collectify init-db`");
                anyhow::bail!("database is not initialised");
            }
            for (table, count) in db::table_counts(&pool).await? {
                tracing::info!("{}: {} rows", table, count);
            }
        }
        Command::MigrateSpecs => {
            db::run_migrations(&pool).await?;
            let report = db::categories::migrate_legacy_schemas(&pool).await?;
            tracing::info!(
                "Specification migration finished: {} migrated, {} skipped, {} failed",
                report.migrated,
                report.skipped,
                report.failed
            );
        }
        Command::CreateAdmin { username, email, password } => {
            db::run_migrations(&pool).await?;
            let user = auth_service::create_admin(&pool, &username, &email, &password).await?;
            tracing::info!("Created admin {} (id={})", user.username, user.id);
        }
    }

    Ok(())
}
