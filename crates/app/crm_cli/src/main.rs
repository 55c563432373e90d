// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};
use crm_core::archival::ArchivalJob;
use crm_core::auth::password::MIN_PASSWORD_LEN;
use crm_core::lifecycle::retention_days;
use crm_core::rbac::authorize::{self, PermissionCheck};
use crm_core::store::PgStore;
use sqlx::PgPool;

mod cli;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    logging::init(args.verbose)?;

    if let Commands::Version = &args.command {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    validate(&args.command)?;

    let database_url = args.database_url.clone().ok_or_else(|| {
        Error::Custom("no database configured: pass --database-url or set DATABASE_URL".into())
    })?;

    tokio::runtime::Runtime::new()?.block_on(execute(&database_url, &args.command))
}

/// Argument checks that do not need the database.
fn validate(command: &Commands) -> Result<()> {
    match command {
        Commands::SetPassword { password, .. } if password.chars().count() < MIN_PASSWORD_LEN => {
            Err(Error::Custom(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )))
        }
        _ => Ok(()),
    }
}

async fn execute(database_url: &str, command: &Commands) -> Result<()> {
    let pool = PgPool::connect(database_url).await?;
    let store = PgStore::new(pool.clone());

    match command {
        Commands::Migrate => {
            log::info!("running database migrations");
            crm_core::migrate::migrate(&pool).await?;
            log::info!("migrations applied");
        }
        Commands::Archive { retention_days: days } => {
            let job = ArchivalJob::new(Arc::new(store), retention_days(*days)?);
            let archived = job.run_once(Utc::now()).await?;
            log::info!(
                "archived {} user(s) deactivated more than {} day(s) ago",
                archived.len(),
                days
            );
            for user in &archived {
                println!("{}\t{}", user.id, user.email);
            }
        }
        Commands::Check { email, permission } => {
            let check = PermissionCheck::parse(permission);
            let allowed = authorize::check(&store, email, &check).await?;
            println!(
                "{email} {check}: {}",
                if allowed { "allowed" } else { "denied" }
            );
        }
        Commands::Permissions { email } => {
            for name in authorize::get_user_permissions(&store, email).await? {
                println!("{name}");
            }
        }
        Commands::SetPassword { email, password } => {
            let user = crm_core::auth::set_password(&store, email, password).await?;
            log::info!("password updated for {}", user.email);
        }
        Commands::Version => {}
    }

    pool.close().await;
    Ok(())
}
