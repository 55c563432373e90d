use clap::{Parser, Subcommand};
use crm_core::lifecycle::{MAX_RETENTION_DAYS, RETENTION_DAYS};

#[derive(Parser, Debug)]
#[command(name = "crm_cli", version, about = "CRM access-control administration")]
pub struct Cli {
    /// PostgreSQL connection URL.
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Log at debug level, including SQL statements. `RUST_LOG` takes
    /// precedence.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply database migrations (schema, SQL functions, seed catalog).
    Migrate,

    /// Archive deactivated users whose retention window has elapsed.
    Archive {
        /// Days a deactivated user is kept before archival.
        #[arg(
            long,
            default_value_t = RETENTION_DAYS,
            value_parser = clap::value_parser!(i64).range(1..=MAX_RETENTION_DAYS)
        )]
        retention_days: i64,
    },

    /// Check whether a user holds a permission.
    Check {
        #[arg(long)]
        email: String,

        /// Permission name, or `resource:action`.
        #[arg(long)]
        permission: String,
    },

    /// List the permissions a user holds.
    Permissions {
        #[arg(long)]
        email: String,
    },

    /// Set a user's login password.
    SetPassword {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Print the version.
    Version,
}
