use std::env;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use helpdesk::{
    auth::{password, Role},
    config::AppConfig,
    db, directory,
    statistics::recompute_month,
};

const USAGE: &str = "Usage:
  maintenance recompute-statistics YEAR MONTH
  maintenance create-user USERNAME EMAIL ROLE PASSWORD";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("recompute-statistics") => recompute_statistics(&args[1..]),
        Some("create-user") => create_user(&args[1..]),
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded helpdesk configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

fn recompute_statistics(args: &[String]) -> Result<()> {
    let [year, month] = args else {
        bail!("{USAGE}");
    };
    let year: i32 = year.parse().context("YEAR must be an integer")?;
    let month: u32 = month.parse().context("MONTH must be an integer")?;

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let summary = recompute_month(&mut conn, year, month)
        .with_context(|| format!("failed to recompute statistics for {year}-{month:02}"))?;

    println!(
        "Recomputed {year}-{month:02}: {} rows updated, {} rows zeroed.",
        summary.updated, summary.zeroed
    );
    Ok(())
}

fn create_user(args: &[String]) -> Result<()> {
    let [username, email, role, secret] = args else {
        bail!("{USAGE}");
    };
    let role: Role = role
        .parse()
        .map_err(|err: String| anyhow::anyhow!(err))
        .context("ROLE must be ADMIN, MANAGER or USER")?;
    let password_hash = password::hash_password(secret)?;

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let user = directory::create_user(&mut conn, username, email, password_hash, role)
        .context("failed to create user")?;

    println!("Created {} {} ({})", user.role, user.username, user.id);
    Ok(())
}
