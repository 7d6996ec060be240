//! Database schema runner for tradebook.
//!
//! Usage:
//!   USE_PERSISTENT_STORES=true DATABASE_URL=postgres://... migrator
//!
//! Every statement is idempotent, so re-running against a migrated database is safe.

use anyhow::{Context, bail};
use tradebook_infra::{Persistence, PostgresPostingStore, PostingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tradebook_observability::init();

    let config = PostingConfig::from_env().context("loading configuration")?;
    let Persistence::Postgres {
        database_url,
        max_connections,
    } = config.persistence
    else {
        bail!("migrator needs USE_PERSISTENT_STORES=true and DATABASE_URL");
    };

    let pool = PostgresPostingStore::connect(&database_url, max_connections)
        .await
        .context("connecting to the database")?;
    let applied = PostgresPostingStore::migrate(&pool)
        .await
        .context("applying schema")?;

    tracing::info!(statements = applied, "schema up to date");
    Ok(())
}
