//! Throwaway PostgreSQL databases for zapflow integration tests.
//!
//! Every test gets its own database, created from the admin connection in
//! `TEST_ADMIN_DATABASE_URL` and migrated with the zapflow schema. The
//! database is dropped when the test body returns `Ok`, and kept for
//! inspection when it fails or when `TEST_KEEP_DB` is set.

use std::{future::Future, pin::Pin};

use anyhow::{Context, Result};
use sqlx::{Connection, Executor, PgConnection, PgPool, postgres::PgPoolOptions};
use url::Url;
use uuid::Uuid;

/// Postgres truncates identifiers longer than this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;
const DB_PREFIX: &str = "zf_";

/// Run `f` against a freshly created and migrated database.
///
/// A panic inside `f` skips cleanup, leaving the database behind.
pub async fn with_test_db<F, T>(test_name: &str, f: F) -> Result<T>
where
    F: for<'a> FnOnce(&'a PgPool) -> Pin<Box<dyn Future<Output = Result<T>> + 'a>>,
{
    dotenvy::from_filename(".env").ok();

    let admin_url = std::env::var("TEST_ADMIN_DATABASE_URL")
        .context("TEST_ADMIN_DATABASE_URL must be set for database tests")?;
    let mut admin = PgConnection::connect(&admin_url).await?;

    let db_name = database_name(test_name);
    admin
        .execute(format!(r#"CREATE DATABASE "{db_name}""#).as_str())
        .await?;

    let mut db_url = Url::parse(&admin_url)?;
    db_url.set_path(&format!("/{db_name}"));

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url.as_str())
        .await?;

    sqlx::migrate!("../zapflow/migrations").run(&pool).await?;

    let result = f(&pool).await;
    let keep = std::env::var("TEST_KEEP_DB").is_ok();

    if result.is_err() || keep {
        eprintln!("[with_test_db] keeping database {db_name}");
        return result;
    }

    pool.close().await;
    let drop_sql = format!(r#"DROP DATABASE IF EXISTS "{db_name}" WITH (FORCE)"#);
    match admin.execute(drop_sql.as_str()).await {
        Ok(_) => eprintln!("[with_test_db] dropped database {db_name}"),
        Err(e) => eprintln!("[with_test_db] failed to drop database {db_name}: {e}"),
    }

    result
}

/// Derive a unique, valid database name from a test function name.
fn database_name(test_name: &str) -> String {
    let sanitized: String = test_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let sanitized = sanitized.trim_matches('_');

    // prefix + name + "_" + 32 hex chars
    let budget = MAX_IDENTIFIER_LEN - DB_PREFIX.len() - 33;
    let stem = &sanitized[..sanitized.len().min(budget)];

    format!("{DB_PREFIX}{stem}_{}", Uuid::now_v7().simple())
}

/// Declare an async test that receives a `&PgPool` for a private database.
///
/// ```ignore
/// use test_utils::db_test;
///
/// db_test!(markers_are_deleted_after_publish, |pool| {
///     sqlx::query("SELECT 1").execute(pool).await?;
///     Ok(())
/// });
/// ```
#[macro_export]
macro_rules! db_test {
    ($name:ident, |$pool:ident| $body:block) => {
        #[tokio::test(flavor = "multi_thread")]
        async fn $name() -> anyhow::Result<()> {
            use $crate::db::with_test_db;

            with_test_db(stringify!($name), |$pool| {
                let fut = async move { $body };
                Box::pin(fut)
            })
            .await
        }
    };
}
