use std::future::Future;

use anyhow::{Context, Result, anyhow};
use diesel::{Connection, PgConnection, sql_types::Integer};
use diesel_async::{
    AsyncPgConnection, RunQueryDsl,
    pooled_connection::{AsyncDieselConnectionManager, bb8},
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use tracing::warn;

use crate::{config::RetryPolicy, error::InventoryError};

pub type DbPool = bb8::Pool<AsyncPgConnection>;

/// Migrations embedded into the binary which helps with streamlining image building process
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Advisory-lock namespace for per-customer cart work.
const CART_LOCK_CLASS: i32 = 0x4341_5254;

pub async fn create_pool(url: &str, max_connections: u32) -> Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(url);
    bb8::Pool::builder()
        .max_size(max_connections)
        .build(manager)
        .await
        .context("Failed to build DB connection pool")
}

/// Runs pending migrations on a blocking thread and returns how many were applied.
pub async fn run_migrations_blocking(url: &str) -> Result<usize> {
    let url = url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = PgConnection::establish(&url).context("Failed to connect for migrations")?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("Failed to run migrations: {err}"))?;
        Ok(applied.len())
    })
    .await
    .context("Migration task panicked")?
}

/// Bounds how long any statement in the current transaction waits for a row lock.
pub async fn set_lock_timeout(
    conn: &mut AsyncPgConnection,
    lock_timeout_ms: u64,
) -> Result<(), InventoryError> {
    // SET does not accept bind parameters; the value is a plain integer.
    diesel::sql_query(format!("SET LOCAL lock_timeout = '{lock_timeout_ms}ms'"))
        .execute(conn)
        .await?;
    Ok(())
}

/// Serializes cart mutations and checkout for one customer until the transaction ends.
pub async fn lock_customer_cart(
    conn: &mut AsyncPgConnection,
    customer_id: i32,
) -> Result<(), InventoryError> {
    diesel::sql_query("SELECT pg_advisory_xact_lock($1, $2)")
        .bind::<Integer, _>(CART_LOCK_CLASS)
        .bind::<Integer, _>(customer_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn connection(
    pool: &DbPool,
) -> Result<bb8::PooledConnection<'_, AsyncPgConnection>, InventoryError> {
    pool.get()
        .await
        .map_err(|err| InventoryError::Pool(err.to_string()))
}

/// Re-runs `op` while it fails with a retryable error, sleeping with exponential
/// backoff between attempts. The last error is returned once attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, InventoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InventoryError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying: {err}"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_lock_timeouts_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast_policy(3), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(InventoryError::LockTimeout)
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast_policy(2), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(InventoryError::LockTimeout)
        })
        .await;
        assert!(matches!(result, Err(InventoryError::LockTimeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast_policy(5), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(InventoryError::EmptyCart)
        })
        .await;
        assert!(matches!(result, Err(InventoryError::EmptyCart)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
