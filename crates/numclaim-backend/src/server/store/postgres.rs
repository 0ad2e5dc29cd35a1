//! Postgres claim store.
//!
//! Claims live in `numclaim.claims`. Uniqueness of `(owner_key, number)` is a
//! table constraint, so concurrent inserts of the same pair are arbitrated by
//! the database: exactly one succeeds and the others get SQLSTATE `23505`.

use super::{ClaimSession, ClaimStore, InsertOutcome, StoreError};
use crate::server::config::DatabaseConfig;
use sqlx::{
    PgPool, Postgres,
    pool::PoolConnection,
    postgres::{PgConnectOptions, PgPoolOptions},
};

const CREATE_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS numclaim";

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS numclaim.claims (
        owner_key  VARCHAR(45) NOT NULL,
        number     BIGINT      NOT NULL,
        claimed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (owner_key, number)
    )
"#;

const EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM numclaim.claims
        WHERE owner_key = $1 AND number = $2
    )
"#;

const INSERT: &str = "INSERT INTO numclaim.claims (owner_key, number) VALUES ($1, $2)";

#[derive(Clone, Debug)]
pub struct PgClaimStore {
    pool: PgPool,
}

impl PgClaimStore {
    /// Opens the pool and provisions the schema. Either step failing is one
    /// failed connection attempt.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the server cannot be reached,
    /// [`StoreError::Query`] if provisioning is rejected.
    #[tracing::instrument(skip_all, fields(host = %config.host, port = config.port, db = %config.name))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max)
            .min_connections(config.pool_min)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(classify)?;

        let store = Self { pool };
        store.provision().await?;
        Ok(store)
    }

    async fn provision(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        tracing::info!("Database schema initialized");
        Ok(())
    }

    /// Closes every pooled connection. Further acquires fail as unavailable.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl ClaimStore for PgClaimStore {
    type Session = PgSession;

    async fn acquire(&self) -> Result<PgSession, StoreError> {
        let conn = self.pool.acquire().await.map_err(classify)?;
        Ok(PgSession { conn })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

/// One pooled connection, returned to the pool on drop.
pub struct PgSession {
    conn: PoolConnection<Postgres>,
}

impl ClaimSession for PgSession {
    async fn exists(&mut self, owner_key: &str, number: i64) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(EXISTS)
            .bind(owner_key)
            .bind(number)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(classify)
    }

    async fn insert(&mut self, owner_key: &str, number: i64) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(INSERT)
            .bind(owner_key)
            .bind(number)
            .execute(&mut *self.conn)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(InsertOutcome::Duplicate),
            Err(e) => Err(classify(e)),
        }
    }
}

/// Connection-level failures are `Unavailable`; everything else the server
/// said is a `Query` error. SQLSTATE class 08 is a connection exception and
/// 57P0x an operator shutdown.
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        sqlx::Error::Database(db)
            if db
                .code()
                .is_some_and(|code| code.starts_with("08") || code.starts_with("57P0")) =>
        {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Query(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_unavailable() {
        assert!(matches!(
            classify(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            classify(sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            classify(sqlx::Error::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused
            ))),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn decoding_problems_are_query_errors() {
        assert!(matches!(
            classify(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
        assert!(matches!(
            classify(sqlx::Error::ColumnNotFound("exists".into())),
            StoreError::Query(_)
        ));
    }

    #[tokio::test]
    async fn unreachable_server_fails_connect_as_unavailable() {
        // Reserve a port and release it so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            name: "postgres".to_string(),
            pool_min: 0,
            pool_max: 1,
            acquire_timeout: core::time::Duration::from_secs(2),
        };

        let err = PgClaimStore::connect(&config).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)), "{err:?}");
    }
}
