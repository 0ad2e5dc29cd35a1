use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::{fmt, time::Duration};
use numclaim_core::telemetry::LogFormat;
use std::net::SocketAddr;

/// Where claims are persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// Postgres, provisioned on startup.
    #[default]
    Postgres,
    /// Process memory. Claims are lost on restart.
    Memory,
}

/// Runtime configuration for the `numclaim-backend` binary.
///
/// Connection settings are only used with `--storage postgres`.
#[derive(Parser, Clone)]
#[command(
    name = "numclaim-backend",
    version,
    about = "Claim service enforcing per-owner uniqueness and adjacency exclusion"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `BACKEND_ADDR`
    #[arg(long, env = "BACKEND_ADDR", default_value = "0.0.0.0:5001")]
    pub backend_addr: SocketAddr,

    /// Storage engine.
    ///
    /// Environment variable: `STORAGE`
    #[arg(long, env = "STORAGE", value_enum, default_value_t = StorageKind::Postgres)]
    pub storage: StorageKind,

    /// Environment variable: `DB_HOST`
    #[arg(long, env = "DB_HOST", default_value = "db")]
    pub db_host: String,

    /// Environment variable: `DB_PORT`
    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    /// Environment variable: `DB_USER`
    #[arg(long, env = "DB_USER", default_value = "postgres")]
    pub db_user: String,

    /// Environment variable: `DB_PASSWORD`
    #[arg(long, env = "DB_PASSWORD", default_value = "postgres", hide_env_values = true)]
    pub db_password: String,

    /// Environment variable: `DB_NAME`
    #[arg(long, env = "DB_NAME", default_value = "postgres")]
    pub db_name: String,

    /// Connections the pool keeps open.
    ///
    /// Environment variable: `DB_POOL_MIN`
    #[arg(long, env = "DB_POOL_MIN", default_value_t = 5)]
    pub db_pool_min: u32,

    /// Upper bound on pooled connections.
    ///
    /// Environment variable: `DB_POOL_MAX`
    #[arg(long, env = "DB_POOL_MAX", default_value_t = 20)]
    pub db_pool_max: u32,

    /// How long a request may wait for a pooled connection, in seconds.
    ///
    /// Environment variable: `DB_ACQUIRE_TIMEOUT_SECS`
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub db_acquire_timeout_secs: u64,

    /// Connection attempts made at startup before giving up.
    ///
    /// Environment variable: `DB_CONNECT_MAX_ATTEMPTS`
    #[arg(long, env = "DB_CONNECT_MAX_ATTEMPTS", default_value_t = 30)]
    pub db_connect_max_attempts: u32,

    /// Fixed delay between startup connection attempts, in seconds.
    ///
    /// Environment variable: `DB_CONNECT_RETRY_DELAY_SECS`
    #[arg(long, env = "DB_CONNECT_RETRY_DELAY_SECS", default_value_t = 5)]
    pub db_connect_retry_delay_secs: u64,

    /// Identify callers by a valid `X-Forwarded-For` header instead of the
    /// peer address. Only enable behind the gateway.
    ///
    /// Environment variable: `TRUST_FORWARDED_FOR`
    #[arg(long, env = "TRUST_FORWARDED_FOR", default_value_t = false)]
    pub trust_forwarded_for: bool,

    /// Console log layout: `pretty` or `json`.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Postgres connection and pool settings.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub pool_min: u32,
    pub pool_max: u32,
    pub acquire_timeout: Duration,
}

// Keep the password out of startup logs.
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("name", &self.name)
            .field("pool_min", &self.pool_min)
            .field("pool_max", &self.pool_max)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

/// Startup connection budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub backend_addr: SocketAddr,
    pub storage: StorageKind,
    pub database: DatabaseConfig,
    pub connect_retry: RetryPolicy,
    pub trust_forwarded_for: bool,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.db_pool_max == 0 {
            bail!("DB_POOL_MAX must be greater than 0");
        }
        if args.db_pool_min > args.db_pool_max {
            bail!(
                "DB_POOL_MIN ({}) must not exceed DB_POOL_MAX ({})",
                args.db_pool_min,
                args.db_pool_max
            );
        }
        if args.db_connect_max_attempts == 0 {
            bail!("DB_CONNECT_MAX_ATTEMPTS must be greater than 0");
        }
        if args.db_acquire_timeout_secs == 0 {
            bail!("DB_ACQUIRE_TIMEOUT_SECS must be greater than 0");
        }

        Ok(Self {
            backend_addr: args.backend_addr,
            storage: args.storage,
            database: DatabaseConfig {
                host: args.db_host,
                port: args.db_port,
                user: args.db_user,
                password: args.db_password,
                name: args.db_name,
                pool_min: args.db_pool_min,
                pool_max: args.db_pool_max,
                acquire_timeout: Duration::from_secs(args.db_acquire_timeout_secs),
            },
            connect_retry: RetryPolicy {
                max_attempts: args.db_connect_max_attempts,
                delay: Duration::from_secs(args.db_connect_retry_delay_secs),
            },
            trust_forwarded_for: args.trust_forwarded_for,
            log_format: args.log_format,
        })
    }
}
