use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use numclaim_core::telemetry::LogFormat;
use reqwest::Url;
use std::net::SocketAddr;

/// Runtime configuration for the `numclaim-gateway` binary.
///
/// These settings control admission control, the size of the forwarding
/// worker pool and the timeouts applied on the way to the backend. All values
/// are parsed from CLI arguments or environment variables, with defaults that
/// match a single-host deployment next to a `backend` service.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "numclaim-gateway",
    version,
    about = "Rate-limited gateway in front of the numclaim backend"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `GATEWAY_ADDR`
    #[arg(long, env = "GATEWAY_ADDR", default_value = "0.0.0.0:5000")]
    pub gateway_addr: SocketAddr,

    /// Base URL of the backend. Requests go to `<url>/api/process`, health
    /// probes to `<url>/health`.
    ///
    /// Environment variable: `BACKEND_URL`
    #[arg(long, env = "BACKEND_URL", default_value = "http://backend:5001")]
    pub backend_url: String,

    /// Number of worker tasks forwarding requests concurrently.
    ///
    /// Environment variable: `MAX_CONCURRENT_REQUESTS`
    #[arg(long, env = "MAX_CONCURRENT_REQUESTS", default_value_t = 10)]
    pub max_concurrent_requests: usize,

    /// Requests that may wait for a free worker before new ones are rejected
    /// as overloaded.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 100)]
    pub queue_capacity: usize,

    /// Length of the sliding rate-limit window, in seconds.
    ///
    /// Environment variable: `RATE_LIMIT_WINDOW`
    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value_t = 60)]
    pub rate_limit_window: u64,

    /// Admissions allowed per client address within one window.
    ///
    /// Environment variable: `MAX_REQUESTS_PER_IP`
    #[arg(long, env = "MAX_REQUESTS_PER_IP", default_value_t = 20)]
    pub max_requests_per_ip: usize,

    /// Connect + read timeout for a single backend request, in seconds.
    ///
    /// Environment variable: `BACKEND_TIMEOUT_SECS`
    #[arg(long, env = "BACKEND_TIMEOUT_SECS", default_value_t = 10)]
    pub backend_timeout_secs: u64,

    /// How long a handler waits for its dispatched task, in seconds. The task
    /// itself keeps running past this point.
    ///
    /// Environment variable: `DISPATCH_TIMEOUT_SECS`
    #[arg(long, env = "DISPATCH_TIMEOUT_SECS", default_value_t = 15)]
    pub dispatch_timeout_secs: u64,

    /// Timeout for the backend health probe, in seconds.
    ///
    /// Environment variable: `HEALTH_TIMEOUT_SECS`
    #[arg(long, env = "HEALTH_TIMEOUT_SECS", default_value_t = 3)]
    pub health_timeout_secs: u64,

    /// Budget for draining queued work on shutdown, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Console log layout: `pretty` or `json`.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub gateway_addr: SocketAddr,
    pub backend_url: Url,
    pub num_workers: usize,
    pub queue_capacity: usize,
    pub rate_limit_window: Duration,
    pub max_requests_per_window: usize,
    pub backend_timeout: Duration,
    pub dispatch_timeout: Duration,
    pub health_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_concurrent_requests == 0 {
            bail!("MAX_CONCURRENT_REQUESTS must be greater than 0");
        }
        if args.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be greater than 0");
        }
        if args.rate_limit_window == 0 {
            bail!("RATE_LIMIT_WINDOW must be greater than 0");
        }
        if args.max_requests_per_ip == 0 {
            bail!("MAX_REQUESTS_PER_IP must be greater than 0");
        }
        if args.backend_timeout_secs == 0 || args.dispatch_timeout_secs == 0 {
            bail!("BACKEND_TIMEOUT_SECS and DISPATCH_TIMEOUT_SECS must be greater than 0");
        }
        if args.health_timeout_secs == 0 || args.shutdown_timeout_secs == 0 {
            bail!("HEALTH_TIMEOUT_SECS and SHUTDOWN_TIMEOUT_SECS must be greater than 0");
        }

        let backend_url = Url::parse(&args.backend_url)
            .map_err(|e| anyhow::anyhow!("BACKEND_URL `{}` is invalid: {e}", args.backend_url))?;
        if backend_url.scheme() != "http" {
            bail!("BACKEND_URL must use the http scheme");
        }

        Ok(Self {
            gateway_addr: args.gateway_addr,
            backend_url,
            num_workers: args.max_concurrent_requests,
            queue_capacity: args.queue_capacity,
            rate_limit_window: Duration::from_secs(args.rate_limit_window),
            max_requests_per_window: args.max_requests_per_ip,
            backend_timeout: Duration::from_secs(args.backend_timeout_secs),
            dispatch_timeout: Duration::from_secs(args.dispatch_timeout_secs),
            health_timeout: Duration::from_secs(args.health_timeout_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            log_format: args.log_format,
        })
    }
}
