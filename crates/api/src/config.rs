/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on draining in-flight orchestration runs at shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Lifetime of a connection row after connect (default: `7200`).
    pub connection_ttl_secs: u64,
    /// How often expired connection rows are purged (default: `300`).
    pub connection_sweep_interval_secs: u64,
    /// Postgres connection string. Unset means in-memory stores.
    pub database_url: Option<String>,
    /// Base URL of an external connection gateway. Unset means pushes go to
    /// the sockets held by this process.
    pub connection_gateway_url: Option<String>,
    /// Declares this process the only replica over `DATABASE_URL`, so local
    /// socket delivery sees every live connection (default: `false`).
    pub single_replica: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                    |
    /// |----------------------------------|----------------------------|
    /// | `HOST`                           | `0.0.0.0`                  |
    /// | `PORT`                           | `3000`                     |
    /// | `CORS_ORIGINS`                   | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`          | `30`                       |
    /// | `CONNECTION_TTL_SECS`            | `7200`                     |
    /// | `CONNECTION_SWEEP_INTERVAL_SECS` | `300`                      |
    /// | `DATABASE_URL`                   | (unset)                    |
    /// | `CONNECTION_GATEWAY_URL`         | (unset)                    |
    /// | `SINGLE_REPLICA`                 | `false`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let connection_ttl_secs: u64 = std::env::var("CONNECTION_TTL_SECS")
            .unwrap_or_else(|_| "7200".into())
            .parse()
            .expect("CONNECTION_TTL_SECS must be a valid u64");

        let connection_sweep_interval_secs: u64 = std::env::var("CONNECTION_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("CONNECTION_SWEEP_INTERVAL_SECS must be a valid u64");

        let database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        let connection_gateway_url = std::env::var("CONNECTION_GATEWAY_URL")
            .ok()
            .filter(|s| !s.is_empty());

        let single_replica: bool = std::env::var("SINGLE_REPLICA")
            .unwrap_or_else(|_| "false".into())
            .parse()
            .expect("SINGLE_REPLICA must be true or false");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            connection_ttl_secs,
            connection_sweep_interval_secs,
            database_url,
            connection_gateway_url,
            single_replica,
        }
    }

    /// Whether pushes may go to sockets held by this process. Local delivery
    /// prunes registry rows it does not hold, which on a shared registry
    /// would delete connections owned by other replicas.
    pub fn local_delivery_allowed(&self) -> bool {
        self.connection_gateway_url.is_some() || self.database_url.is_none() || self.single_replica
    }

    pub fn connection_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.connection_ttl_secs.min(i32::MAX as u64) as i64)
    }
}
