// src/utils/db_connect.rs
use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::info;
use std::env;
use std::time::Duration;
use tokio_postgres::{Config, NoTls};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

const APPLICATION_NAME: &str = "person_deduplication";

/// Where the crime records database lives and how many connections the pool may open.
#[derive(Debug, Clone, PartialEq)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "crime_records".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            pool_size: 20,
        }
    }
}

impl DbSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads `POSTGRES_*` keys; missing or unparseable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: String| lookup(key).filter(|v| !v.trim().is_empty()).unwrap_or(default);
        Self {
            host: text("POSTGRES_HOST", defaults.host),
            port: lookup("POSTGRES_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            dbname: text("POSTGRES_DB", defaults.dbname),
            user: text("POSTGRES_USER", defaults.user),
            password: lookup("POSTGRES_PASSWORD").unwrap_or(defaults.password),
            pool_size: lookup("POSTGRES_POOL_SIZE")
                .and_then(|v| v.trim().parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(defaults.pool_size),
        }
    }

    pub fn pg_config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(&self.password)
            .application_name(APPLICATION_NAME)
            .connect_timeout(Duration::from_secs(10));
        config
    }
}

/// Opens the pool described by the `POSTGRES_*` environment and checks it with a test query.
pub async fn connect() -> Result<PgPool> {
    connect_with(&DbSettings::from_env()).await
}

pub async fn connect_with(settings: &DbSettings) -> Result<PgPool> {
    info!(
        "Connecting to PostgreSQL {}:{}/{} as {} (pool size {})",
        settings.host, settings.port, settings.dbname, settings.user, settings.pool_size
    );
    let manager = PostgresConnectionManager::new(settings.pg_config(), NoTls);
    let pool = Pool::builder()
        .max_size(settings.pool_size)
        .min_idle(Some(2.min(settings.pool_size)))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    let conn = pool
        .get()
        .await
        .context("Failed to get test connection from pool")?;
    conn.query_one("SELECT 1", &[])
        .await
        .context("Test query 'SELECT 1' failed")?;
    drop(conn);
    info!("Database connection pool ready");
    Ok(pool)
}

/// (open connections, idle connections) for progress messages.
pub fn get_pool_status(pool: &PgPool) -> (u32, u32) {
    let state = pool.state();
    (state.connections, state.idle_connections)
}
