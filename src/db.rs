use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbBackend, DbErr, Statement};
use sea_orm_migration::MigratorTrait;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

pub type DbPool = DatabaseConnection;

/// Retry policy for DB operations that race with another writer on the
/// same row (conditional UPDATEs, conflicting reservations). Separate from
/// the migration/connection establishment path, which fails fast instead.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

fn is_retryable_error(err: &DbErr) -> bool {
    match err {
        DbErr::Conn(_) => true,
        DbErr::ConnectionAcquire(_) => true,
        DbErr::Query(ref runtime_err) => {
            let msg = runtime_err.to_string().to_lowercase();
            msg.contains("connection")
                || msg.contains("timeout")
                || msg.contains("broken pipe")
                || msg.contains("reset by peer")
                || msg.contains("deadlock")
        }
        _ => false,
    }
}

pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, DbErr>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbErr>>,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    info!(operation = %operation_name, attempts, "db operation succeeded after retry");
                    counter!("stateset_db.retry.success", 1, "operation" => operation_name.to_string());
                }
                return Ok(result);
            }
            Err(err) => {
                if attempts >= config.max_retries || !is_retryable_error(&err) {
                    error!(operation = %operation_name, attempts, error = %err, "db operation failed");
                    counter!("stateset_db.retry.exhausted", 1, "operation" => operation_name.to_string());
                    return Err(err);
                }
                warn!(operation = %operation_name, attempts, delay_ms = delay.as_millis() as u64, error = %err, "retrying db operation");
                counter!("stateset_db.retry.attempt", 1, "operation" => operation_name.to_string());
                sleep(delay).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    pub statement_timeout: Option<Duration>,
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
            statement_timeout: Some(Duration::from_secs(cfg.db_statement_timeout_secs)),
        }
    }
}

pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(?config, "configuring database connection");

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(true);

    gauge!("stateset_db.max_connections", config.max_connections as f64);

    let pool = Database::connect(opt).await?;

    if let Some(timeout) = config.statement_timeout {
        let backend = pool.get_database_backend();
        if backend == DbBackend::Postgres {
            let timeout_ms = timeout.as_millis() as i64;
            let sql = format!("SET statement_timeout = {}", timeout_ms);
            if let Err(e) = pool.execute(Statement::from_string(backend, sql)).await {
                warn!(error = %e, "failed to set statement timeout");
            }
        }
    }

    info!("database connection pool established");
    Ok(pool)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Runs pending migrations. Called at startup when `auto_migrate` is set;
/// otherwise operators run the `migrate` binary out of band.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    migrations::Migrator::up(pool, None)
        .await
        .map_err(ServiceError::Database)
}

pub async fn close_pool(pool: DbPool) -> Result<(), ServiceError> {
    info!("closing database connection pool");
    pool.close().await.map_err(ServiceError::Database)
}
