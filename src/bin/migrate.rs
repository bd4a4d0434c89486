//! Standalone migration runner: applies every pending migration from the
//! `migrations` workspace member against `DATABASE_URL`/`APP__DATABASE_URL`
//! without booting the HTTP surface or any saga worker. Operators run this
//! out of band instead of setting `APP__AUTO_MIGRATE=true` in production.

use stateset_saga::config;
use stateset_saga::db::{establish_connection_from_app_config, run_migrations};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    config::init_tracing(&config.log_level, config.log_json);

    info!(database_url = %config.database_url(), "connecting to database");
    let db = establish_connection_from_app_config(&config).await?;

    info!("applying pending migrations");
    run_migrations(&db).await?;

    info!("migrations applied successfully");
    Ok(())
}
