use axum::Router;
use deferra_core::config::{AppConfig, ConfigError, LoadOptions};
use deferra_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::{api, health};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
}

impl Application {
    /// API routes plus `/health`, sharing one pool.
    pub fn router(&self) -> Router {
        let state = api::ApiState::new(self.db_pool.clone(), &self.config.lifecycle);
        api::router(state).merge(health::router(self.db_pool.clone()))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        max_connections = config.database.max_connections,
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    Ok(Application { config, db_pool })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use deferra_core::config::{ConfigOverrides, LoadOptions};
    use tower::ServiceExt;

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str, max_conflict_retries: Option<u32>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                max_conflict_retries,
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_lifecycle_settings() {
        let result = bootstrap(overrides("sqlite::memory:", Some(99))).await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("max_conflict_retries"));
    }

    #[tokio::test]
    async fn bootstrap_applies_schema_and_serves_health() {
        let app = bootstrap(overrides("sqlite::memory:", None))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('users', 'deferrals', 'audit_log', 'notifications')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected workflow tables to be available after bootstrap");
        assert_eq!(table_count, 4, "bootstrap should create the workflow tables");

        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("health response");
        assert_eq!(response.status(), StatusCode::OK);

        app.db_pool.close().await;
    }
}
