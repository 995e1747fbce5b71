//! # wmctl: Workload Migration Control
//!
//! `wmctl` is a CRUD backend that simulates migrating disk volumes ("mount
//! points") from a source workload onto a target workload living in a cloud or
//! VM environment.
//!
//! ## Overview
//!
//! Clients register workloads (IP-addressed hosts with credentials), describe
//! their mount points, define migration targets (a cloud type, cloud
//! credentials and the workload that receives the volumes) and create
//! migrations selecting some of the source's mount points. Running a migration
//! replaces every mount point on the target workload with copies of the
//! selection and records the outcome in the migration's state.
//!
//! ## Architecture
//!
//! The HTTP layer is built on [Axum](https://github.com/tokio-rs/axum). All
//! persistence goes through the [`Storage`](db::handlers::Storage) trait, with
//! a PostgreSQL backend for deployments and an in-memory backend for
//! development and tests.
//!
//! ### Core Components
//!
//! The **API layer** ([`api`]) exposes RESTful CRUD endpoints under `/api/v1`
//! plus `POST /migrations/{id}/run` and task status endpoints.
//!
//! The **database layer** ([`db`]) defines the records and both storage
//! backends. Constraint violations from either backend are reported the same
//! way, so handlers never care which one is in use.
//!
//! The **migration runner** ([`migration`]) is the state machine:
//! `not_started -> running -> success | error`. Runs against the same target
//! workload are serialised; runs against different targets proceed in
//! parallel.
//!
//! The **task queue** ([`tasks`]) runs migrations in the background when the
//! run mode is `async`, retrying transient failures according to the
//! configured retry policy.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use wmctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = wmctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     wmctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod migration;
mod openapi;
pub mod tasks;
pub mod telemetry;
pub mod types;
pub mod validation;

#[cfg(test)]
pub mod test_utils;

use crate::config::{CorsOrigin, DatabaseConfig, PoolSettings};
use crate::db::handlers::{InMemoryStorage, PostgresStorage, Storage};
use crate::migration::MigrationRunner;
use crate::openapi::ApiDoc;
use crate::tasks::TokioJobQueue;
use axum::http::{self, HeaderValue};
use axum::{
    Router,
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .storage(storage.clone())
///     .runner(MigrationRunner::new(storage))
///     .queue(queue)
///     .config(config)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub runner: MigrationRunner,
    pub queue: Arc<TokioJobQueue>,
    pub config: Config,
}

/// Get the wmctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

fn pool_options(settings: &PoolSettings) -> PgPoolOptions {
    let optional = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(optional(settings.idle_timeout_secs))
        .max_lifetime(optional(settings.max_lifetime_secs))
}

/// Connect the configured storage backend, running schema migrations for PostgreSQL.
/// Returns the storage and, for PostgreSQL, the pool so it can be closed on shutdown.
#[instrument(skip_all)]
async fn setup_storage(config: &Config) -> anyhow::Result<(Arc<dyn Storage>, Option<PgPool>)> {
    match &config.database {
        DatabaseConfig::Memory => {
            info!("Using in-memory storage: data will be lost on shutdown");
            Ok((Arc::new(InMemoryStorage::new()), None))
        }
        DatabaseConfig::External { url, pool } => {
            info!("Using external database");
            let pg_pool = pool_options(pool).connect(url).await?;
            migrator().run(&pg_pool).await?;
            Ok((Arc::new(PostgresStorage::new(pg_pool.clone())), Some(pg_pool)))
        }
    }
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // `*` cannot appear in an origin list; it replaces the list entirely
    let allow_origin = if config.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        if config.cors.allow_credentials {
            anyhow::bail!("CORS wildcard origin cannot be combined with allow_credentials");
        }
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the main application router with all endpoints and middleware.
///
/// - `/api/v1/*`: resource CRUD, migration runs and task status
/// - `/healthz`: liveness
/// - `/api-docs/openapi.json` and `/docs`: API documentation
///
/// CORS and request tracing wrap every route.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    use api::handlers::{migration_targets, migrations, mount_points, tasks, workloads};

    let api_routes = Router::new()
        // Workloads
        .route("/workloads", get(workloads::list_workloads).post(workloads::create_workload))
        .route(
            "/workloads/{id}",
            get(workloads::get_workload)
                .patch(workloads::update_workload)
                .delete(workloads::delete_workload),
        )
        // Mount points
        .route(
            "/mountpoints",
            get(mount_points::list_mount_points).post(mount_points::create_mount_point),
        )
        .route(
            "/mountpoints/{id}",
            get(mount_points::get_mount_point)
                .patch(mount_points::update_mount_point)
                .delete(mount_points::delete_mount_point),
        )
        // Migration targets
        .route(
            "/targets",
            get(migration_targets::list_migration_targets).post(migration_targets::create_migration_target),
        )
        .route(
            "/targets/{id}",
            get(migration_targets::get_migration_target)
                .patch(migration_targets::update_migration_target)
                .delete(migration_targets::delete_migration_target),
        )
        // Migrations
        .route("/migrations", get(migrations::list_migrations).post(migrations::create_migration))
        .route(
            "/migrations/{id}",
            get(migrations::get_migration)
                .patch(migrations::update_migration)
                .delete(migrations::delete_migration),
        )
        .route("/migrations/{id}/run", post(migrations::run_migration))
        // Background tasks
        .route("/tasks/{id}", get(tasks::get_task))
        .route("/tasks/{id}/cancel", post(tasks::cancel_task))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .route("/api-docs/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(create_cors_layer(&state.config)?);

    // Add tracing layer
    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background work that must be drained on shutdown.
///
/// Currently the job queue running asynchronous migrations: on
/// [`shutdown`](BackgroundServices::shutdown) queued and backing-off jobs are
/// cancelled and executing attempts are awaited.
pub struct BackgroundServices {
    queue: Arc<TokioJobQueue>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.queue.shutdown().await;
    }
}

/// Main application struct that owns all resources and manages the lifecycle.
///
/// 1. **Create**: [`Application::new`] connects storage, runs schema migrations,
///    recovers runs interrupted by a previous crash and builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: When the shutdown signal is received, drains background
///    tasks and closes the database pool
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let (storage, pool) = setup_storage(&config).await?;
        Self::with_storage(config, storage, pool).await
    }

    /// Create an application on top of an existing storage backend
    pub async fn with_storage(config: Config, storage: Arc<dyn Storage>, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting wmctl with configuration: {:#?}", config);

        let runner = MigrationRunner::new(storage.clone());
        // Nothing else runs migrations yet, so anything still `running` was interrupted
        runner.recover_interrupted().await?;

        let queue = Arc::new(
            TokioJobQueue::new(config.tasks.retry.build())
                .with_max_concurrent(config.tasks.max_concurrent)
                .with_retention(config.tasks.retention),
        );

        let app_state = AppState::builder()
            .storage(storage)
            .runner(runner)
            .queue(queue.clone())
            .config(config.clone())
            .build();

        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            config,
            pool,
            bg_services: BackgroundServices { queue },
        })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "wmctl listening on http://{}, docs at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Shutdown background services and wait for tasks to complete
        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::models::migrations::MigrationState;
    use crate::test_utils::*;
    use axum::http::StatusCode;

    #[test_log::test(tokio::test)]
    async fn test_health_and_docs() {
        let (server, _state) = create_test_app(create_test_config()).await;

        server.get("/healthz").await.assert_text("OK");

        let doc: serde_json::Value = server.get("/api-docs/openapi.json").await.json();
        assert!(doc["paths"]["/migrations/{migration_id}/run"].is_object());

        server.get("/docs").await.assert_status_ok();
        server.get("/api/v1/nothing-here").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn test_startup_recovers_interrupted_migrations() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let scenario = seed_scenario(storage.as_ref()).await;
        let migration = create_migration(storage.as_ref(), &scenario, vec![scenario.d_drive.id]).await;
        // Simulate a crash mid-run
        storage.try_start_migration(migration.id).await.unwrap().unwrap();

        let app = Application::with_storage(create_test_config(), storage.clone(), None)
            .await
            .unwrap();
        let reloaded = app.state().storage.get_migration(migration.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, MigrationState::Error);
    }

    #[test_log::test(tokio::test)]
    async fn test_shutdown_waits_for_executing_migration() {
        use crate::tasks::{JobQueue, JobStatus, MigrationJob};
        use std::time::Duration;

        let app = Application::new(create_test_config()).await.unwrap();
        let state = app.state().clone();
        let scenario = seed_scenario(state.storage.as_ref()).await;
        let migration = create_migration(state.storage.as_ref(), &scenario, vec![scenario.d_drive.id]).await;

        let job = MigrationJob::new(state.runner.clone(), migration.id, Duration::from_millis(200));
        let handle = state.queue.submit(Arc::new(job));
        while !matches!(handle.status(), JobStatus::Running { .. }) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (_server, bg_services) = app.into_test_server();
        bg_services.shutdown().await;

        assert!(matches!(handle.status(), JobStatus::Succeeded { attempts: 1, .. }));
        let finished = state.storage.get_migration(migration.id).await.unwrap().unwrap();
        assert_eq!(finished.state, MigrationState::Success);
    }

    #[test]
    fn test_cors_layer_from_config() {
        let mut config = create_test_config();
        config.cors.allowed_origins = vec![CorsOrigin::Url("https://app.example.com/".parse().unwrap())];
        config.cors.allow_credentials = true;
        config.cors.max_age = None;
        assert!(create_cors_layer(&config).is_ok());

        config.cors.allowed_origins.push(CorsOrigin::Wildcard);
        assert!(create_cors_layer(&config).is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_default_config_allows_any_origin() {
        let app = Application::new(Config::default()).await.unwrap();
        let (server, _bg_services) = app.into_test_server();

        let response = server
            .get("/healthz")
            .add_header(http::header::ORIGIN, HeaderValue::from_static("https://anywhere.example"))
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.headers().get(http::header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("*"))
        );
    }
}
