use clap::Parser;
use std::fmt;
use wmctl::config::{Args, DatabaseConfig, RetryPolicyConfig, RunMode};
use wmctl::{Application, Config, telemetry};

/// The parts of a configuration that change how migrations behave, without
/// secrets (database URLs carry passwords).
struct Summary<'a>(&'a Config);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.0;
        let storage = match &config.database {
            DatabaseConfig::Memory => "memory (not persisted)".to_string(),
            DatabaseConfig::External { pool, .. } => format!("postgres (pool {}..{})", pool.min_connections, pool.max_connections),
        };
        let run_mode = match config.migrations.run_mode {
            RunMode::Sync => "sync",
            RunMode::Async => "async",
        };
        let retry = match &config.tasks.retry {
            RetryPolicyConfig::Fixed { delay, max_retries } => {
                format!("fixed {} x{}", humantime::format_duration(*delay), max_retries)
            }
            RetryPolicyConfig::Exponential {
                backoff,
                factor,
                max_backoff,
                max_retries,
            } => format!(
                "exponential {} *{} up to {} x{}",
                humantime::format_duration(*backoff),
                factor,
                humantime::format_duration(*max_backoff),
                max_retries
            ),
        };
        let concurrency = config
            .tasks
            .max_concurrent
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string());

        writeln!(f, "listen:          {}:{}", config.host, config.port)?;
        writeln!(f, "storage:         {storage}")?;
        writeln!(f, "run mode:        {run_mode}")?;
        writeln!(f, "transfer delay:  {}", humantime::format_duration(config.migrations.simulated_delay))?;
        writeln!(f, "task retries:    {retry}")?;
        write!(f, "task concurrency: {concurrency}")
    }
}

/// Resolves on SIGTERM or Ctrl+C. In-flight migrations are drained by
/// [`Application::serve`] after this returns.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "Ctrl+C",
        _ = terminate => "SIGTERM",
    };
    tracing::info!("Received {received}, draining running migrations before exit");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration {} is valid.\n{}", args.config, Summary(&config));
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::info!("wmctl {} starting with {}", env!("CARGO_PKG_VERSION"), args.config);
    for line in Summary(&config).to_string().lines() {
        tracing::info!("  {line}");
    }

    // Interrupted runs are failed during Application::new, before the listener binds
    Application::new(config).await?.serve(shutdown_signal()).await
}
