//! elasticd — the Elasticity daemon.
//!
//! Single binary that assembles the controller:
//! - Policy store (redb)
//! - Rate source (Prometheus or fixed)
//! - Reconcile loop
//! - REST API + metrics
//!
//! # Usage
//!
//! ```text
//! elasticd run --port 8080 --data-dir /var/lib/elastic --prometheus-url http://prometheus:9090
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use elastic_autoscale::{Controller, FixedRateSource, PrometheusRateSource, RateSource};
use elastic_metrics::{ControllerMetrics, PrometheusClient};
use elastic_state::StateStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "elasticd", about = "Buffered elasticity autoscaling controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and the REST API in one process.
    Run(RunArgs),
}

/// Flags override the config file, which overrides the defaults.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Path to an elasticd.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for persistent state.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Interval between rate samples per policy, e.g. "10s".
    #[arg(long)]
    poll_interval: Option<String>,

    /// Minimum time since the last scale action before scaling down, e.g. "3m".
    #[arg(long)]
    scale_down_cooldown: Option<String>,

    /// Number of parallel reconcile workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Prometheus base URL, e.g. "http://prometheus:9090".
    #[arg(long)]
    prometheus_url: Option<String>,

    /// Counter metric the queue rate is computed over.
    #[arg(long)]
    rate_metric: Option<String>,

    /// Use this rate for every workload instead of querying Prometheus.
    #[arg(long)]
    fixed_rate: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,elasticd=debug,elastic_autoscale=debug,elastic_state=debug",
                )
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            let config = resolve_config(&args, |key| std::env::var(key).ok())?;
            run(config).await
        }
    }
}

/// Layer defaults, config file, environment and flags.
fn resolve_config<F>(args: &RunArgs, env: F) -> anyhow::Result<DaemonConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    config.apply_env(env);

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(interval) = &args.poll_interval {
        config.controller.poll_interval = interval.clone();
    }
    if let Some(cooldown) = &args.scale_down_cooldown {
        config.controller.scale_down_cooldown = cooldown.clone();
    }
    if let Some(workers) = args.workers {
        config.controller.workers = workers;
    }
    if let Some(url) = &args.prometheus_url {
        config.prometheus.url = url.clone();
    }
    if let Some(metric) = &args.rate_metric {
        config.prometheus.metric = metric.clone();
    }
    if args.fixed_rate.is_some() {
        config.prometheus.fixed_rate = args.fixed_rate;
    }
    Ok(config)
}

fn rate_source(config: &DaemonConfig) -> anyhow::Result<Arc<dyn RateSource>> {
    if let Some(rate) = config.prometheus.fixed_rate {
        warn!(rate, "using a fixed rate for every workload");
        return Ok(Arc::new(FixedRateSource(rate)));
    }
    let client = PrometheusClient::from_url(&config.prometheus.url, config.prometheus_timeout()?)?;
    info!(
        address = client.address(),
        timeout_ms = client.timeout().as_millis() as u64,
        metric = %config.prometheus.metric,
        "prometheus rate source configured"
    );
    Ok(Arc::new(
        PrometheusRateSource::new(client)
            .with_metric(config.prometheus.metric.clone())
            .with_window(config.prometheus.window.clone()),
    ))
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("elasticity daemon starting");

    let controller_config = config.controller_config()?;
    let rates = rate_source(&config)?;

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("elastic.redb");

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let metrics = Arc::new(ControllerMetrics::new());
    let controller = Arc::new(Controller::standalone(
        store.clone(),
        rates,
        metrics.clone(),
        controller_config,
    ));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start reconcile loop ───────────────────────────────────

    // A failed initial sync is fatal; nothing is served without it.
    let controller_handle = controller.start(shutdown_rx).await?;

    // ── Start API server ───────────────────────────────────────

    let router = elastic_api::build_router(store, metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    supervise(server, controller_handle).await?;

    info!("elasticity daemon stopped");
    Ok(())
}

/// Wait for the API server and the reconcile loop.
///
/// A controller task that dies takes the daemon down with it instead of
/// leaving the API up with nothing reconciling.
async fn supervise<S>(server: S, mut controller: JoinHandle<()>) -> anyhow::Result<()>
where
    S: IntoFuture<Output = std::io::Result<()>>,
{
    let server = server.into_future();
    tokio::pin!(server);
    tokio::select! {
        served = &mut server => {
            served?;
            // Wait for in-flight reconciles.
            controller.await?;
        }
        stopped = &mut controller => {
            if let Err(e) = stopped {
                error!(error = %e, "controller task failed");
                anyhow::bail!("controller stopped unexpectedly: {e}");
            }
            // Only the shutdown signal stops a healthy controller.
            server.await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(args.iter().copied()).unwrap();
        match cli.command {
            Command::Run(args) => args,
        }
    }

    #[test]
    fn flags_override_defaults() {
        let args = parse(&[
            "elasticd",
            "run",
            "--port",
            "9100",
            "--poll-interval",
            "20s",
            "--workers",
            "3",
            "--fixed-rate",
            "42",
        ]);
        let config = resolve_config(&args, |_| None).unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.prometheus.fixed_rate, Some(42.0));

        let controller = config.controller_config().unwrap();
        assert_eq!(controller.poll_interval, Duration::from_secs(20));
        assert_eq!(controller.workers, 3);
    }

    #[test]
    fn flag_beats_environment() {
        let env = |key: &str| match key {
            "PROMETHEUS_HOST" => Some("prom".to_string()),
            _ => None,
        };
        let config = resolve_config(&RunArgs::default(), env).unwrap();
        assert_eq!(config.prometheus.url, "http://prom:9090");

        let args = parse(&["elasticd", "run", "--prometheus-url", "http://other:9090"]);
        let config = resolve_config(&args, env).unwrap();
        assert_eq!(config.prometheus.url, "http://other:9090");
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = parse(&["elasticd", "run", "--config", "/nonexistent/elasticd.toml"]);
        assert!(resolve_config(&args, |_| None).is_err());
    }

    #[test]
    fn rate_source_rejects_bad_url() {
        let mut config = DaemonConfig::default();
        config.prometheus.url = "ftp://prometheus".to_string();
        assert!(rate_source(&config).is_err());

        config.prometheus.fixed_rate = Some(1.0);
        assert!(rate_source(&config).is_ok());
    }

    #[tokio::test]
    async fn dead_controller_stops_the_daemon() {
        let controller: JoinHandle<()> = tokio::spawn(async { panic!("reconcile loop died") });
        let server = std::future::pending::<std::io::Result<()>>();

        let result = tokio::time::timeout(Duration::from_secs(2), supervise(server, controller))
            .await
            .expect("daemon kept serving after the controller died");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("controller stopped unexpectedly"));
    }

    #[tokio::test]
    async fn server_shutdown_waits_for_controller() {
        let (tx, mut rx) = watch::channel(false);
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let controller = {
            let finished = finished.clone();
            tokio::spawn(async move {
                let _ = rx.changed().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                finished.store(true, std::sync::atomic::Ordering::SeqCst);
            })
        };
        let server = async move {
            let _ = tx.send(true);
            Ok::<_, std::io::Error>(())
        };

        supervise(server, controller).await.unwrap();
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
    }
}
