use clap::Parser;
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use proxy::handler::NotFound;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;

/// HTTP gateway routing to Kubernetes services by path annotation.
#[derive(Parser)]
#[command(name = "k8s-svc-proxy")]
struct Cli {
    /// YAML config file. Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the main listener port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {e}", path.display());
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.proxy.listener.port = port;
    }
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        process::exit(1);
    }

    let _sentry = init_logging(&config.logging);
    if let Some(metrics) = &config.metrics {
        init_metrics(metrics);
    }
    shared::metrics_defs::describe_all(proxy::metrics_defs::ALL_METRICS);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "could not start runtime");
            process::exit(1);
        }
    };

    tracing::info!(
        listener = config.proxy.listener.port,
        admin = config.proxy.admin_listener.port,
        "starting k8s-svc-proxy"
    );
    if let Err(e) = runtime.block_on(proxy::run(config.proxy, Arc::new(NotFound))) {
        tracing::error!(error = %e, "gateway stopped");
        process::exit(1);
    }
}

fn init_logging(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let guard = logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(metrics: &MetricsConfig) {
    let recorder = match StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some("k8s_svc_proxy"))
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::warn!(error = %e, "statsd exporter disabled");
            return;
        }
    };

    if let Err(e) = metrics::set_global_recorder(recorder) {
        tracing::warn!(error = %e, "metrics recorder already installed");
    }
}
