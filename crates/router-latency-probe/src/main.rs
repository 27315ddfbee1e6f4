use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use router_latency_probe::{
    client::{CfCli, CredentialProvider, Reporter, SharedCredential},
    probe::SystemClock,
    scheduler::{WorkerContext, WorkerPool, WorkerSettings},
    settings::{AppArgs, Settings},
    stream::WebsocketSupplier,
    with_retry,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = AppArgs::parse();
    let settings = Settings::new(args.config.clone())?.with_args(&args)?;

    init_logging(&settings.log);

    PrometheusBuilder::new()
        .with_http_listener(settings.metrics_addr)
        .install()?;

    export_build_info();

    let shutdown_listener = shutdown_listener()?;

    let cf = CfCli::new(settings.cf.clone())?;
    with_retry(|| cf.login(), "cf login")
        .await
        .context("failed to log in to the cloud controller")?;
    let token = with_retry(|| cf.current_token(), "cf oauth-token")
        .await
        .context("failed to fetch the initial auth token")?;
    let target = with_retry(|| cf.resolve_target(&settings.target.app_name), "cf app")
        .await
        .with_context(|| format!("failed to resolve app `{}`", settings.target.app_name))?;

    let stream_endpoint = settings.stream_endpoint()?;
    let http = reqwest::Client::builder()
        .timeout(settings.probe.request_timeout())
        .build()?;

    let reporter = settings.sink.as_ref().map(|sink| {
        Arc::new(Reporter::new(
            http.clone(),
            sink.url.clone(),
            sink.api_key.as_deref(),
            settings.target.deployment.clone(),
        ))
    });
    if reporter.is_none() {
        info!("no metrics sink configured; breakdowns are only logged");
    }

    info!(
        app = %settings.target.app_name,
        guid = %target.guid,
        url = %target.url,
        stream = %stream_endpoint,
        workers = settings.probe.concurrency,
        "router latency probe starting"
    );

    let provider: Arc<dyn CredentialProvider> = Arc::new(cf);
    let context = WorkerContext {
        target: Arc::new(target),
        credential: Arc::new(SharedCredential::new(token)),
        provider,
        supplier: Arc::new(WebsocketSupplier::new(
            stream_endpoint,
            settings.cf.skip_ssl_validation,
        )),
        reporter,
        http,
        clock: Arc::new(SystemClock::new()),
        settings: WorkerSettings::from(&settings.probe),
    };

    let result = WorkerPool::new(context, settings.probe.concurrency)
        .run(shutdown_listener)
        .await;

    if let Err(err) = result {
        error!(?err, "worker pool exited with error");
        return Err(err.into());
    }

    info!("router latency probe shutting down");

    Ok(())
}

fn init_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn shutdown_listener() -> std::io::Result<CancellationToken> {
    let cancellation_token = CancellationToken::new();
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::spawn({
        let cancellation_token = cancellation_token.clone();
        async move {
            tokio::select! {
                _ = sigterm.recv() => info!("SIGTERM received"),
                _ = signal::ctrl_c() => info!("SIGINT received"),
            }
            cancellation_token.cancel();
        }
    });

    Ok(cancellation_token)
}

fn export_build_info() {
    let version = option_env!("BUILD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
    let build_commit = option_env!("BUILD_COMMIT").unwrap_or("UNKNOWN");
    let build_date = option_env!("DATE").unwrap_or("UNKNOWN");

    metrics::gauge!(
        "router_probe_build_info",
        "version" => version,
        "commit" => build_commit,
        "date" => build_date
    )
    .set(1);
}
