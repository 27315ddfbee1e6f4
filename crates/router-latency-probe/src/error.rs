use backon::{ExponentialBuilder, Retryable};
use std::{
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tracing::warn;

pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("timed out after {deadline:?} waiting for telemetry of probe {probe_id}")]
    CorrelationTimeout { probe_id: String, deadline: Duration },
    #[error("malformed telemetry for probe {probe_id}: {reason}")]
    MalformedTelemetry { probe_id: String, reason: String },
    #[error("event stream disconnected: {0}")]
    StreamDisconnected(String),
    #[error("credential refresh failed: {0}")]
    CredentialRefresh(#[source] Box<Error>),
    #[error("startup resolution failed: {0}")]
    StartupResolution(String),
    #[error("worker failed: {0}")]
    WorkerFailed(String),
    #[error("`{command}` failed: {reason}")]
    Command { command: String, reason: String },
    #[error("http request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

impl Error {
    /// Errors that only cost the current tick; the worker keeps its supply.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CorrelationTimeout { .. } | Error::MalformedTelemetry { .. } | Error::Request(_)
        )
    }

    /// Errors after which the worker must drop its supply and resubscribe.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::StreamDisconnected(_) | Error::WebSocket(_))
    }

    /// Short label used for metric dimensions.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::CorrelationTimeout { .. } => "timeout",
            Error::MalformedTelemetry { .. } => "malformed",
            Error::StreamDisconnected(_) | Error::WebSocket(_) => "disconnected",
            Error::CredentialRefresh(_) => "credential",
            Error::StartupResolution(_) => "startup",
            Error::WorkerFailed(_) => "worker",
            Error::Command { .. } => "command",
            Error::Request(_) => "request",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
            Error::Url(_) => "url",
        }
    }
}

pub async fn with_retry<F, Fut, T>(operation: F, label: &'static str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut op = operation;
    let attempts = AtomicUsize::new(0);
    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(10))
        .with_max_times(3)
        .with_jitter();

    (move || op())
        .retry(backoff)
        .when(should_retry)
        .notify(|err: &Error, delay: Duration| {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(attempt, retry_in = ?delay, error = %err, operation = label, "transient failure");
        })
        .await
}

fn should_retry(err: &Error) -> bool {
    match err {
        Error::Command { .. } | Error::Io(_) => true,
        Error::Request(err) => err.is_timeout() || err.is_connect(),
        _ => false,
    }
}
