#![allow(dead_code)]

use async_trait::async_trait;
use futures::{StreamExt, stream};
use mockito::{Matcher, Mock, ServerGuard};
use router_latency_probe::{
    Error, Result,
    client::{CredentialProvider, Reporter, SharedCredential, TargetIdentity},
    event::Envelope,
    probe::SystemClock,
    scheduler::{WorkerContext, WorkerSettings},
    stream::{EventStream, EventSupplier},
};
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use url::Url;
use uuid::Uuid;

pub const STARTUP_TOKEN: &str = "bearer startup";

/// In-memory firehose: every live subscription sees every published event.
#[derive(Default)]
pub struct FakeSupplier {
    subscriptions: Mutex<Vec<Option<UnboundedSender<Result<Envelope>>>>>,
    tokens: Mutex<Vec<String>>,
}

impl FakeSupplier {
    pub fn publish(&self, envelope: Envelope) {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        for slot in subscriptions.iter_mut() {
            let alive = slot
                .as_ref()
                .is_some_and(|tx| tx.send(Ok(envelope.clone())).is_ok());
            if !alive {
                *slot = None;
            }
        }
    }

    /// Breaks the `index`th subscription with a transport error.
    pub fn disconnect(&self, index: usize) {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if let Some(tx) = subscriptions.get_mut(index).and_then(Option::take) {
            let _ = tx.send(Err(Error::StreamDisconnected(
                "connection reset by peer".to_string(),
            )));
        }
    }

    pub fn is_live(&self, index: usize) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .get(index)
            .is_some_and(|slot| slot.as_ref().is_some_and(|tx| !tx.is_closed()))
    }

    pub fn subscribe_count(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSupplier for FakeSupplier {
    async fn subscribe(&self, token: &str, _app_guid: &str) -> Result<EventStream> {
        self.tokens.lock().unwrap().push(token.to_string());
        let (tx, mut rx) = unbounded_channel();
        self.subscriptions.lock().unwrap().push(Some(tx));
        Ok(stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

/// Hands out `bearer refreshed-<n>` and counts how often it was asked.
#[derive(Default)]
pub struct CountingProvider {
    refreshes: AtomicUsize,
}

impl CountingProvider {
    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn current_token(&self) -> Result<String> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("bearer refreshed-{n}"))
    }

    async fn resolve_target(&self, app_name: &str) -> Result<TargetIdentity> {
        Err(Error::StartupResolution(format!("{app_name} is not resolvable in tests")))
    }
}

/// What the router reports for each request the target serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Telemetry {
    Complete,
    LifecycleOnly,
    /// Access log line without a `response_time` field.
    UntimedLog,
}

/// Target app that emits router telemetry for every probe it serves.
pub async fn mock_target(server: &mut ServerGuard, supplier: Arc<FakeSupplier>) -> Mock {
    mock_target_emitting(server, supplier, Telemetry::Complete, 1).await
}

pub async fn mock_target_emitting(
    server: &mut ServerGuard,
    supplier: Arc<FakeSupplier>,
    telemetry: Telemetry,
    at_least: usize,
) -> Mock {
    let base = server.url();
    server
        .mock("GET", Matcher::Regex(r"^/[0-9a-f-]+\.html".to_string()))
        .with_status(200)
        .with_body_from_request(move |request| {
            let path = request.path().to_string();
            let start = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos() as i64;
            supplier.publish(Envelope::lifecycle(
                "gorouter",
                format!("{base}{path}"),
                start,
                start + 2_000_000,
            ));
            let timing = match telemetry {
                Telemetry::Complete => " response_time:0.004",
                Telemetry::UntimedLog => "",
                Telemetry::LifecycleOnly => return b"ok".to_vec(),
            };
            supplier.publish(Envelope::log(
                "gorouter",
                format!(
                    "probe-target.apps.example.com - \"GET {path} HTTP/1.1\" 200 0 2 \"-\" \"probe\"{timing} app_id:abc"
                ),
            ));
            b"ok".to_vec()
        })
        .expect_at_least(at_least)
        .create_async()
        .await
}

pub async fn mock_sink(server: &mut ServerGuard, at_least: usize) -> Mock {
    server
        .mock("POST", "/api/v1/series")
        .match_query(Matcher::UrlEncoded("api_key".into(), "test-key".into()))
        .match_body(Matcher::Regex("app_benchmarking.time_in_gorouter".to_string()))
        .with_status(202)
        .expect_at_least(at_least)
        .create_async()
        .await
}

pub fn context(
    target_url: String,
    sink_url: &str,
    supplier: Arc<FakeSupplier>,
    provider: Arc<CountingProvider>,
) -> WorkerContext {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let reporter = Reporter::new(
        http.clone(),
        Url::parse(&format!("{sink_url}/api/v1/series")).unwrap(),
        Some("test-key"),
        "integration",
    );

    WorkerContext {
        target: Arc::new(TargetIdentity {
            guid: Uuid::new_v4(),
            url: target_url,
        }),
        credential: Arc::new(SharedCredential::new(STARTUP_TOKEN.to_string())),
        provider,
        supplier,
        reporter: Some(Arc::new(reporter)),
        http,
        clock: Arc::new(SystemClock::new()),
        settings: WorkerSettings {
            interval: Duration::from_millis(100),
            deadline: Duration::from_secs(1),
            router_origin: "gorouter".to_string(),
            queue_capacity: 64,
        },
    }
}
