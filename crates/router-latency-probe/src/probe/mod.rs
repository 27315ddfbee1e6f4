pub mod breakdown;
pub mod clock;
pub mod correlator;

pub use breakdown::LatencyBreakdown;
pub use clock::{Clock, ManualClock, SystemClock};
pub use correlator::{Correlated, Correlator, Offer};

use crate::{Result, event::Envelope};
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tracing::debug;
use uuid::Uuid;

/// One synthetic measurement: a tagged request plus the telemetry it caused.
pub struct Probe<'a> {
    id: Uuid,
    target_url: &'a str,
    deadline: Duration,
    clock: &'a dyn Clock,
    http: &'a reqwest::Client,
}

impl<'a> Probe<'a> {
    pub fn new(
        target_url: &'a str,
        deadline: Duration,
        clock: &'a dyn Clock,
        http: &'a reqwest::Client,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_url,
            deadline,
            clock,
            http,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request_url(&self) -> String {
        format!("{}/{}.html", self.target_url.trim_end_matches('/'), self.id)
    }

    /// Issues the request, then waits up to the deadline for its telemetry.
    /// The request itself is never retried.
    pub async fn run(self, events: &mut Receiver<Envelope>) -> Result<LatencyBreakdown> {
        let probe_id = self.id.to_string();
        let timestamp = self.clock.now();
        let started = self.clock.monotonic();
        let response = self.http.get(self.request_url()).send().await?;
        let round_trip = self.clock.elapsed_since(started);
        let status = response.status().as_u16();
        debug!(%probe_id, status, round_trip_ms = round_trip.num_milliseconds(), "probe request completed");

        let correlated = Correlator::new(probe_id.as_str(), self.deadline)
            .correlate(events)
            .await?;

        LatencyBreakdown::derive(
            &probe_id,
            timestamp,
            round_trip,
            status,
            &correlated.lifecycle,
            &correlated.log,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use chrono::{DateTime, TimeDelta};
    use mockito::Server;
    use std::sync::Arc;
    use tokio::{sync::mpsc, time::Instant};

    const DEADLINE: Duration = Duration::from_millis(100);

    struct Fixture {
        server: mockito::ServerGuard,
        clock: Arc<ManualClock>,
        http: reqwest::Client,
        tx: mpsc::Sender<Envelope>,
        rx: Receiver<Envelope>,
    }

    async fn fixture() -> Fixture {
        let (tx, rx) = mpsc::channel(8);
        Fixture {
            server: Server::new_async().await,
            clock: Arc::new(ManualClock::new(t0())),
            http: reqwest::Client::new(),
            tx,
            rx,
        }
    }

    fn t0() -> DateTime<chrono::Utc> {
        DateTime::from_timestamp(123_456_789, 0).unwrap()
    }

    fn lifecycle(probe: &Probe<'_>, server_url: &str) -> Envelope {
        let start = 0;
        Envelope::lifecycle(
            "gorouter",
            format!("{server_url}/{}.html", probe.id()),
            start,
            start + 20_000_000,
        )
    }

    fn log(probe: &Probe<'_>) -> Envelope {
        Envelope::log("gorouter", format!("response_time:0.03 /{}.html", probe.id()))
    }

    #[tokio::test]
    async fn measures_a_full_breakdown() {
        let mut fx = fixture().await;
        let url = fx.server.url();
        let probe = Probe::new(&url, DEADLINE, fx.clock.as_ref(), &fx.http);

        let clock = fx.clock.clone();
        let mock = fx
            .server
            .mock("GET", format!("/{}.html", probe.id()).as_str())
            .with_status(200)
            .with_body_from_request(move |_| {
                clock.advance(TimeDelta::milliseconds(50));
                b"ok".to_vec()
            })
            .create_async()
            .await;

        fx.tx.send(lifecycle(&probe, &url)).await.unwrap();
        fx.tx.send(log(&probe)).await.unwrap();

        let breakdown = probe.run(&mut fx.rx).await.unwrap();

        mock.assert_async().await;
        assert_eq!(breakdown.status, 200);
        assert_eq!(breakdown.total_round_trip, TimeDelta::milliseconds(50));
        assert_eq!(breakdown.time_in_app, TimeDelta::milliseconds(20));
        assert_eq!(breakdown.time_in_router, TimeDelta::milliseconds(10));
        assert_eq!(breakdown.rest_of_time, TimeDelta::milliseconds(20));
        assert_eq!(breakdown.timestamp, t0());
    }

    #[tokio::test]
    async fn round_trip_ignores_wall_clock_steps() {
        let mut fx = fixture().await;
        let url = fx.server.url();
        let probe = Probe::new(&url, DEADLINE, fx.clock.as_ref(), &fx.http);

        let clock = fx.clock.clone();
        fx.server
            .mock("GET", format!("/{}.html", probe.id()).as_str())
            .with_status(200)
            .with_body_from_request(move |_| {
                clock.step_wall(TimeDelta::seconds(-30));
                clock.advance(TimeDelta::milliseconds(50));
                b"ok".to_vec()
            })
            .create_async()
            .await;

        fx.tx.send(lifecycle(&probe, &url)).await.unwrap();
        fx.tx.send(log(&probe)).await.unwrap();

        let breakdown = probe.run(&mut fx.rx).await.unwrap();
        assert_eq!(breakdown.total_round_trip, TimeDelta::milliseconds(50));
        assert_eq!(breakdown.timestamp, t0());
    }

    #[tokio::test]
    async fn reports_non_success_status() {
        let mut fx = fixture().await;
        let url = fx.server.url();
        let probe = Probe::new(&url, DEADLINE, fx.clock.as_ref(), &fx.http);
        fx.server
            .mock("GET", format!("/{}.html", probe.id()).as_str())
            .with_status(404)
            .create_async()
            .await;

        fx.tx.send(lifecycle(&probe, &url)).await.unwrap();
        fx.tx.send(log(&probe)).await.unwrap();

        let breakdown = probe.run(&mut fx.rx).await.unwrap();
        assert_eq!(breakdown.status, 404);
    }

    #[tokio::test]
    async fn times_out_when_no_telemetry_arrives() {
        let mut fx = fixture().await;
        let url = fx.server.url();
        let probe = Probe::new(&url, DEADLINE, fx.clock.as_ref(), &fx.http);
        fx.server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .create_async()
            .await;

        let err = probe.run(&mut fx.rx).await.unwrap_err();
        assert!(matches!(err, Error::CorrelationTimeout { .. }));
    }

    #[tokio::test]
    async fn times_out_when_only_lifecycle_arrives() {
        let mut fx = fixture().await;
        let url = fx.server.url();
        let probe = Probe::new(&url, DEADLINE, fx.clock.as_ref(), &fx.http);
        fx.server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body_from_request(|_| {
                std::thread::sleep(Duration::from_millis(150));
                Vec::new()
            })
            .create_async()
            .await;
        fx.tx.send(lifecycle(&probe, &url)).await.unwrap();

        let started = Instant::now();
        let err = probe.run(&mut fx.rx).await.unwrap_err();

        assert!(matches!(err, Error::CorrelationTimeout { .. }));
        // The request took longer than the deadline; the wait for telemetry
        // still got the whole deadline on top of it.
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn deadline_starts_after_the_request() {
        let mut fx = fixture().await;
        let url = fx.server.url();
        let deadline = Duration::from_millis(200);
        let probe = Probe::new(&url, deadline, fx.clock.as_ref(), &fx.http);
        fx.server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body_from_request(|_| {
                std::thread::sleep(Duration::from_millis(300));
                Vec::new()
            })
            .create_async()
            .await;

        // Telemetry lands after the deadline has passed since probe creation,
        // but well within the deadline counted from request completion.
        let tx = fx.tx.clone();
        let (lifecycle, log) = (lifecycle(&probe, &url), log(&probe));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            tx.send(lifecycle).await.unwrap();
            tx.send(log).await.unwrap();
        });

        assert!(probe.run(&mut fx.rx).await.is_ok());
    }

    #[tokio::test]
    async fn times_out_on_non_matching_lifecycle() {
        let mut fx = fixture().await;
        let url = fx.server.url();
        let probe = Probe::new(&url, DEADLINE, fx.clock.as_ref(), &fx.http);
        fx.server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .create_async()
            .await;

        fx.tx
            .send(Envelope::lifecycle("gorouter", url.clone(), 0, 20_000_000))
            .await
            .unwrap();
        fx.tx.send(log(&probe)).await.unwrap();

        let err = probe.run(&mut fx.rx).await.unwrap_err();
        assert!(matches!(err, Error::CorrelationTimeout { .. }));
    }

    #[tokio::test]
    async fn times_out_on_non_matching_log() {
        let mut fx = fixture().await;
        let url = fx.server.url();
        let probe = Probe::new(&url, DEADLINE, fx.clock.as_ref(), &fx.http);
        fx.server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .create_async()
            .await;

        fx.tx.send(lifecycle(&probe, &url)).await.unwrap();
        fx.tx
            .send(Envelope::log("gorouter", "response_time:0.03 /potato.html"))
            .await
            .unwrap();

        let err = probe.run(&mut fx.rx).await.unwrap_err();
        assert!(matches!(err, Error::CorrelationTimeout { .. }));
    }

    #[tokio::test]
    async fn malformed_log_is_not_a_zero_breakdown() {
        let mut fx = fixture().await;
        let url = fx.server.url();
        let probe = Probe::new(&url, DEADLINE, fx.clock.as_ref(), &fx.http);
        fx.server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .create_async()
            .await;

        fx.tx.send(lifecycle(&probe, &url)).await.unwrap();
        fx.tx
            .send(Envelope::log("gorouter", format!("GET /{}.html 200", probe.id())))
            .await
            .unwrap();

        let err = probe.run(&mut fx.rx).await.unwrap_err();
        assert!(matches!(err, Error::MalformedTelemetry { .. }));
    }

    #[tokio::test]
    async fn unreachable_target_is_a_request_error() {
        let mut fx = fixture().await;
        let probe = Probe::new("http://127.0.0.1:1", DEADLINE, fx.clock.as_ref(), &fx.http);

        let err = probe.run(&mut fx.rx).await.unwrap_err();
        assert!(matches!(err, Error::Request(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn probes_get_distinct_ids_and_paths() {
        let clock = SystemClock::new();
        let http = reqwest::Client::new();
        let a = Probe::new("http://app.example.com/", DEADLINE, &clock, &http);
        let b = Probe::new("http://app.example.com/", DEADLINE, &clock, &http);

        assert_ne!(a.id(), b.id());
        assert_eq!(
            a.request_url(),
            format!("http://app.example.com/{}.html", a.id())
        );
    }
}
