use crate::{
    Error, Result,
    client::Credential,
    probe::{LatencyBreakdown, Probe},
    scheduler::{WorkerContext, WorkerId},
    stream::{FilteredSupply, RouterFilter},
};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// First subscription, made with the startup token.
    Connecting,
    Active,
    /// Supply lost; the next attempt refreshes the credential first.
    Reconnecting,
    Stopping,
}

/// Runs one probe per tick against its own filtered view of the stream.
pub struct Worker {
    id: WorkerId,
    context: WorkerContext,
    phase: WorkerPhase,
    supply: Option<FilteredSupply>,
    credential: Option<Credential>,
}

impl Worker {
    pub fn new(id: WorkerId, context: WorkerContext) -> Self {
        Self {
            id,
            context,
            phase: WorkerPhase::Connecting,
            supply: None,
            credential: None,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let span = info_span!("worker", worker = %self.id);
        async move {
            self.run_loop(&shutdown).await;
            self.stop();
        }
        .instrument(span)
        .await
    }

    async fn run_loop(&mut self, shutdown: &CancellationToken) {
        let mut ticker = interval(self.context.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval = ?self.context.settings.interval,
            deadline = ?self.context.settings.deadline,
            "worker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.supply.as_ref().is_some_and(FilteredSupply::is_failed) {
                self.lose_supply("event stream failed");
            }

            if self.supply.is_none() {
                let connected = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    connected = self.connect() => connected,
                };
                if let Err(err) = connected {
                    warn!(error = %err, "failed to connect event stream; retrying next tick");
                    metrics::counter!("router_probe_connect_failed", "kind" => err.kind()).increment(1);
                    self.phase = WorkerPhase::Reconnecting;
                    continue;
                }
            }

            let Some(supply) = self.supply.as_mut() else {
                continue;
            };
            let probe = Probe::new(
                &self.context.target.url,
                self.context.settings.deadline,
                self.context.clock.as_ref(),
                &self.context.http,
            );
            let probe_id = probe.id();

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(%probe_id, "abandoning in-flight probe");
                    break;
                }
                outcome = probe.run(supply.events()) => outcome,
            };

            match outcome {
                Ok(breakdown) => {
                    self.record(&probe_id.to_string(), &breakdown);
                    if let Some(reporter) = self.context.reporter.clone() {
                        tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break,
                            _ = reporter.report(&breakdown) => {}
                        }
                    }
                }
                Err(err) => self.settle(probe_id, err),
            }
        }
    }

    /// A broken stream is not a measurement failure: it only costs the supply.
    fn settle(&mut self, probe_id: Uuid, err: Error) {
        if err.is_disconnect() {
            self.lose_supply(&err.to_string());
            return;
        }
        warn!(%probe_id, error = %err, "probe failed");
        metrics::counter!("router_probe_probe_failed", "kind" => err.kind()).increment(1);
    }

    /// Subscribes with the startup token on the first attempt and with a
    /// refreshed token afterwards.
    async fn connect(&mut self) -> Result<()> {
        let credential = match (&self.phase, &self.credential) {
            (WorkerPhase::Connecting, _) | (_, None) => self.context.credential.snapshot().await,
            (_, Some(seen)) => {
                self.context
                    .credential
                    .refresh(seen, self.context.provider.as_ref())
                    .await?
            }
        };
        let generation = credential.generation;
        let guid = self.context.target.guid.to_string();
        let subscribed = self
            .context
            .supplier
            .subscribe(&credential.token, &guid)
            .await;
        self.credential = Some(credential);
        let raw = subscribed?;

        self.supply = Some(FilteredSupply::attach(
            raw,
            RouterFilter::new(self.context.settings.router_origin.as_str()),
            self.context.settings.queue_capacity,
            self.id,
        ));
        self.phase = WorkerPhase::Active;

        info!(generation, "subscribed to event stream");
        metrics::counter!("router_probe_stream_subscribed").increment(1);
        Ok(())
    }

    fn lose_supply(&mut self, reason: &str) {
        self.supply = None;
        self.phase = WorkerPhase::Reconnecting;
        warn!(reason, "event stream lost; reconnecting on next tick");
        metrics::counter!("router_probe_stream_disconnected").increment(1);
    }

    fn record(&self, probe_id: &str, breakdown: &LatencyBreakdown) {
        info!(
            probe_id,
            status = breakdown.status,
            total_round_trip_ms = breakdown.total_round_trip.num_milliseconds(),
            time_in_app_ms = breakdown.time_in_app.num_milliseconds(),
            time_in_router_ms = breakdown.time_in_router.num_milliseconds(),
            rest_of_time_ms = breakdown.rest_of_time.num_milliseconds(),
            "probe completed"
        );
        metrics::counter!("router_probe_probes_completed").increment(1);
        metrics::histogram!("router_probe_round_trip_seconds")
            .record(breakdown.total_round_trip.as_seconds_f64());
    }

    fn stop(&mut self) {
        self.phase = WorkerPhase::Stopping;
        self.supply = None;
        info!("worker stopped");
    }
}
