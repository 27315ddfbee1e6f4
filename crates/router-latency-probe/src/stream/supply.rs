use crate::{
    event::Envelope,
    scheduler::WorkerId,
    stream::{EventStream, RouterFilter},
};
use futures::StreamExt;
use tokio::sync::mpsc::{self, Receiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A worker's private view of the event stream.
///
/// A producer task drains the raw subscription through a [`RouterFilter`] into
/// a bounded queue the worker's correlator reads from. When the subscription
/// fails the producer cancels [`FilteredSupply::failed`] and drops its sender,
/// so a correlator blocked on the queue observes the close. Dropping the
/// supply stops the producer and releases the subscription; a supply is never
/// reused across reconnects.
pub struct FilteredSupply {
    events: Receiver<Envelope>,
    failed: CancellationToken,
    stop: CancellationToken,
}

impl FilteredSupply {
    pub fn attach(
        raw: EventStream,
        filter: RouterFilter,
        capacity: usize,
        worker: WorkerId,
    ) -> Self {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let failed = CancellationToken::new();
        let stop = CancellationToken::new();

        tokio::spawn({
            let failed = failed.clone();
            let stop = stop.clone();
            async move {
                let mut filtered = filter.apply(raw);
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = stop.cancelled() => {
                            debug!(%worker, "event producer stopped");
                            return;
                        }
                        item = filtered.next() => item,
                    };

                    match item {
                        Some(Ok(envelope)) => {
                            metrics::counter!("router_probe_events_forwarded").increment(1);
                            tokio::select! {
                                biased;
                                _ = stop.cancelled() => return,
                                sent = tx.send(envelope) => {
                                    if sent.is_err() {
                                        debug!(%worker, "event queue receiver dropped");
                                        return;
                                    }
                                }
                            }
                        }
                        Some(Err(err)) => {
                            warn!(%worker, error = %err, "event stream failed");
                            failed.cancel();
                            return;
                        }
                        None => {
                            warn!(%worker, "event stream ended");
                            failed.cancel();
                            return;
                        }
                    }
                }
            }
        });

        Self {
            events,
            failed,
            stop,
        }
    }

    pub fn events(&mut self) -> &mut Receiver<Envelope> {
        &mut self.events
    }

    /// Cancelled once the underlying subscription reports failure or ends.
    pub fn failed(&self) -> CancellationToken {
        self.failed.clone()
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_cancelled()
    }
}

impl Drop for FilteredSupply {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
