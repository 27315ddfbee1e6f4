use crate::{
    Error, Result,
    event::{Envelope, Event, LifecycleEvent, LogEvent},
};
use std::time::Duration;
use tokio::{sync::mpsc::Receiver, time::sleep};
use tracing::{debug, trace};

/// Outcome of offering one event to a [`Correlator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The event does not mention this probe.
    Unrelated,
    /// The event matches but its slot is already filled.
    Duplicate,
    /// The event filled an empty slot.
    Filled,
}

/// The pair of events collected for one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlated {
    pub lifecycle: LifecycleEvent,
    pub log: LogEvent,
}

/// Collects the lifecycle and log event belonging to a single probe.
#[derive(Debug)]
pub struct Correlator {
    probe_id: String,
    deadline: Duration,
    lifecycle: Option<LifecycleEvent>,
    log: Option<LogEvent>,
}

impl Correlator {
    pub fn new(probe_id: impl Into<String>, deadline: Duration) -> Self {
        Self {
            probe_id: probe_id.into(),
            deadline,
            lifecycle: None,
            log: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.lifecycle.is_some() && self.log.is_some()
    }

    /// Slots are filled once; later matches of the same kind are ignored.
    pub fn offer(&mut self, envelope: Envelope) -> Offer {
        let matches = envelope
            .event
            .identifier_hint()
            .is_some_and(|hint| hint.contains(self.probe_id.as_str()));
        if !matches {
            return Offer::Unrelated;
        }

        match envelope.event {
            Event::Lifecycle(lifecycle) if self.lifecycle.is_none() => {
                self.lifecycle = Some(lifecycle);
                Offer::Filled
            }
            Event::Log(log) if self.log.is_none() => {
                self.log = Some(log);
                Offer::Filled
            }
            Event::Lifecycle(_) | Event::Log(_) => Offer::Duplicate,
            Event::Other(_) => Offer::Unrelated,
        }
    }

    /// Reads the queue until both events arrived or the deadline passed.
    ///
    /// The deadline starts when this is called. A closed queue means the
    /// stream behind it failed.
    pub async fn correlate(mut self, events: &mut Receiver<Envelope>) -> Result<Correlated> {
        let timer = sleep(self.deadline);
        tokio::pin!(timer);

        loop {
            if let Some(correlated) = self.take_complete() {
                return Ok(correlated);
            }

            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(envelope) => match self.offer(envelope) {
                        Offer::Filled => trace!(probe_id = %self.probe_id, "collected event"),
                        Offer::Duplicate => debug!(probe_id = %self.probe_id, "ignoring duplicate event"),
                        Offer::Unrelated => {}
                    },
                    None => {
                        return Err(Error::StreamDisconnected(format!(
                            "event queue closed while correlating probe {}",
                            self.probe_id
                        )));
                    }
                },
                _ = &mut timer => {
                    return Err(Error::CorrelationTimeout {
                        probe_id: self.probe_id,
                        deadline: self.deadline,
                    });
                }
            }
        }
    }

    fn take_complete(&mut self) -> Option<Correlated> {
        if !self.is_complete() {
            return None;
        }
        Some(Correlated {
            lifecycle: self.lifecycle.take()?,
            log: self.log.take()?,
        })
    }
}
