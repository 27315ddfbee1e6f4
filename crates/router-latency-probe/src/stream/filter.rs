use crate::{event::Envelope, stream::EventStream};
use futures::{StreamExt, future};

pub const DEFAULT_ROUTER_ORIGIN: &str = "gorouter";

/// Keeps only lifecycle and log events emitted by the routing tier.
#[derive(Debug, Clone)]
pub struct RouterFilter {
    origin_prefix: String,
}

impl Default for RouterFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTER_ORIGIN)
    }
}

impl RouterFilter {
    pub fn new(origin_prefix: impl Into<String>) -> Self {
        Self {
            origin_prefix: origin_prefix.into(),
        }
    }

    pub fn accepts(&self, envelope: &Envelope) -> bool {
        envelope.origin.starts_with(&self.origin_prefix) && envelope.event.kind().is_some()
    }

    /// Transport errors are passed through so the consumer sees the failure.
    pub fn apply(self, events: EventStream) -> EventStream {
        events
            .filter(move |item| {
                let keep = match item {
                    Ok(envelope) => self.accepts(envelope),
                    Err(_) => true,
                };
                future::ready(keep)
            })
            .boxed()
    }
}
