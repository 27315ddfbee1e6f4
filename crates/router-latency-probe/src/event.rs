use std::borrow::Cow;

/// One record from the event firehose, tagged with the component that emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: String,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Request lifecycle as observed at the ingress tier.
    Lifecycle(LifecycleEvent),
    /// Free-text log line carrying the `response_time:` figure.
    Log(LogEvent),
    /// Any other event kind, kept only by name.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub uri: String,
    /// Nanoseconds since the unix epoch.
    pub start_timestamp: i64,
    /// Nanoseconds since the unix epoch.
    pub stop_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Lifecycle,
    Log,
}

impl Envelope {
    pub fn new(origin: impl Into<String>, event: Event) -> Self {
        Self {
            origin: origin.into(),
            event,
        }
    }

    pub fn lifecycle(
        origin: impl Into<String>,
        uri: impl Into<String>,
        start_timestamp: i64,
        stop_timestamp: i64,
    ) -> Self {
        Self::new(
            origin,
            Event::Lifecycle(LifecycleEvent {
                uri: uri.into(),
                start_timestamp,
                stop_timestamp,
            }),
        )
    }

    pub fn log(origin: impl Into<String>, message: impl Into<Vec<u8>>) -> Self {
        Self::new(
            origin,
            Event::Log(LogEvent {
                message: message.into(),
            }),
        )
    }
}

impl Event {
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Event::Lifecycle(_) => Some(EventKind::Lifecycle),
            Event::Log(_) => Some(EventKind::Log),
            Event::Other(_) => None,
        }
    }

    /// Text a probe id is searched for: the request uri for lifecycle
    /// events, the message body for log events.
    pub fn identifier_hint(&self) -> Option<Cow<'_, str>> {
        match self {
            Event::Lifecycle(lifecycle) => Some(Cow::Borrowed(lifecycle.uri.as_str())),
            Event::Log(log) => Some(String::from_utf8_lossy(&log.message)),
            Event::Other(_) => None,
        }
    }
}
