use crate::{
    Error, Result,
    event::{LifecycleEvent, LogEvent},
};
use chrono::{DateTime, TimeDelta, Utc};
use regex::bytes::Regex;
use std::sync::LazyLock;

static RESPONSE_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"response_time:([^ ]+)").expect("valid response_time pattern"));

/// Where the time of one probe went.
///
/// `time_in_router` is left signed: it goes negative when the router reports
/// less time than the application's own start/stop window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyBreakdown {
    pub total_round_trip: TimeDelta,
    pub time_in_app: TimeDelta,
    pub time_in_router: TimeDelta,
    pub rest_of_time: TimeDelta,
    pub timestamp: DateTime<Utc>,
    pub status: u16,
}

impl LatencyBreakdown {
    pub fn derive(
        probe_id: &str,
        timestamp: DateTime<Utc>,
        total_round_trip: TimeDelta,
        status: u16,
        lifecycle: &LifecycleEvent,
        log: &LogEvent,
    ) -> Result<Self> {
        let time_in_app = TimeDelta::nanoseconds(
            lifecycle
                .stop_timestamp
                .saturating_sub(lifecycle.start_timestamp),
        );
        let response_time = parse_response_time(&log.message).map_err(|reason| {
            Error::MalformedTelemetry {
                probe_id: probe_id.to_string(),
                reason,
            }
        })?;

        Ok(Self {
            total_round_trip,
            time_in_app,
            time_in_router: response_time - time_in_app,
            rest_of_time: total_round_trip - response_time,
            timestamp,
            status,
        })
    }
}

/// Extracts `response_time:<decimal seconds>` from a router access log line.
pub fn parse_response_time(message: &[u8]) -> std::result::Result<TimeDelta, String> {
    let raw = RESPONSE_TIME
        .captures(message)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| "no response_time token in log message".to_string())?;
    let text = std::str::from_utf8(raw.as_bytes())
        .map_err(|_| "response_time is not valid utf-8".to_string())?;
    // Access logs sometimes quote the trailing field.
    let text = text.trim_end_matches(['"', ',']);

    let seconds: f64 = text
        .parse()
        .map_err(|_| format!("response_time `{text}` is not a number"))?;
    if !seconds.is_finite() {
        return Err(format!("response_time `{text}` is not finite"));
    }

    let nanos = (seconds * 1e9).round();
    if nanos.abs() >= i64::MAX as f64 {
        return Err(format!("response_time `{text}` is out of range"));
    }
    Ok(TimeDelta::nanoseconds(nanos as i64))
}

pub fn as_nanos(delta: TimeDelta) -> i64 {
    delta.num_nanoseconds().unwrap_or(if delta < TimeDelta::zero() {
        i64::MIN
    } else {
        i64::MAX
    })
}
