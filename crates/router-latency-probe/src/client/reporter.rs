use crate::{
    Result,
    probe::{LatencyBreakdown, breakdown::as_nanos},
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

pub const TOTAL_ROUNDTRIP: &str = "app_benchmarking.total_roundtrip";
pub const TIME_IN_ROUTER: &str = "app_benchmarking.time_in_gorouter";
pub const TIME_IN_APP: &str = "app_benchmarking.time_in_app";
pub const REST_OF_TIME: &str = "app_benchmarking.rest_of_time";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPayload {
    pub series: Vec<Series>,
}

/// One metric with a single `[unix_seconds, nanoseconds]` point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub metric: String,
    pub points: Vec<[i64; 2]>,
    pub tags: Vec<String>,
}

/// Ships breakdowns to the metrics sink, one POST per probe.
#[derive(Debug, Clone)]
pub struct Reporter {
    http: reqwest::Client,
    endpoint: Url,
    deployment: String,
}

impl Reporter {
    pub fn new(
        http: reqwest::Client,
        mut endpoint: Url,
        api_key: Option<&str>,
        deployment: impl Into<String>,
    ) -> Self {
        if let Some(key) = api_key {
            endpoint.query_pairs_mut().append_pair("api_key", key);
        }
        Self {
            http,
            endpoint,
            deployment: deployment.into(),
        }
    }

    pub fn payload(breakdown: &LatencyBreakdown, deployment: &str) -> SeriesPayload {
        let timestamp = breakdown.timestamp.timestamp();
        let tags = vec![
            format!("status:{}", breakdown.status),
            format!("deployment:{deployment}"),
        ];

        let series = [
            (TOTAL_ROUNDTRIP, breakdown.total_round_trip),
            (TIME_IN_ROUTER, breakdown.time_in_router),
            (TIME_IN_APP, breakdown.time_in_app),
            (REST_OF_TIME, breakdown.rest_of_time),
        ]
        .into_iter()
        .map(|(metric, value)| Series {
            metric: metric.to_string(),
            points: vec![[timestamp, as_nanos(value)]],
            tags: tags.clone(),
        })
        .collect();

        SeriesPayload { series }
    }

    /// Best effort: failures are logged and counted, never retried.
    pub async fn report(&self, breakdown: &LatencyBreakdown) {
        let payload = Self::payload(breakdown, &self.deployment);
        match self.send(&payload).await {
            Ok(status) if status.is_success() => {
                debug!(%status, "breakdown reported");
                metrics::counter!("router_probe_reports", "result" => "ok").increment(1);
            }
            Ok(status) => {
                warn!(%status, sink = self.endpoint.host_str(), "metrics sink rejected breakdown");
                metrics::counter!("router_probe_reports", "result" => "rejected").increment(1);
            }
            Err(err) => {
                warn!(error = %err, sink = self.endpoint.host_str(), "failed to report breakdown");
                metrics::counter!("router_probe_reports", "result" => "error").increment(1);
            }
        }
    }

    async fn send(&self, payload: &SeriesPayload) -> Result<StatusCode> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await?;
        Ok(response.status())
    }
}
