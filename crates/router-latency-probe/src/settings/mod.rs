pub mod validation;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;
use validation::validate_config;

pub const ENV_PREFIX: &str = "ROUTER_PROBE";

#[derive(Debug, Parser)]
#[command(name = "router-latency-probe", version, about)]
pub struct AppArgs {
    /// TOML config file; environment variables take priority over it
    #[arg(short, long, value_name = "FILE", env = "ROUTER_PROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides `probe.concurrency`
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Default tracing filter; `RUST_LOG` wins when set
    #[serde(default = "default_log")]
    pub log: String,
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,
    pub target: TargetSettings,
    pub cf: CfSettings,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub stream: StreamSettings,
    /// No sink means breakdowns are only logged
    #[serde(default)]
    pub sink: Option<SinkSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSettings {
    /// Name of the application the probe requests are sent to
    pub app_name: String,
    /// Value of the `deployment:` tag on reported series
    pub deployment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfSettings {
    pub system_domain: String,
    pub username: String,
    pub password: String,
    pub org: String,
    pub space: String,
    #[serde(default)]
    pub skip_ssl_validation: bool,
    #[serde(default = "default_cf_binary")]
    pub binary: PathBuf,
}

impl CfSettings {
    pub fn api_url(&self) -> String {
        format!("https://api.{}", self.system_domain)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub concurrency: usize,
    pub interval_secs: u64,
    pub deadline_ms: u64,
    pub request_timeout_secs: u64,
    pub queue_capacity: usize,
    /// Origin prefix identifying routing-tier events
    pub router_origin: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            interval_secs: 5,
            deadline_ms: 2000,
            request_timeout_secs: 10,
            queue_capacity: crate::stream::supply::DEFAULT_QUEUE_CAPACITY,
            router_origin: crate::stream::filter::DEFAULT_ROUTER_ORIGIN.to_string(),
        }
    }
}

impl ProbeSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Defaults to `wss://doppler.<system_domain>:4443`
    pub endpoint: Option<Url>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSettings {
    pub url: Url,
    pub api_key: Option<String>,
}

impl Settings {
    /// Load from an optional config file layered under the environment.
    pub fn new(config: Option<PathBuf>) -> Result<Self> {
        match config {
            Some(path) => Self::from_path(path),
            None => Self::from_env(),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder = ConfigBuilder::builder().add_source(File::from(path.as_ref()));
        Self::build(builder)
    }

    pub fn from_env() -> Result<Self> {
        Self::build(ConfigBuilder::builder())
    }

    fn build(builder: config::builder::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        validate_config(&settings)?;

        Ok(settings)
    }

    /// Applies command-line overrides and re-validates.
    pub fn with_args(mut self, args: &AppArgs) -> Result<Self> {
        if let Some(concurrency) = args.concurrency {
            self.probe.concurrency = concurrency;
        }
        validate_config(&self)?;
        Ok(self)
    }

    pub fn stream_endpoint(&self) -> Result<Url> {
        match &self.stream.endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => Url::parse(&format!("wss://doppler.{}:4443", self.cf.system_domain))
                .context("Failed to build default stream endpoint"),
        }
    }
}

fn default_log() -> String {
    "info".to_string()
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

fn default_cf_binary() -> PathBuf {
    PathBuf::from("cf")
}
