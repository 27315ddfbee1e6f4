use crate::settings::Settings;
use anyhow::{Result, bail};

/// Validate the configuration values
pub fn validate_config(settings: &Settings) -> Result<()> {
    // Probe settings
    if settings.probe.concurrency == 0 {
        bail!("probe concurrency must be greater than 0");
    }
    if settings.probe.interval_secs == 0 {
        bail!("probe interval must be greater than 0 seconds");
    }
    if settings.probe.deadline_ms == 0 {
        bail!("probe correlation deadline must be greater than 0 ms");
    }
    if settings.probe.request_timeout_secs == 0 {
        bail!("probe request timeout must be greater than 0 seconds");
    }
    if settings.probe.queue_capacity == 0 {
        bail!("probe queue capacity must be greater than 0");
    }
    if settings.probe.router_origin.is_empty() {
        bail!("router origin prefix cannot be empty");
    }

    // Target
    if settings.target.app_name.trim().is_empty() {
        bail!("target app name cannot be empty");
    }
    if settings.target.deployment.trim().is_empty() {
        bail!("target deployment label cannot be empty");
    }

    // Cloud controller
    if settings.cf.system_domain.trim().is_empty() {
        bail!("cf system domain cannot be empty");
    }
    if settings.cf.system_domain.contains("://") {
        bail!(
            "cf system domain must be a bare domain, got '{}'",
            settings.cf.system_domain
        );
    }
    if settings.cf.username.is_empty() || settings.cf.password.is_empty() {
        bail!("cf username and password are required");
    }
    if settings.cf.org.is_empty() || settings.cf.space.is_empty() {
        bail!("cf org and space are required");
    }

    if settings
        .stream
        .endpoint
        .as_ref()
        .is_some_and(|endpoint| !matches!(endpoint.scheme(), "ws" | "wss"))
    {
        bail!("stream endpoint must start with ws:// or wss://");
    }

    if settings
        .sink
        .as_ref()
        .is_some_and(|sink| !matches!(sink.url.scheme(), "http" | "https"))
    {
        bail!("sink URL must start with http:// or https://");
    }

    Ok(())
}
