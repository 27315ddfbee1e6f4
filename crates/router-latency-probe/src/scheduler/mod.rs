pub mod pool;
pub mod worker;

pub use pool::WorkerPool;
pub use worker::{Worker, WorkerPhase};

use crate::{
    client::{CredentialProvider, Reporter, SharedCredential, TargetIdentity},
    probe::Clock,
    settings::ProbeSettings,
    stream::EventSupplier,
};
use std::{fmt, sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Per-worker timing and filtering knobs.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub interval: Duration,
    pub deadline: Duration,
    pub router_origin: String,
    pub queue_capacity: usize,
}

impl From<&ProbeSettings> for WorkerSettings {
    fn from(probe: &ProbeSettings) -> Self {
        Self {
            interval: probe.interval(),
            deadline: probe.deadline(),
            router_origin: probe.router_origin.clone(),
            queue_capacity: probe.queue_capacity,
        }
    }
}

/// Everything a worker needs. Only the credential is mutable; the rest are
/// stateless handles cloned into each worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub target: Arc<TargetIdentity>,
    pub credential: Arc<SharedCredential>,
    pub provider: Arc<dyn CredentialProvider>,
    pub supplier: Arc<dyn EventSupplier>,
    pub reporter: Option<Arc<Reporter>>,
    pub http: reqwest::Client,
    pub clock: Arc<dyn Clock>,
    pub settings: WorkerSettings,
}
