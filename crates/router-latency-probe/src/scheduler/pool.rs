use crate::{
    Error, Result,
    scheduler::{Worker, WorkerContext, WorkerId},
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Fixed set of independent probe workers.
pub struct WorkerPool {
    context: WorkerContext,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(context: WorkerContext, concurrency: usize) -> Self {
        Self {
            context,
            concurrency,
        }
    }

    /// Runs every worker until `shutdown` fires.
    ///
    /// A worker that panics takes the pool down: the remaining workers are
    /// cancelled and an error is returned once all of them have exited.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let stop = shutdown.child_token();
        let mut workers = JoinSet::new();
        for index in 0..self.concurrency {
            let worker = Worker::new(WorkerId(index), self.context.clone());
            workers.spawn(worker.run(stop.clone()));
        }
        info!(workers = self.concurrency, "worker pool started");
        metrics::gauge!("router_probe_workers").set(self.concurrency as f64);

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "worker exited abnormally; stopping the pool");
                metrics::counter!("router_probe_worker_failed").increment(1);
                stop.cancel();
                failure.get_or_insert_with(|| err.to_string());
            }
        }
        metrics::gauge!("router_probe_workers").set(0.0);

        match failure {
            Some(reason) => Err(Error::WorkerFailed(reason)),
            None => {
                info!("worker pool stopped");
                Ok(())
            }
        }
    }
}
