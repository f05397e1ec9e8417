use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use cacheseal_core::{DeferredBlock, ProviderError};
use tokio::runtime::Handle;

/// Background execution context a provider submits its crypto work to.
///
/// Each call becomes one blocking-pool job on the wrapped runtime. Jobs are not
/// preemptible: dropping the returned future discards the result only.
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: Handle,
    submitted: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            submitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bind to the runtime the caller is running on.
    pub fn current() -> Result<Self, ProviderError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|err| ProviderError::Construction {
                reason: format!("no async runtime available: {err}"),
            })
    }

    /// Number of jobs ever submitted through this scheduler.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub(crate) fn submit<F>(&self, job: F) -> DeferredBlock
    where
        F: FnOnce() -> Result<Vec<u8>, ProviderError> + Send + 'static,
    {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let join = self.handle.spawn_blocking(job);
        Box::pin(async move {
            match join.await {
                Ok(result) => result,
                Err(err) => Err(ProviderError::Scheduling {
                    reason: err.to_string(),
                }),
            }
        })
    }
}
