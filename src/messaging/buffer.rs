use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Coalesces bursts of requests: the action of the last request in a burst
/// runs once, `delay` after that request.
#[derive(Debug, Clone)]
pub struct BufferedRequest {
    delay: Duration,
    latest: Arc<AtomicU64>,
}

impl BufferedRequest {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedules `action`, superseding any request still waiting. Must be
    /// called from within a tokio runtime.
    pub fn request<F, Fut>(&self, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        let latest = self.latest.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if latest.load(Ordering::Acquire) == ticket {
                action().await;
            }
        });
    }
}
