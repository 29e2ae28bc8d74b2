use crate::metrics::Metrics;
use crate::error::{PermweaveError, Result};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handed to each listener session so it can report when it is up.
#[derive(Debug)]
pub struct Session {
    transport: &'static str,
    attempt: u64,
    announced: bool,
}

impl Session {
    /// Zero for the first session, incremented on every reconnect.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Marks the connection as established. Logs recovery once per session.
    pub fn connected(&mut self) {
        if self.announced {
            return;
        }
        self.announced = true;
        if self.attempt > 0 {
            info!(transport = self.transport, attempt = self.attempt, "Messenger connection re-established");
        } else {
            debug!(transport = self.transport, "Messenger connected");
        }
    }
}

/// Fails with [`PermweaveError::Timeout`] if `connect` has not finished
/// within `limit`.
pub async fn connect_within<T, Fut>(transport: &'static str, limit: Duration, connect: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, connect).await {
        Ok(result) => result,
        Err(_) => {
            warn!(transport, timeout_ms = limit.as_millis() as u64, "Messenger connect timed out");
            Err(PermweaveError::Timeout)
        }
    }
}

/// Runs listener sessions until `cancel` fires.
///
/// A session that ends, with or without an error, is treated as a dropped
/// connection: it is logged and a new session is started after `retry`.
/// Cancellation is checked before every retry and interrupts a running
/// session.
pub async fn supervise<F, Fut>(
    transport: &'static str,
    retry: Duration,
    cancel: CancellationToken,
    metrics: Option<Arc<Metrics>>,
    mut run_session: F,
) where
    F: FnMut(Session) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempt = 0u64;
    loop {
        let session = Session {
            transport,
            attempt,
            announced: false,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = run_session(session) => outcome,
        };

        if cancel.is_cancelled() {
            break;
        }

        match outcome {
            Ok(()) => warn!(transport, "Messenger listener ended, trying to re-open"),
            Err(e) => warn!(transport, error = %e, "Messenger connection dropped, trying to re-open"),
        }
        if let Some(metrics) = &metrics {
            metrics.transport_reconnects.inc();
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry) => {}
        }
        attempt += 1;
    }
    debug!(transport, "Messenger listener stopped");
}
