//! Handles for slow provider operations.
//!
//! Providers hand back a [`Poller`] wrapping whatever they need to ask
//! "done yet?". Callers only ever see one awaitable `poll_until_done`.

use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Progress of a pending operation. Provider-side failure is an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Done,
}

/// A provider operation that has been accepted but may not have finished.
#[async_trait]
pub trait PendingOperation: Send + 'static {
    /// Ask the provider once for the current status.
    async fn poll(&mut self) -> Result<OperationStatus>;

    /// Delay the provider asked for before the next poll, if any.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }
}

/// Bounded poll-until-done over a [`PendingOperation`].
pub struct Poller {
    op: Box<dyn PendingOperation>,
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    pub fn new(op: impl PendingOperation) -> Self {
        Self {
            op: Box::new(op),
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Fallback delay between polls when the provider gives no hint.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Upper bound on the whole wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Poll until the provider reports completion, failure, or the timeout passes.
    pub async fn poll_until_done(self) -> Result<()> {
        let Self {
            mut op,
            interval,
            timeout,
        } = self;

        tokio::time::timeout(timeout, drive(op.as_mut(), interval))
            .await
            .map_err(|_| Error::OperationTimeout(timeout))?
    }
}

async fn drive(op: &mut dyn PendingOperation, interval: Duration) -> Result<()> {
    loop {
        match op.poll().await? {
            OperationStatus::Done => return Ok(()),
            OperationStatus::InProgress => {
                let delay = op.poll_interval().unwrap_or(interval);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
