use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::LoadError;

/// Shared bound on every sleep the loader does: a cancellation token plus an
/// optional deadline covering the readiness check and the poll loop together.
#[derive(Debug, Clone)]
pub struct WaitBudget {
    token: CancellationToken,
    started: Instant,
    deadline: Option<Instant>,
}

impl WaitBudget {
    pub fn new(token: CancellationToken, max_wait: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            token,
            started,
            deadline: max_wait.map(|wait| started + wait),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    /// Fails if the budget is already spent.
    pub fn check(&self, phase: &'static str) -> Result<(), LoadError> {
        if self.token.is_cancelled() {
            return Err(LoadError::Cancelled { phase });
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(LoadError::DeadlineExceeded {
                phase,
                waited: self.started.elapsed(),
            }),
            _ => Ok(()),
        }
    }

    /// Sleeps for `delay`, cut short by cancellation or the deadline.
    pub async fn pause(&self, delay: Duration, phase: &'static str) -> Result<(), LoadError> {
        let mut wake = Instant::now() + delay;
        if let Some(deadline) = self.deadline {
            wake = wake.min(deadline);
        }
        tokio::select! {
            _ = self.token.cancelled() => return Err(LoadError::Cancelled { phase }),
            _ = tokio::time::sleep_until(wake) => {}
        }
        self.check(phase)
    }

    /// Runs `call`, abandoning it once the budget is cancelled or runs out.
    pub async fn guard<T, F>(&self, phase: &'static str, call: F) -> Result<T, LoadError>
    where
        F: Future<Output = Result<T, LoadError>>,
    {
        self.check(phase)?;
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            result = call => result,
            _ = self.token.cancelled() => Err(LoadError::Cancelled { phase }),
            _ = expired => Err(LoadError::DeadlineExceeded {
                phase,
                waited: self.started.elapsed(),
            }),
        }
    }
}

impl Default for WaitBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}
