//! Request cancellation and deadlines
//!
//! One [`Cancellation`] is threaded through a request. It combines the
//! caller's [`CancellationToken`] with an optional deadline; a timeout is
//! just a cancellation source that fires on its own.

use super::error::EngineError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a request stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// The caller cancelled the token
    Cancelled,
    /// The deadline elapsed
    DeadlineExceeded,
}

impl Interruption {
    pub fn to_error(self) -> EngineError {
        match self {
            Interruption::Cancelled => EngineError::Cancelled,
            Interruption::DeadlineExceeded => EngineError::DeadlineExceeded,
        }
    }
}

/// Cancellation signal of one request
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Add a deadline `timeout` from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Trigger cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Non-blocking check
    pub fn check(&self) -> Option<Interruption> {
        if self.token.is_cancelled() {
            return Some(Interruption::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Interruption::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the request is cancelled or its deadline elapses
    pub async fn interrupted(&self) -> Interruption {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Interruption::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Interruption::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Interruption::Cancelled
            }
        }
    }
}
