//! Run-wide cancellation signal.
//!
//! One token is created per analysis run from the run timeout and cloned into
//! every stage. Awaiting work through [`CancelToken::run`] makes each network
//! call return [`Cancelled`] as soon as the deadline passes or the token is
//! cancelled explicitly.

use crate::error::Cancelled;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CancelToken {
    deadline: Option<Instant>,
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    /// Token that only ends on explicit cancellation
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            deadline: None,
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Token that also ends when `timeout` elapses
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::new()
        }
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }

    /// Time left before the deadline, if there is one
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` to completion unless the token ends first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(Cancelled);
        }

        let mut receiver = self.receiver.clone();
        let cancelled = async move {
            loop {
                if *receiver.borrow_and_update() {
                    return;
                }
                if receiver.changed().await.is_err() {
                    // Sender gone: no explicit cancellation can arrive any more.
                    std::future::pending::<()>().await;
                }
            }
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            output = fut => Ok(output),
            _ = cancelled => Err(Cancelled),
            _ = deadline => Err(Cancelled),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
