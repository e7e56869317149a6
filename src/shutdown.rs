//! Operator-initiated cancellation.
//!
//! A [`ShutdownTrigger`] flips a watch flag; every [`Shutdown`] clone sees it.
//! Sleeps and waits raced against the flag end early with
//! [`WallError::Cancelled`]. Store writes are synchronous and never raced, so
//! a transition in progress always finishes.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Result, WallError};

#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    /// A handle that is never triggered.
    pub fn never() -> Self {
        let (_trigger, shutdown) = channel();
        shutdown
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fail fast if shutdown was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() { Err(WallError::Cancelled) } else { Ok(()) }
    }

    /// Resolves once shutdown is requested; never resolves otherwise.
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.sleep_until(Instant::now() + duration).await
    }

    pub async fn sleep_until(&self, deadline: Instant) -> Result<()> {
        self.guard(async {
            tokio::time::sleep_until(deadline).await;
            Ok(())
        })
        .await
    }

    /// Run `fut` unless shutdown is requested first.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            result = fut => result,
            _ = self.triggered() => Err(WallError::Cancelled),
        }
    }
}
