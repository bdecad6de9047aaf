//! Process-wide concurrency gate for model invocations.
//!
//! A single gate is constructed at startup and injected into the engine;
//! every examiner and arbiter invocation acquires it immediately before the
//! provider call and releases it (by dropping the permit) immediately after.
//! An optional pacing delay after acquisition smooths burst load against the
//! upstream provider's rate limits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many model invocations run simultaneously.
#[derive(Clone)]
pub struct InvocationGate {
    semaphore: Arc<Semaphore>,
    pace: Option<Duration>,
}

impl InvocationGate {
    /// Gate allowing at most `max_in_flight` concurrent invocations.
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            pace: None,
        }
    }

    /// Sleep `delay` after each acquisition before the invocation proceeds.
    pub fn with_pacing(mut self, delay: Duration) -> Self {
        self.pace = Some(delay);
        self
    }

    /// Acquire a slot, waiting until one frees up. The slot is released when
    /// the returned permit is dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow::anyhow!("invocation gate closed"))?;
        if let Some(delay) = self.pace {
            tokio::time::sleep(delay).await;
        }
        Ok(permit)
    }

    /// Currently free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
