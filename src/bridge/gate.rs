//! Engine readiness gate
//!
//! The engine finishes initializing on its own thread. Until then every
//! dependent operation waits here. The gate settles exactly once, either
//! open (carrying the ready engine) or failed, and from then on waits
//! return immediately.

use crate::{BridgeError, Result};
use log::{debug, error};
use once_cell::sync::OnceCell;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Readiness of the underlying engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineReadiness {
    Uninitialized,
    Ready,
    Failed,
}

/// One-shot latch broadcasting the engine initialization outcome
pub struct ReadinessGate<T> {
    outcome: OnceCell<std::result::Result<T, String>>,
    lock: Mutex<()>,
    settled: Condvar,
}

impl<T> ReadinessGate<T> {
    pub fn new() -> Self {
        Self {
            outcome: OnceCell::new(),
            lock: Mutex::new(()),
            settled: Condvar::new(),
        }
    }

    /// Mark the engine ready
    pub fn open(&self, value: T) -> Result<()> {
        debug!("Speech engine ready");
        self.settle(Ok(value))
    }

    /// Mark initialization as failed
    pub fn fail(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        error!("Speech engine initialization failed: {}", reason);
        self.settle(Err(reason))
    }

    fn settle(&self, outcome: std::result::Result<T, String>) -> Result<()> {
        // Settling under the lock keeps a waiter from checking, missing the
        // value, and then sleeping through the notification.
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.outcome
            .set(outcome)
            .map_err(|_| BridgeError::AlreadySettled)?;
        self.settled.notify_all();
        Ok(())
    }

    pub fn state(&self) -> EngineReadiness {
        match self.outcome.get() {
            None => EngineReadiness::Uninitialized,
            Some(Ok(_)) => EngineReadiness::Ready,
            Some(Err(_)) => EngineReadiness::Failed,
        }
    }

    /// Block until the gate settles, however long that takes
    pub fn wait(&self) -> Result<&T> {
        if let Some(outcome) = self.outcome.get() {
            return Self::resolve(outcome);
        }

        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.outcome.get().is_none() {
            guard = self
                .settled
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(guard);

        self.settled_outcome(None)
    }

    /// Block until the gate settles or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Result<&T> {
        if let Some(outcome) = self.outcome.get() {
            return Self::resolve(outcome);
        }

        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .settled
            .wait_timeout_while(guard, timeout, |_| self.outcome.get().is_none())
            .unwrap_or_else(PoisonError::into_inner);
        drop(guard);

        self.settled_outcome(Some(timeout))
    }

    /// Wait with an optional bound; `None` waits indefinitely
    pub fn wait_for(&self, timeout: Option<Duration>) -> Result<&T> {
        match timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait(),
        }
    }

    fn settled_outcome(&self, timeout: Option<Duration>) -> Result<&T> {
        match (self.outcome.get(), timeout) {
            (Some(outcome), _) => Self::resolve(outcome),
            (None, Some(timeout)) => Err(BridgeError::InitTimeout(timeout)),
            (None, None) => Err(BridgeError::Other("readiness gate woke unsettled".into())),
        }
    }

    fn resolve(outcome: &std::result::Result<T, String>) -> Result<&T> {
        outcome
            .as_ref()
            .map_err(|reason| BridgeError::EngineInit(reason.clone()))
    }
}

impl<T> Default for ReadinessGate<T> {
    fn default() -> Self {
        Self::new()
    }
}
