//! Single-slot transaction gate.
//!
//! The link is half duplex: a request must be followed by its own response
//! before anyone else writes. The gate owns the link and hands it out one
//! transaction at a time; the permit releases on drop.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::warn;

use super::error::{PumpError, Result};
use super::types::GATE_TIMEOUT;

/// Exclusive access to a shared resource with a bounded wait.
#[derive(Debug)]
pub struct TransactionGate<T> {
    slot: Mutex<T>,
    wait: Duration,
}

/// Held for one write + read cycle. Dropping it releases the gate.
#[derive(Debug)]
pub struct Permit<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> TransactionGate<T> {
    /// Gate with the standard 500 ms wait.
    pub fn new(inner: T) -> Self {
        Self::with_wait(inner, GATE_TIMEOUT)
    }

    pub fn with_wait(inner: T, wait: Duration) -> Self {
        Self {
            slot: Mutex::new(inner),
            wait,
        }
    }

    /// Wait up to the gate timeout for the permit.
    pub async fn acquire(&self) -> Result<Permit<'_, T>> {
        match timeout(self.wait, self.slot.lock()).await {
            Ok(guard) => Ok(Permit { guard }),
            Err(_) => {
                warn!("Reserving the pump link timed out after {:?}", self.wait);
                Err(PumpError::GateTimeout(self.wait))
            }
        }
    }

    /// Take the permit only if nobody holds it right now.
    pub fn try_acquire(&self) -> Option<Permit<'_, T>> {
        self.slot.try_lock().ok().map(|guard| Permit { guard })
    }
}

impl<T> Deref for Permit<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for Permit<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
