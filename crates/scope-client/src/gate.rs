//! Readiness gate
//!
//! Every public operation passes through the gate before touching the
//! network. While the connection driver holds the gate, callers queue on a
//! fair (FIFO) async mutex; once the driver opens or fails it, they re-enter
//! in submission order and either proceed or fail with the stored error.

use std::sync::Arc;

use scope_core::{Result, ScopeError};
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum GateState {
    /// No session yet
    Pending,
    /// Session ready, operations proceed
    Open,
    /// Token manager died; every operation fails with this error
    Dead(ScopeError),
    Closed,
}

#[derive(Clone)]
pub struct ReadinessGate {
    state: Arc<Mutex<GateState>>,
    notify: Arc<Notify>,
}

impl ReadinessGate {
    /// Create a gate that starts pending and held by the returned guard
    pub fn held() -> (Self, GateHold) {
        let gate = Self {
            state: Arc::new(Mutex::new(GateState::Pending)),
            notify: Arc::new(Notify::new()),
        };
        let guard = match Arc::clone(&gate.state).try_lock_owned() {
            Ok(guard) => guard,
            // A mutex nobody else has seen cannot be locked
            Err(_) => unreachable!("fresh gate mutex is unlocked"),
        };
        let hold = GateHold {
            guard: Some(guard),
            notify: Arc::clone(&gate.notify),
        };
        (gate, hold)
    }

    /// Take exclusive control of the gate, waiting behind queued callers
    pub async fn hold(&self) -> GateHold {
        let guard = Arc::clone(&self.state).lock_owned().await;
        GateHold {
            guard: Some(guard),
            notify: Arc::clone(&self.notify),
        }
    }

    /// Wait until operations may proceed.
    ///
    /// Returns the stored fatal error once the gate is dead and `Closed` once
    /// the client is closed; never waits on a gate that cannot open.
    pub async fn enter(&self) -> Result<()> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            {
                let state = self.state.lock().await;
                match &*state {
                    GateState::Open => return Ok(()),
                    GateState::Dead(err) => return Err(err.clone()),
                    GateState::Closed => return Err(ScopeError::Closed),
                    GateState::Pending => {
                        // Register before unlocking so a release in between is not lost
                        notified.as_mut().enable();
                    }
                }
            }
            debug!("[ReadinessGate] Pending without a holder, waiting");
            notified.await;
        }
    }

    /// Current state without waiting; `None` while the driver holds the gate
    pub fn peek(&self) -> Option<GateState> {
        self.state.try_lock().ok().map(|state| state.clone())
    }
}

/// Exclusive hold on the gate. Releasing it lets queued callers re-enter.
pub struct GateHold {
    guard: Option<OwnedMutexGuard<GateState>>,
    notify: Arc<Notify>,
}

impl GateHold {
    pub fn open(mut self) {
        self.set(GateState::Open);
    }

    pub fn fail(mut self, err: ScopeError) {
        self.set(GateState::Dead(err));
    }

    pub fn close(mut self) {
        self.set(GateState::Closed);
    }

    /// Keep holding, but record that no session is available
    pub fn reset(&mut self) {
        self.set(GateState::Pending);
    }

    pub fn state(&self) -> Option<&GateState> {
        self.guard.as_deref()
    }

    fn set(&mut self, state: GateState) {
        if let Some(guard) = self.guard.as_mut() {
            **guard = state;
        }
    }
}

impl Drop for GateHold {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.notify.notify_waiters();
    }
}
