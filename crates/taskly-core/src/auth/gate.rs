//! Exclusive gate around authentication state checks
//!
//! Restore and verify operations must not interleave. A caller that finds the
//! gate held waits for a release notification; once the timeout expires the
//! gate is taken over forcibly so a stuck holder can never deadlock the app.
//! The stale holder's guard then releases nothing.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Default)]
struct GateState {
    held: bool,
    generation: u64,
}

#[derive(Debug)]
pub struct AuthGate {
    state: Mutex<GateState>,
    released: Notify,
    timeout: Duration,
}

impl AuthGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            released: Notify::new(),
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self) -> Option<AuthGateGuard<'_>> {
        let mut state = self.lock();
        if state.held {
            return None;
        }
        state.held = true;
        state.generation += 1;
        Some(AuthGateGuard {
            gate: self,
            generation: state.generation,
        })
    }

    fn force_take(&self) -> AuthGateGuard<'_> {
        let mut state = self.lock();
        state.held = true;
        state.generation += 1;
        AuthGateGuard {
            gate: self,
            generation: state.generation,
        }
    }

    pub fn is_held(&self) -> bool {
        self.lock().held
    }

    /// Wait for the gate, forcing it open after the timeout
    pub async fn acquire(&self) -> AuthGateGuard<'_> {
        let deadline = Instant::now() + self.timeout;

        loop {
            // Register interest before checking so a release in between is not lost
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(guard) = self.take() {
                return guard;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(timeout = ?self.timeout, "Auth gate held past timeout, forcing release");
                return self.force_take();
            }
        }
    }
}

/// Releases the gate on drop, unless it was taken over meanwhile
#[derive(Debug)]
pub struct AuthGateGuard<'a> {
    gate: &'a AuthGate,
    generation: u64,
}

impl Drop for AuthGateGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        if state.generation == self.generation {
            state.held = false;
            drop(state);
            self.gate.released.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let gate = AuthGate::new(Duration::from_secs(1));
        {
            let _guard = gate.acquire().await;
            assert!(gate.is_held());
        }
        assert!(!gate.is_held());
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let gate = Arc::new(AuthGate::new(Duration::from_secs(5)));
        let guard = gate.acquire().await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let _guard = gate.acquire().await;
                started.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(guard);

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(5));
        assert!(!gate.is_held());
    }

    #[tokio::test]
    async fn test_timeout_forces_release() {
        let gate = AuthGate::new(Duration::from_millis(50));
        let stale = gate.acquire().await;

        let started = Instant::now();
        let fresh = gate.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(50));

        // The stale holder no longer owns the gate
        drop(stale);
        assert!(gate.is_held());
        drop(fresh);
        assert!(!gate.is_held());
    }
}
