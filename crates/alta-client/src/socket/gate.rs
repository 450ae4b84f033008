//! The halted gate: a single-producer, many-waiter latch.
//!
//! While a socket migrates or recovers, every non-migration sender parks
//! on the gate; the owning instance opens it once the socket is ready for
//! normal traffic again. Waiters never error; they simply resume when the
//! gate opens.

use tokio::sync::watch;

/// Latch gating non-migration outbound traffic on an account socket.
///
/// Exactly one owner opens and closes the gate; any number of senders
/// await it. The gate starts closed and opens once the first socket is
/// live.
#[derive(Debug)]
pub struct HaltedGate {
    state: watch::Sender<bool>,
}

impl HaltedGate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Opens the gate, releasing every waiter.
    pub fn open(&self) {
        self.state.send_replace(true);
    }

    /// Closes the gate; subsequent waits park until it reopens.
    pub fn close(&self) {
        self.state.send_replace(false);
    }

    /// Whether the gate is currently open.
    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Waits until the gate is open.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // wait_for returns immediately when already open
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for HaltedGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_starts_closed() {
        let gate = HaltedGate::new();
        assert!(!gate.is_open());
        gate.open();
        assert!(gate.is_open());
        gate.close();
        assert!(!gate.is_open());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_open() {
        let gate = HaltedGate::new();
        gate.open();
        tokio::time::timeout(Duration::from_millis(50), gate.wait())
            .await
            .expect("open gate must not block");
    }

    #[tokio::test]
    async fn test_waiters_park_until_open() {
        let gate = Arc::new(HaltedGate::new());

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            waiters.push(tokio::spawn(async move {
                gate.wait().await;
            }));
        }

        // Give the waiters a moment to park, then release them all.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        gate.open();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_millis(200), waiter)
                .await
                .expect("waiter must resume once open")
                .unwrap();
        }
    }
}
