//! The keepalive gate: a readers-writer primitive ensuring a keepalive
//! action (C5, exclusive) and a dispatcher-invoked local request (C3,
//! shared) never run at the same time (§5 Shared-resource policy).
//!
//! `tokio::sync::RwLock` is fair — a pending writer is not starved by a
//! steady stream of readers — which matches the "request waits, typically
//! < 2s" language in §4.3.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
pub struct KeepaliveGate(RwLock<()>);

impl KeepaliveGate {
    pub fn new() -> Self {
        Self(RwLock::new(()))
    }

    /// C3 holds this for the duration of one dispatched request.
    pub async fn acquire_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().await
    }

    /// C5 holds this for the duration of one keepalive action.
    pub async fn acquire_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Two tasks racing for the gate must never observe overlapping
    /// critical sections (§8 invariant 2, Gate exclusion).
    #[tokio::test]
    async fn exclusive_and_shared_never_overlap() {
        let gate = Arc::new(KeepaliveGate::new());
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let gate_w = Arc::clone(&gate);
        let log_w = Arc::clone(&log);
        let writer = tokio::spawn(async move {
            let _permit = gate_w.acquire_exclusive().await;
            log_w.lock().unwrap().push("write-start");
            tokio::time::sleep(Duration::from_millis(30)).await;
            log_w.lock().unwrap().push("write-end");
        });

        tokio::time::sleep(Duration::from_millis(5)).await;

        let gate_r = Arc::clone(&gate);
        let log_r = Arc::clone(&log);
        let reader = tokio::spawn(async move {
            let _permit = gate_r.acquire_shared().await;
            log_r.lock().unwrap().push("read-start");
            log_r.lock().unwrap().push("read-end");
        });

        writer.await.unwrap();
        reader.await.unwrap();

        let entries = log.lock().unwrap().clone();
        let write_end = entries.iter().position(|e| *e == "write-end").unwrap();
        let read_start = entries.iter().position(|e| *e == "read-start").unwrap();
        assert!(write_end < read_start, "reader ran while writer held the gate: {entries:?}");
    }

    #[tokio::test]
    async fn multiple_readers_run_concurrently() {
        let gate = Arc::new(KeepaliveGate::new());
        let a = gate.acquire_shared().await;
        let b = tokio::time::timeout(Duration::from_millis(50), gate.acquire_shared()).await;
        assert!(b.is_ok(), "second shared acquire should not block behind the first");
        drop(a);
    }
}
