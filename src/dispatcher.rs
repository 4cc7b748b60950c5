//! Request dispatcher (C3, §4.3): turns inbound `Request` tunnel frames into
//! calls against the local HTTP surface (C1), bounded to 16 concurrent
//! workers per session with FIFO queuing beyond that, each protected by a
//! per-request cancellation handle the session can fire on close.
//!
//! Grounded on the teacher's `tunnel/dispatcher.rs`: the `streams: HashMap<u32,
//! _>` admission/duplicate check there becomes an `id`-keyed
//! `HashMap<String, CancellationToken>` here, and the teacher's hard
//! `max_streams` rejection becomes a `Semaphore` queue, since §4.3 requires
//! requests to queue rather than be dropped once admitted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityClock;
use crate::gate::KeepaliveGate;
use crate::http::{HttpResponse, Router};
use crate::protocol::TunnelFrame;

const MAX_CONCURRENT_REQUESTS: usize = 16;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Polling granularity for `wait_drain` (§4.6 Draining).
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

enum Outcome {
    Response(HttpResponse),
    TimedOut,
    Cancelled,
}

pub struct Dispatcher {
    router: Arc<Router>,
    gate: Arc<KeepaliveGate>,
    activity: Arc<ActivityClock>,
    semaphore: Arc<Semaphore>,
    inflight: Mutex<HashMap<String, CancellationToken>>,
    outbound: mpsc::Sender<TunnelFrame>,
    /// Set on transition to Draining (§4.6): new requests are answered 503
    /// instead of admitted, covering the race where one slips in just as
    /// the session is winding down.
    draining: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        router: Arc<Router>,
        gate: Arc<KeepaliveGate>,
        activity: Arc<ActivityClock>,
        outbound: mpsc::Sender<TunnelFrame>,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            gate,
            activity,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_REQUESTS)),
            inflight: Mutex::new(HashMap::new()),
            outbound,
            draining: AtomicBool::new(false),
        })
    }

    /// Fire every in-flight request's cancellation handle (§4.3 step 5,
    /// called by the Session on transition out of `Running`).
    pub fn cancel_all(&self) {
        let inflight = self.inflight.lock().unwrap();
        for token in inflight.values() {
            token.cancel();
        }
    }

    /// Enter Draining (§4.6): subsequent `dispatch` calls are answered 503
    /// instead of admitted.
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Wait until no request is in flight, or `timeout` elapses, whichever
    /// comes first (§4.6 Draining: "wait up to 5s for outstanding responses
    /// to flush").
    pub async fn wait_drain(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inflight.lock().unwrap().is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Route one inbound Request frame. Never blocks the caller — admission
    /// and duplicate-id detection happen synchronously, the actual work runs
    /// in a spawned worker.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        self: &Arc<Self>,
        id: String,
        method: String,
        path: String,
        query: HashMap<String, String>,
        headers: HashMap<String, String>,
        body: Bytes,
    ) {
        if self.draining.load(Ordering::SeqCst) {
            let dispatcher = Arc::clone(self);
            tokio::spawn(async move {
                dispatcher
                    .send_response(id, 503, HashMap::new(), Bytes::from_static(b"{\"error\":\"session draining\"}"))
                    .await;
            });
            return;
        }

        let token = {
            let mut inflight = self.inflight.lock().unwrap();
            if inflight.contains_key(&id) {
                let dispatcher = Arc::clone(self);
                let dup_id = id.clone();
                tokio::spawn(async move {
                    dispatcher
                        .send_response(
                            dup_id,
                            409,
                            HashMap::new(),
                            Bytes::from_static(b"{\"error\":\"duplicate request id\"}"),
                        )
                        .await;
                });
                return;
            }
            let token = CancellationToken::new();
            inflight.insert(id.clone(), token.clone());
            token
        };

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            dispatcher.run_worker(id, method, path, query, headers, body, token).await;
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_worker(
        self: Arc<Self>,
        id: String,
        method: String,
        path: String,
        query: HashMap<String, String>,
        headers: HashMap<String, String>,
        body: Bytes,
        token: CancellationToken,
    ) {
        let gate_guard = tokio::select! {
            guard = self.gate.acquire_shared() => guard,
            _ = token.cancelled() => {
                self.inflight.lock().unwrap().remove(&id);
                return;
            }
        };
        self.activity.touch_with_jitter();

        let semaphore = Arc::clone(&self.semaphore);
        let permit = tokio::select! {
            result = semaphore.acquire_owned() => match result {
                Ok(permit) => permit,
                Err(_) => {
                    self.inflight.lock().unwrap().remove(&id);
                    return;
                }
            },
            _ = token.cancelled() => {
                self.inflight.lock().unwrap().remove(&id);
                return;
            }
        };

        let outcome = tokio::select! {
            response = self.router.invoke(&method, &path, &query, &headers, &body) => Outcome::Response(response),
            _ = tokio::time::sleep(REQUEST_TIMEOUT) => Outcome::TimedOut,
            _ = token.cancelled() => Outcome::Cancelled,
        };

        drop(permit);
        drop(gate_guard);
        self.inflight.lock().unwrap().remove(&id);

        match outcome {
            Outcome::Response(response) => {
                self.send_response(id, response.status, response.headers, response.body).await;
            }
            Outcome::TimedOut => {
                self.send_response(
                    id,
                    504,
                    HashMap::new(),
                    Bytes::from_static(b"{\"error\":\"request timed out\"}"),
                )
                .await;
            }
            Outcome::Cancelled => {
                // Session ended before the worker finished; §4.3 step 5
                // says to discard the response.
            }
        }
    }

    async fn send_response(&self, id: String, status: u16, headers: HashMap<String, String>, body: Bytes) {
        let frame = TunnelFrame::Response { id, status, headers, body };
        let _ = self.outbound.send(frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn new_dispatcher() -> (Arc<Dispatcher>, mpsc::Receiver<TunnelFrame>) {
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            Arc::new(Router::new()),
            Arc::new(KeepaliveGate::new()),
            Arc::new(ActivityClock::new()),
            tx,
        );
        (dispatcher, rx)
    }

    #[tokio::test]
    async fn unknown_route_yields_404_response() {
        let (dispatcher, mut rx) = new_dispatcher();
        dispatcher.dispatch(
            "req-1".to_string(),
            "GET".to_string(),
            "/nope".to_string(),
            HashMap::new(),
            HashMap::new(),
            Bytes::new(),
        );

        let frame = rx.recv().await.unwrap();
        match frame {
            TunnelFrame::Response { id, status, .. } => {
                assert_eq!(id, "req-1");
                assert_eq!(status, 404);
            }
            _ => panic!("expected a Response frame"),
        }
    }

    #[tokio::test]
    async fn duplicate_id_is_answered_409_without_disturbing_the_first() {
        let (dispatcher, mut rx) = new_dispatcher();
        dispatcher.dispatch(
            "dup".to_string(),
            "GET".to_string(),
            "/computer/display/dimensions".to_string(),
            HashMap::new(),
            HashMap::new(),
            Bytes::new(),
        );
        dispatcher.dispatch(
            "dup".to_string(),
            "GET".to_string(),
            "/computer/display/dimensions".to_string(),
            HashMap::new(),
            HashMap::new(),
            Bytes::new(),
        );

        let mut statuses = Vec::new();
        for _ in 0..2 {
            if let TunnelFrame::Response { status, .. } = rx.recv().await.unwrap() {
                statuses.push(status);
            }
        }
        statuses.sort();
        assert_eq!(statuses, vec![409, 501]);
    }

    #[tokio::test]
    async fn cancel_all_discards_inflight_responses() {
        let (dispatcher, mut rx) = new_dispatcher();
        // Hold the gate exclusively so the worker parks waiting for it,
        // giving cancel_all a deterministic window to fire first.
        let gate_guard = dispatcher.gate.acquire_exclusive().await;

        dispatcher.dispatch(
            "will-cancel".to_string(),
            "GET".to_string(),
            "/computer/display/dimensions".to_string(),
            HashMap::new(),
            HashMap::new(),
            Bytes::new(),
        );
        tokio::task::yield_now().await;
        dispatcher.cancel_all();
        drop(gate_guard);

        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(received.is_err() || received.unwrap().is_none(), "expected no response after cancellation");
    }

    #[tokio::test]
    async fn draining_answers_503_without_admitting_new_requests() {
        let (dispatcher, mut rx) = new_dispatcher();
        dispatcher.start_draining();
        dispatcher.dispatch(
            "late".to_string(),
            "GET".to_string(),
            "/computer/display/dimensions".to_string(),
            HashMap::new(),
            HashMap::new(),
            Bytes::new(),
        );

        let frame = rx.recv().await.unwrap();
        match frame {
            TunnelFrame::Response { id, status, .. } => {
                assert_eq!(id, "late");
                assert_eq!(status, 503);
            }
            _ => panic!("expected a Response frame"),
        }
        assert!(dispatcher.inflight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wait_drain_returns_once_inflight_is_empty() {
        let (dispatcher, mut rx) = new_dispatcher();
        dispatcher.dispatch(
            "quick".to_string(),
            "GET".to_string(),
            "/computer/display/dimensions".to_string(),
            HashMap::new(),
            HashMap::new(),
            Bytes::new(),
        );
        rx.recv().await.unwrap();
        tokio::time::timeout(Duration::from_millis(500), dispatcher.wait_drain(Duration::from_secs(5)))
            .await
            .expect("wait_drain should return promptly once inflight is empty");
    }
}
