//! The session hub: process-wide registry of live subscriber connections,
//! per-session heartbeat timers, and per-session debounced guidance timers.
//!
//! Held behind an `Arc` in `AppState` rather than as module-level state so
//! tests can run isolated hubs side by side. Fanout iterates a snapshot of
//! the subscriber set; a subscriber whose outbound channel is gone is
//! pruned and the remaining subscribers are unaffected.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ca_protocol::{empty_payload, EventEnvelope, EventType};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub type OutboundSender = mpsc::UnboundedSender<EventEnvelope>;

/// Opaque handle identifying one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

struct Subscriber {
    tx: OutboundSender,
    last_seen: DateTime<Utc>,
}

struct SessionEntry {
    subscribers: HashMap<ConnId, Subscriber>,
    heartbeat: Option<JoinHandle<()>>,
    pending_guidance: Option<JoinHandle<()>>,
    /// Serializes append+fanout sequences so every subscriber observes
    /// events in server_seq order.
    publish_lock: Arc<Mutex<()>>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            heartbeat: None,
            pending_guidance: None,
            publish_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub struct SessionHub {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    next_conn_id: AtomicU64,
    heartbeat_interval: Duration,
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHub {
    pub fn new() -> Self {
        Self::with_heartbeat_interval(HEARTBEAT_INTERVAL)
    }

    pub fn with_heartbeat_interval(heartbeat_interval: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            heartbeat_interval,
        }
    }

    /// Register a connection's outbound channel. The first subscriber of a
    /// session arms its heartbeat timer.
    pub async fn register(self: &Arc<Self>, session_id: Uuid, tx: OutboundSender) -> ConnId {
        let conn_id = ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(session_id).or_insert_with(SessionEntry::new);
        entry.subscribers.insert(
            conn_id,
            Subscriber {
                tx,
                last_seen: Utc::now(),
            },
        );
        if entry.heartbeat.as_ref().is_none_or(JoinHandle::is_finished) {
            let hub = Arc::clone(self);
            entry.heartbeat = Some(tokio::spawn(async move {
                hub.heartbeat_loop(session_id).await;
            }));
        }
        conn_id
    }

    /// Drop a connection. The last unregister of a session cancels its
    /// heartbeat and any pending guidance timer and removes the entry.
    pub async fn unregister(&self, session_id: Uuid, conn_id: ConnId) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(&session_id) {
            entry.subscribers.remove(&conn_id);
            if entry.subscribers.is_empty() {
                if let Some(handle) = entry.heartbeat.take() {
                    handle.abort();
                }
                if let Some(handle) = entry.pending_guidance.take() {
                    handle.abort();
                }
                sessions.remove(&session_id);
            }
        }
    }

    /// Record liveness for a connection (driven by `system.pong`).
    pub async fn touch(&self, session_id: Uuid, conn_id: ConnId) {
        let mut sessions = self.sessions.write().await;
        if let Some(subscriber) = sessions
            .get_mut(&session_id)
            .and_then(|entry| entry.subscribers.get_mut(&conn_id))
        {
            subscriber.last_seen = Utc::now();
        }
    }

    pub async fn last_seen(&self, session_id: Uuid, conn_id: ConnId) -> Option<DateTime<Utc>> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .and_then(|entry| entry.subscribers.get(&conn_id))
            .map(|subscriber| subscriber.last_seen)
    }

    pub async fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Deliver an envelope to every current subscriber of the session.
    ///
    /// Iterates a snapshot, so registration changes during delivery do not
    /// affect this call. Subscribers whose channel is closed are removed;
    /// no error escapes.
    pub async fn fanout(&self, session_id: Uuid, envelope: &EventEnvelope) {
        let targets: Vec<(ConnId, OutboundSender)> = {
            let sessions = self.sessions.read().await;
            match sessions.get(&session_id) {
                Some(entry) => entry
                    .subscribers
                    .iter()
                    .map(|(conn_id, subscriber)| (*conn_id, subscriber.tx.clone()))
                    .collect(),
                None => return,
            }
        };

        let mut stale = Vec::new();
        for (conn_id, tx) in targets {
            if tx.send(envelope.clone()).is_err() {
                stale.push(conn_id);
            }
        }
        if !stale.is_empty() {
            let mut sessions = self.sessions.write().await;
            if let Some(entry) = sessions.get_mut(&session_id) {
                for conn_id in stale {
                    entry.subscribers.remove(&conn_id);
                }
            }
        }
    }

    /// The per-session publish lock, created on first use (the entry sticks
    /// around until the session's last unregister, like the rest of the
    /// registry state).
    pub async fn publish_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(entry) = sessions.get(&session_id) {
                return Arc::clone(&entry.publish_lock);
            }
        }
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(session_id).or_insert_with(SessionEntry::new);
        Arc::clone(&entry.publish_lock)
    }

    /// Arm (or re-arm) the session's debounce timer: any pending timer is
    /// cancelled, and `job` runs once `delay` elapses without another call.
    pub async fn schedule_debounced<F>(&self, session_id: Uuid, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(session_id).or_insert_with(SessionEntry::new);
        if let Some(pending) = entry.pending_guidance.take() {
            pending.abort();
        }
        entry.pending_guidance = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        }));
    }

    async fn heartbeat_loop(self: Arc<Self>, session_id: Uuid) {
        let mut interval = tokio::time::interval(self.heartbeat_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            if self.subscriber_count(session_id).await == 0 {
                return;
            }
            let ping = EventEnvelope::server(session_id, EventType::Ping, empty_payload());
            self.fanout(session_id, &ping).await;
        }
    }
}
