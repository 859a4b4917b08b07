//! One-shot timers keyed by room and purpose.
//!
//! Scheduling a key that is already armed replaces the old timer. When a
//! timer fires, a [`FiredTimer`] carrying the token handed out at schedule
//! time is sent to the dispatcher channel; the session compares that token
//! with the one it stored, so a timer that raced with a cancel is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::{CookieId, HostId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Room has been below quota too long.
    AllConnected,
    /// Host has not acknowledged its connect response.
    AckTimeout(HostId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub cid: CookieId,
    pub kind: TimerKind,
}

impl TimerKey {
    pub const fn all_connected(cid: CookieId) -> Self {
        Self {
            cid,
            kind: TimerKind::AllConnected,
        }
    }

    pub const fn ack(cid: CookieId, host: HostId) -> Self {
        Self {
            cid,
            kind: TimerKind::AckTimeout(host),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub key: TimerKey,
    pub token: TimerToken,
}

struct Armed {
    token: TimerToken,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct TimerService {
    fired_tx: mpsc::UnboundedSender<FiredTimer>,
    armed: Arc<Mutex<HashMap<TimerKey, Armed>>>,
    next_token: Arc<AtomicU64>,
}

impl TimerService {
    /// Create the service and the receiver the dispatcher drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FiredTimer>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let service = Self {
            fired_tx,
            armed: Arc::new(Mutex::new(HashMap::new())),
            next_token: Arc::new(AtomicU64::new(1)),
        };
        (service, fired_rx)
    }

    /// Arm `key` to fire after `delay`, replacing any timer already armed
    /// under it.
    pub fn schedule(&self, key: TimerKey, delay: Duration) -> TimerToken {
        let token = TimerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let fired_tx = self.fired_tx.clone();
        let shared = Arc::clone(&self.armed);

        // Held across the spawn so a zero delay cannot fire before the entry
        // exists.
        let mut armed = self.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut armed = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if armed.get(&key).is_some_and(|a| a.token == token) {
                    armed.remove(&key);
                }
            }
            let _ = fired_tx.send(FiredTimer { key, token });
        });
        if let Some(previous) = armed.insert(key, Armed { token, task }) {
            previous.task.abort();
        }
        drop(armed);

        debug!(cid = key.cid, kind = ?key.kind, delay_ms = delay.as_millis(), "Timer armed");
        token
    }

    /// Disarm `key`. Returns whether a timer was pending.
    pub fn cancel(&self, key: TimerKey) -> bool {
        let Some(armed) = self.lock().remove(&key) else {
            return false;
        };
        armed.task.abort();
        debug!(cid = key.cid, kind = ?key.kind, "Timer cancelled");
        true
    }

    /// Disarm every timer belonging to a room.
    pub fn cancel_room(&self, cid: CookieId) {
        let mut armed = self.lock();
        armed.retain(|key, timer| {
            if key.cid == cid {
                timer.task.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.lock().contains_key(&key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TimerKey, Armed>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
