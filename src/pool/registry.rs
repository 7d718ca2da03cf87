//! Keyed registry of live protocol sessions.
//!
//! The key → slot map is a moka cache, which gives atomic get-or-insert
//! without a registry-wide lock. Each slot carries its own async mutex, so
//! operations on one session are serialized while unrelated sessions proceed
//! in parallel. A slot is marked retired under its own lock before it leaves
//! the map; anyone who was waiting on a retired slot looks the key up again.

use std::future::Future;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use moka::future::Cache;
use moka::ops::compute::Op;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use super::key::{Protocol, SessionKey};
use crate::error::TransportError;
use crate::transport::Transport;

enum SlotState<T> {
    /// Just inserted; the first acquirer is connecting
    Empty,
    Live(T),
    /// Removed from the map; must not be used or refilled
    Retired,
}

struct Slot<T> {
    state: Arc<Mutex<SlotState<T>>>,
    /// Kept outside the state lock so the sweep can read it without
    /// waiting on an in-flight operation
    last_used: std::sync::Mutex<Instant>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState::Empty)),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = Instant::now();
        }
    }

    fn last_used(&self) -> Instant {
        match self.last_used.lock() {
            Ok(last_used) => *last_used,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Registry of pooled sessions for one protocol.
///
/// Cloning is cheap and every clone shares the same sessions.
pub struct SessionRegistry<T> {
    protocol: Protocol,
    slots: Cache<SessionKey, Arc<Slot<T>>>,
    close_timeout: Duration,
    close_failures: Arc<AtomicU64>,
}

impl<T> Clone for SessionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            protocol: self.protocol,
            slots: self.slots.clone(),
            close_timeout: self.close_timeout,
            close_failures: Arc::clone(&self.close_failures),
        }
    }
}

impl<T: Transport> SessionRegistry<T> {
    pub fn new(protocol: Protocol, close_timeout: Duration) -> Self {
        Self {
            protocol,
            slots: Cache::builder().build(),
            close_timeout,
            close_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Get exclusive use of the session for `key`, running `connect` if
    /// there is none.
    ///
    /// Concurrent callers for the same absent key wait for the first one's
    /// connect and then reuse its session. If that connect fails, the slot is
    /// dropped and each waiter tries again on its own. A failed connect
    /// leaves no entry behind.
    pub async fn acquire<F, Fut>(
        &self,
        key: &SessionKey,
        connect: F,
    ) -> Result<SessionGuard<T>, TransportError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut connect = Some(connect);
        loop {
            let slot = self
                .slots
                .get_with_by_ref(key, async { Arc::new(Slot::new()) })
                .await;
            let mut state = Arc::clone(&slot.state).lock_owned().await;

            let reused = match &*state {
                SlotState::Retired => continue,
                SlotState::Live(_) => {
                    tracing::debug!("Pool: reusing session {}", key);
                    true
                }
                SlotState::Empty => {
                    tracing::debug!("Pool: creating session {}", key);
                    // Every path below returns, so this runs at most once
                    let Some(connect) = connect.take() else {
                        return Err(TransportError::protocol(format!(
                            "session {} was already connected",
                            key
                        )));
                    };
                    match connect().await {
                        Ok(transport) => {
                            *state = SlotState::Live(transport);
                            slot.touch();
                            tracing::info!("Pool: connected {}", key);
                            false
                        }
                        Err(e) => {
                            *state = SlotState::Retired;
                            self.unmap(key, &slot).await;
                            tracing::warn!("Pool: connect failed for {}: {}", key, e);
                            return Err(e);
                        }
                    }
                }
            };

            return Ok(SessionGuard {
                key: key.clone(),
                slot,
                state,
                registry: self.clone(),
                reused,
            });
        }
    }

    /// Mark the session for `key` as just used.
    pub async fn touch(&self, key: &SessionKey) {
        if let Some(slot) = self.slots.get(key).await {
            slot.touch();
        }
    }

    /// Close and remove the session for `key`, waiting for any operation
    /// currently using it to finish first.
    pub async fn evict(&self, key: &SessionKey) -> bool {
        let Some(slot) = self.slots.get(key).await else {
            return false;
        };
        let mut state = Arc::clone(&slot.state).lock_owned().await;
        if matches!(*state, SlotState::Retired) {
            return false;
        }
        let previous = mem::replace(&mut *state, SlotState::Retired);
        self.unmap(key, &slot).await;
        drop(state);

        if let SlotState::Live(transport) = previous {
            close_transport(
                transport,
                key,
                self.close_timeout,
                &self.close_failures,
            )
            .await;
        }
        true
    }

    /// Evict every session idle for longer than `idle_threshold`.
    ///
    /// Sessions locked by an in-flight operation are skipped. Transports are
    /// closed on detached tasks so the caller never waits on the network.
    /// Returns the number of sessions evicted.
    pub async fn sweep(&self, idle_threshold: Duration) -> usize {
        let now = Instant::now();
        let candidates: Vec<(Arc<SessionKey>, Arc<Slot<T>>)> = self
            .slots
            .iter()
            .filter(|(_, slot)| now.saturating_duration_since(slot.last_used()) > idle_threshold)
            .collect();

        let mut evicted = 0;
        for (key, slot) in candidates {
            if self.sweep_slot(key, &slot, now, idle_threshold).await {
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::info!(
                "Pool: swept {} idle {} session(s)",
                evicted,
                self.protocol.as_str()
            );
        }
        evicted
    }

    /// Retire one sweep candidate if it is still idle, unlocked and not
    /// already retired. Returns whether a live transport was taken out.
    async fn sweep_slot(
        &self,
        key: Arc<SessionKey>,
        slot: &Arc<Slot<T>>,
        now: Instant,
        idle_threshold: Duration,
    ) -> bool {
        let Ok(mut state) = Arc::clone(&slot.state).try_lock_owned() else {
            return false;
        };
        // The snapshot may be stale: the slot can have been evicted and
        // replaced, or used again, since it was taken
        if matches!(*state, SlotState::Retired)
            || now.saturating_duration_since(slot.last_used()) <= idle_threshold
        {
            return false;
        }
        let previous = mem::replace(&mut *state, SlotState::Retired);
        self.unmap(&key, slot).await;
        drop(state);

        let SlotState::Live(transport) = previous else {
            return false;
        };
        tracing::debug!("Pool: sweeping idle session {}", key);
        let timeout = self.close_timeout;
        let failures = Arc::clone(&self.close_failures);
        tokio::spawn(async move {
            close_transport(transport, &key, timeout, &failures).await;
        });
        true
    }

    /// Remove `key` from the map only if it still points at `slot`. A
    /// retired slot must never unmap its successor.
    async fn unmap(&self, key: &SessionKey, slot: &Arc<Slot<T>>) {
        self.slots
            .entry_by_ref(key)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if Arc::ptr_eq(entry.value(), slot) => Op::Remove,
                    _ => Op::Nop,
                };
                std::future::ready(op)
            })
            .await;
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Number of keys currently in the registry
    pub fn len(&self) -> usize {
        self.slots.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes that errored or timed out since the registry was created
    pub fn close_failures(&self) -> u64 {
        self.close_failures.load(Ordering::Relaxed)
    }
}

/// Exclusive, short-lived use of one pooled session.
///
/// Dropping the guard returns the session to the registry untouched.
/// Call [`touch`](Self::touch) after a successful operation and
/// [`evict`](Self::evict) after a transport failure.
pub struct SessionGuard<T> {
    key: SessionKey,
    slot: Arc<Slot<T>>,
    state: OwnedMutexGuard<SlotState<T>>,
    registry: SessionRegistry<T>,
    reused: bool,
}

impl<T: Transport> SessionGuard<T> {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Whether the session existed before this acquisition
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn transport(&mut self) -> Result<&mut T, TransportError> {
        match &mut *self.state {
            SlotState::Live(transport) => Ok(transport),
            _ => Err(TransportError::protocol(format!(
                "session {} is no longer live",
                self.key
            ))),
        }
    }

    pub fn touch(&self) {
        self.slot.touch();
    }

    /// Remove the session from the registry and close it.
    pub async fn evict(self) {
        let SessionGuard {
            key,
            slot,
            mut state,
            registry,
            ..
        } = self;

        let previous = mem::replace(&mut *state, SlotState::Retired);
        registry.unmap(&key, &slot).await;
        drop(state);

        tracing::debug!("Pool: evicted {}", key);
        if let SlotState::Live(transport) = previous {
            close_transport(
                transport,
                &key,
                registry.close_timeout,
                &registry.close_failures,
            )
            .await;
        }
    }
}

/// Best-effort close. Failures are logged and counted, never returned.
async fn close_transport<T: Transport>(
    mut transport: T,
    key: &SessionKey,
    timeout: Duration,
    failures: &AtomicU64,
) {
    match tokio::time::timeout(timeout, transport.close()).await {
        Ok(Ok(())) => tracing::debug!("Pool: closed {}", key),
        Ok(Err(e)) => {
            failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Pool: error closing {}: {}", key, e);
        }
        Err(_) => {
            failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Pool: closing {} timed out after {:?}", key, timeout);
        }
    }
}
