//! Idempotency store for externally-delivered callbacks.
//!
//! Keys are provider serial numbers; values are the exact response bodies
//! already returned for them. Reservation is an atomic check-and-set on the
//! slot map: of two concurrent deliveries of one serial, one becomes the
//! owner and the other parks on a oneshot until the owner's outcome is
//! known. Only success responses are retained; a released reservation lets
//! the next delivery reprocess.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

enum Slot {
    /// A worker is processing this key; parked duplicates wait here.
    InFlight(Vec<oneshot::Sender<Option<String>>>),
    /// Finished; replay `response` verbatim until the TTL lapses.
    Done { response: String, stored_at: Instant },
}

/// Outcome of attempting to claim an idempotency key.
pub enum Reservation {
    /// Caller owns the key and must `fulfill` or `release` it.
    Owner,
    /// Previously computed response to return verbatim.
    Replay(String),
    /// Another worker owns the key; await its outcome. `Some` carries the
    /// owner's response, `None` means the owner released and the key is up
    /// for grabs again.
    Wait(oneshot::Receiver<Option<String>>),
}

#[derive(Debug, Clone, Copy)]
pub struct IdempotencyStats {
    pub cached: usize,
    pub in_flight: usize,
}

pub struct IdempotencyStore {
    slots: DashMap<String, Slot>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            slots: DashMap::new(),
            ttl,
        })
    }

    pub fn reserve(&self, key: &str) -> Reservation {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Slot::InFlight(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Reservation::Wait(rx)
                }
                Slot::Done {
                    response,
                    stored_at,
                } => {
                    if stored_at.elapsed() < self.ttl {
                        Reservation::Replay(response.clone())
                    } else {
                        *entry.get_mut() = Slot::InFlight(Vec::new());
                        Reservation::Owner
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::InFlight(Vec::new()));
                Reservation::Owner
            }
        }
    }

    /// Store the owner's response and hand it to every parked duplicate.
    pub fn fulfill(&self, key: &str, response: String) {
        let previous = self.slots.insert(
            key.to_string(),
            Slot::Done {
                response: response.clone(),
                stored_at: Instant::now(),
            },
        );
        if let Some(Slot::InFlight(waiters)) = previous {
            for waiter in waiters {
                let _ = waiter.send(Some(response.clone()));
            }
        }
    }

    /// Abandon a reservation whose outcome must not be replayed. Parked
    /// duplicates wake up and contend for ownership again.
    pub fn release(&self, key: &str) {
        if let Some((_, Slot::InFlight(waiters))) =
            self.slots.remove_if(key, |_, slot| matches!(slot, Slot::InFlight(_)))
        {
            for waiter in waiters {
                let _ = waiter.send(None);
            }
        }
    }

    /// Drop cached responses past their TTL. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.slots.len();
        let ttl = self.ttl;
        self.slots.retain(|_, slot| match slot {
            Slot::InFlight(_) => true,
            Slot::Done { stored_at, .. } => stored_at.elapsed() < ttl,
        });
        before.saturating_sub(self.slots.len())
    }

    /// Periodic sweep of expired entries.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired idempotency entries");
                }
            }
        });
    }

    pub fn stats(&self) -> IdempotencyStats {
        let mut cached = 0;
        let mut in_flight = 0;
        for slot in self.slots.iter() {
            match slot.value() {
                Slot::Done { .. } => cached += 1,
                Slot::InFlight(_) => in_flight += 1,
            }
        }
        IdempotencyStats { cached, in_flight }
    }
}
