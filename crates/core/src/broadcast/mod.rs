//! Single-publisher fan-out built on a chain of single-slot links.
//!
//! The broadcaster owns the unfilled tail of the chain. Publishing fills the
//! tail with the value and a fresh tail, then moves on. Every [`Cursor`] keeps
//! its own position in the chain and walks it at its own pace, so subscribers
//! never register with the publisher and never need to unregister: dropping a
//! cursor releases the links only it was still holding.
//!
//! Slots are written once and never mutated afterwards, so a poisoned slot
//! lock still guards either an empty slot or a complete one. The chain
//! recovers the guard instead of failing the reader.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};

use arc_swap::ArcSwap;
use std::time::{Duration, Instant};

/// Outcome of [`Broadcaster::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// The value was appended to the chain.
    Sent,
    /// Another publish or a close held the relay; the value was discarded.
    Dropped,
    /// The broadcaster has been closed.
    Closed,
}

/// Outcome of a non-blocking or bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryRecv<T> {
    Value(T),
    /// Nothing has been published at the cursor's position yet.
    Empty,
    /// End of stream.
    Closed,
}

enum Filled<T> {
    Value(T, Arc<Link<T>>),
    Closed,
}

/// One position in the chain. Written exactly once, by the publisher.
struct Link<T> {
    slot: Mutex<Option<Filled<T>>>,
    filled: Condvar,
}

impl<T> Link<T> {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(None),
            filled: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Filled<T>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fill(&self, filled: Filled<T>) {
        let mut slot = self.lock();
        debug_assert!(slot.is_none(), "broadcast link filled twice");
        *slot = Some(filled);
        self.filled.notify_all();
    }

    fn take_next(&mut self) -> Option<Arc<Link<T>>> {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some(Filled::Value(_, next)) => Some(next),
            _ => None,
        }
    }
}

impl<T> Drop for Link<T> {
    // Unlinks iteratively; a long unconsumed chain would otherwise be torn
    // down recursively and could exhaust the stack.
    fn drop(&mut self) {
        let mut next = self.take_next();
        while let Some(link) = next {
            match Arc::try_unwrap(link) {
                Ok(mut inner) => next = inner.take_next(),
                Err(_) => break,
            }
        }
    }
}

struct Shared<T> {
    /// Serialises writers of the tail link. Subscribers never touch it.
    relay: Mutex<()>,
    /// Unfilled end of the chain, loaded without locking by `subscribe`.
    tail: ArcSwap<Link<T>>,
    closed: AtomicBool,
}

/// Handle to the publishing end. Clones share the same chain.
pub struct Broadcaster<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone> Broadcaster<T> {
    /// Creates an open broadcaster with no values and no subscribers.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                relay: Mutex::new(()),
                tail: ArcSwap::new(Link::empty()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a cursor positioned at the next value not yet published.
    ///
    /// Only reads the tail pointer, so it never contends with `publish`.
    pub fn subscribe(&self) -> Cursor<T> {
        Cursor {
            link: self.shared.tail.load_full(),
        }
    }

    /// Appends `value` to the chain without ever waiting on subscribers.
    ///
    /// The relay admits one writer at a time. If another publish or a close
    /// holds it, the value is dropped rather than queued.
    pub fn publish(&self, value: T) -> Publish {
        if self.is_closed() {
            return Publish::Closed;
        }

        let _relay = match self.shared.relay.try_lock() {
            Ok(relay) => relay,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!("broadcast relay busy, dropping value");
                return Publish::Dropped;
            }
        };

        if self.is_closed() {
            return Publish::Closed;
        }

        let next = Link::empty();
        self.shared
            .tail
            .load()
            .fill(Filled::Value(value, next.clone()));
        self.shared.tail.store(next);
        Publish::Sent
    }

    /// Ends the stream. Cursors drain what was published before the close and
    /// then observe end of stream; cursors created afterwards see it at once.
    pub fn close(&self) {
        let _relay = self
            .shared
            .relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.tail.load().fill(Filled::Closed);
        tracing::debug!("broadcaster closed");
    }

    /// Whether [`Broadcaster::close`] has been called on any clone.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Occupies the relay so that publishes are dropped until the guard goes.
    #[cfg(test)]
    pub(crate) fn hold_relay(&self) -> impl Sized + '_ {
        self.shared
            .relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// A subscriber's private read position in the chain.
///
/// Cloning a cursor forks it: both copies receive every value from the shared
/// position onwards.
pub struct Cursor<T> {
    link: Arc<Link<T>>,
}

impl<T: Clone> Cursor<T> {
    /// Blocks until the next value is published. Returns `None` once the
    /// broadcaster is closed.
    pub fn recv(&mut self) -> Option<T> {
        let step = {
            let mut slot = self.link.lock();
            while slot.is_none() {
                slot = self
                    .link
                    .filled
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Self::step(&slot)
        };
        self.advance(step)
    }

    /// Returns the next value if one is already published, without blocking.
    pub fn try_recv(&mut self) -> TryRecv<T> {
        let step = {
            let slot = self.link.lock();
            if slot.is_none() {
                return TryRecv::Empty;
            }
            Self::step(&slot)
        };
        match self.advance(step) {
            Some(value) => TryRecv::Value(value),
            None => TryRecv::Closed,
        }
    }

    /// Like [`Cursor::recv`] but gives up after `timeout`, returning
    /// [`TryRecv::Empty`].
    pub fn recv_timeout(&mut self, timeout: Duration) -> TryRecv<T> {
        let deadline = Instant::now() + timeout;
        let step = {
            let mut slot = self.link.lock();
            while slot.is_none() {
                let now = Instant::now();
                if now >= deadline {
                    return TryRecv::Empty;
                }
                slot = self
                    .link
                    .filled
                    .wait_timeout(slot, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            Self::step(&slot)
        };
        match self.advance(step) {
            Some(value) => TryRecv::Value(value),
            None => TryRecv::Closed,
        }
    }

    fn step(slot: &Option<Filled<T>>) -> Option<(T, Arc<Link<T>>)> {
        match slot {
            Some(Filled::Value(value, next)) => Some((value.clone(), next.clone())),
            _ => None,
        }
    }

    fn advance(&mut self, step: Option<(T, Arc<Link<T>>)>) -> Option<T> {
        let (value, next) = step?;
        self.link = next;
        Some(value)
    }
}

impl<T: Clone> Iterator for Cursor<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv()
    }
}

impl<T> Clone for Cursor<T> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
        }
    }
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor").finish()
    }
}
