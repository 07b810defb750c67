//! Cycle tagged single slot mailboxes.
//!
//! A [CycleChannel] buffers at most one value per cycle tag. The receiver asks for a
//! specific cycle and suspends until that value arrives. Once a cycle is consumed,
//! every older entry is discarded and later sends tagged with an old cycle are rejected.

use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    sync::{Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use tracing::{trace, warn};

use crate::error::{Error, Result};

struct Slot<T> {
    pending: BTreeMap<u64, T>,
    consumed: Option<u64>,
    waker: Option<Waker>,
    closed: bool,
}

/// A one value per cycle mailbox with a suspending receive.
pub struct CycleChannel<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> Default for CycleChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CycleChannel<T> {
    /// An open, empty channel.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: BTreeMap::new(),
                consumed: None,
                waker: None,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // A panic while holding the lock leaves the slot in a consistent state.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deposit `value` for `cycle` and wake a waiting receiver.
    ///
    /// A second value for the same cycle replaces the first. A value tagged with a cycle
    /// that was already consumed is rejected with [Error::StaleMessage] and the channel
    /// is left unchanged.
    pub fn send(&self, cycle: u64, value: T) -> Result<()> {
        let mut slot = self.lock();
        if slot.closed {
            return Err(Error::ChannelClosed);
        }
        if let Some(consumed) = slot.consumed {
            if cycle <= consumed {
                warn!(cycle, consumed, "Rejecting message tagged with a consumed cycle");
                return Err(Error::StaleMessage { cycle, consumed });
            }
        }
        if slot.pending.insert(cycle, value).is_some() {
            warn!(cycle, "Replacing unconsumed message with the same cycle tag");
        }
        trace!(cycle, "Message deposited");
        if let Some(waker) = slot.waker.take() {
            waker.wake();
        }
        Ok(())
    }

    /// Wait for the value tagged with `cycle`.
    pub fn recv(&self, cycle: u64) -> Recv<'_, T> {
        Recv {
            channel: self,
            cycle,
        }
    }

    /// Take the value for `cycle` if it is already there.
    pub fn try_recv(&self, cycle: u64) -> Option<Result<T>> {
        match self.poll_cycle(cycle, None) {
            Poll::Ready(result) => Some(result),
            Poll::Pending => None,
        }
    }

    /// Close the channel. Pending values are dropped and waiting receivers fail.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.pending.clear();
        if let Some(waker) = slot.waker.take() {
            waker.wake();
        }
    }

    /// True once [CycleChannel::close] was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// The last consumed cycle.
    pub fn last_consumed(&self) -> Option<u64> {
        self.lock().consumed
    }

    /// Cycles with a value waiting to be consumed.
    pub fn pending_cycles(&self) -> Vec<u64> {
        self.lock().pending.keys().copied().collect()
    }

    fn poll_cycle(&self, cycle: u64, waker: Option<&Waker>) -> Poll<Result<T>> {
        let mut slot = self.lock();
        if let Some(consumed) = slot.consumed {
            if cycle <= consumed {
                return Poll::Ready(Err(Error::StaleMessage { cycle, consumed }));
            }
        }
        if let Some(value) = slot.pending.remove(&cycle) {
            let newer = slot.pending.split_off(&cycle);
            let superseded = std::mem::replace(&mut slot.pending, newer);
            if !superseded.is_empty() {
                warn!(
                    cycle,
                    dropped = superseded.len(),
                    "Discarding messages superseded by a newer cycle"
                );
            }
            slot.consumed = Some(cycle);
            trace!(cycle, "Message consumed");
            return Poll::Ready(Ok(value));
        }
        if slot.closed {
            return Poll::Ready(Err(Error::ChannelClosed));
        }
        if let Some(waker) = waker {
            slot.waker = Some(waker.clone());
        }
        Poll::Pending
    }
}

/// Future returned by [CycleChannel::recv].
pub struct Recv<'a, T> {
    channel: &'a CycleChannel<T>,
    cycle: u64,
}

impl<T> Future for Recv<'_, T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.channel.poll_cycle(self.cycle, Some(cx.waker()))
    }
}
