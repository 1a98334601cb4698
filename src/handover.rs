//! Single-slot producer/consumer rendezvous (spec.md §4.4).
//!
//! Mirrors the teacher's preference for explicit, owned synchronization
//! primitives over ad-hoc shared state (cf. `ParallelHandler`'s channel
//! in the teacher's `client/pull.rs`), but the shape here is dictated by
//! spec.md directly: a mutex-guarded slot plus two condition variables,
//! one per transition direction, so a waiter for "available" is never
//! woken by an "occupied" notification and vice versa.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

#[derive(PartialEq, Eq)]
enum Slot<T> {
    Empty,
    Occupied(T),
}

struct Inner<T> {
    slot: Mutex<Slot<T>>,
    pushed: Condvar,
    emptied: Condvar,
}

/// A handover: holds at most one value of type `T`. Cloning a
/// `Handover` shares the same slot (it wraps an `Arc` internally), so
/// the producer and consumer can each hold their own handle into the
/// same rendezvous.
pub struct Handover<T> {
    inner: Arc<Inner<T>>,
    running: Arc<AtomicBool>,
}

impl<T> Clone for Handover<T> {
    fn clone(&self) -> Self {
        Handover {
            inner: Arc::clone(&self.inner),
            running: Arc::clone(&self.running),
        }
    }
}

/// Returned by `wait_for_available`/`wait_for_occupied`: `Ready` means
/// the handover reached the awaited state and the slot lock is held
/// (conceptually — in this implementation the guard is returned to the
/// caller so it can read or write the payload before anyone else can
/// observe the transition). `ShuttingDown` means `running` was
/// observed false first.
pub enum Wait<G> {
    Ready(G),
    ShuttingDown,
}

impl<T> Handover<T> {
    /// Creates a new empty handover sharing the process-wide `running`
    /// flag passed in by the caller (spec.md §9: `running` lives on the
    /// `Runtime`, not as a module global).
    pub fn new(running: Arc<AtomicBool>) -> Self {
        Handover {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::Empty),
                pushed: Condvar::new(),
                emptied: Condvar::new(),
            }),
            running,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Blocks until the slot is empty, or shutdown is signalled.
    ///
    /// On success the caller should immediately call `occupy` with the
    /// guard it receives; between `wait_for_available` returning and
    /// `occupy` running, the lock stays held, so no other producer can
    /// race us into the slot.
    pub fn wait_for_available(&self) -> Wait<HandoverGuard<'_, T>> {
        let mut guard = self.inner.slot.lock().unwrap();
        loop {
            if !self.is_running() {
                return Wait::ShuttingDown;
            }
            match &*guard {
                Slot::Empty => {
                    return Wait::Ready(HandoverGuard {
                        handover: self,
                        guard: Some(guard),
                    })
                }
                Slot::Occupied(_) => {
                    guard = self.inner.emptied.wait(guard).unwrap();
                }
            }
        }
    }

    /// Blocks until the slot is occupied, or shutdown is signalled.
    pub fn wait_for_occupied(&self) -> Wait<HandoverGuard<'_, T>> {
        let mut guard = self.inner.slot.lock().unwrap();
        loop {
            if !self.is_running() {
                return Wait::ShuttingDown;
            }
            match &*guard {
                Slot::Occupied(_) => {
                    return Wait::Ready(HandoverGuard {
                        handover: self,
                        guard: Some(guard),
                    })
                }
                Slot::Empty => {
                    guard = self.inner.pushed.wait(guard).unwrap();
                }
            }
        }
    }

    /// Non-blocking check: true if the slot currently holds a value.
    /// Used by the sync worker (spec.md §4.7) to poll the index
    /// handover between select-loop iterations without risking a
    /// blocking wait.
    pub fn is_occupied(&self) -> bool {
        matches!(&*self.inner.slot.lock().unwrap(), Slot::Occupied(_))
    }

    /// Publishes `value` unconditionally, overwriting whatever the slot
    /// held, and wakes `wait_for_occupied` waiters. Used for handovers
    /// that are always occupied after their first publish (the
    /// current-index slot, spec.md §4.7 step 2) rather than the
    /// strict empty/occupied handoff used elsewhere.
    pub fn publish(&self, value: T) {
        let mut guard = self.inner.slot.lock().unwrap();
        *guard = Slot::Occupied(value);
        drop(guard);
        self.inner.pushed.notify_all();
    }

    /// Wakes every waiter on both condition variables so that any
    /// thread blocked in `wait_for_available`/`wait_for_occupied`
    /// rechecks `running` and returns `ShuttingDown` promptly.
    pub fn stop(&self) {
        let _guard = self.inner.slot.lock().unwrap();
        self.inner.pushed.notify_all();
        self.inner.emptied.notify_all();
    }
}

/// Held while the caller has exclusive access to the slot after a
/// successful `wait_for_available`/`wait_for_occupied`. Dropping this
/// guard without calling `occupy`/`empty` is a logic error caught by a
/// debug assertion — every call site is expected to transition the
/// slot before releasing the guard.
pub struct HandoverGuard<'h, T> {
    handover: &'h Handover<T>,
    guard: Option<std::sync::MutexGuard<'h, Slot<T>>>,
}

impl<'h, T> HandoverGuard<'h, T> {
    /// Transitions `empty -> occupied`, storing `value`, and notifies
    /// waiters on the *push* condvar. Consumes the guard, releasing the
    /// lock.
    pub fn occupy(mut self, value: T) {
        let mut guard = self.guard.take().expect("guard taken twice");
        debug_assert!(matches!(&*guard, Slot::Empty));
        *guard = Slot::Occupied(value);
        drop(guard);
        self.handover.inner.pushed.notify_all();
    }

    /// Transitions `occupied -> empty`, returning the payload, and
    /// notifies waiters on the *empty* condvar. Consumes the guard,
    /// releasing the lock.
    pub fn take(mut self) -> T {
        let mut guard = self.guard.take().expect("guard taken twice");
        let slot = std::mem::replace(&mut *guard, Slot::Empty);
        drop(guard);
        self.handover.inner.emptied.notify_all();
        match slot {
            Slot::Occupied(value) => value,
            Slot::Empty => unreachable!("wait_for_occupied guarantees Occupied"),
        }
    }

    /// Reads the payload without consuming it, for handovers that stay
    /// occupied after the first publish (the current-index slot,
    /// spec.md §4.7 step 2: "a read is non-destructive").
    pub fn peek(&self) -> &T {
        match self.guard.as_deref().unwrap() {
            Slot::Occupied(value) => value,
            Slot::Empty => unreachable!("wait_for_occupied guarantees Occupied"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn running_flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    #[test]
    fn occupy_then_take_round_trips_value() {
        let h: Handover<i32> = Handover::new(running_flag());
        match h.wait_for_available() {
            Wait::Ready(guard) => guard.occupy(42),
            Wait::ShuttingDown => panic!("should not shut down"),
        }
        match h.wait_for_occupied() {
            Wait::Ready(guard) => assert_eq!(guard.take(), 42),
            Wait::ShuttingDown => panic!("should not shut down"),
        }
    }

    #[test]
    fn consumer_blocks_until_producer_occupies() {
        let h: Handover<i32> = Handover::new(running_flag());
        let h2 = h.clone();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            match h2.wait_for_available() {
                Wait::Ready(guard) => guard.occupy(7),
                Wait::ShuttingDown => panic!("should not shut down"),
            }
        });
        match h.wait_for_occupied() {
            Wait::Ready(guard) => assert_eq!(guard.take(), 7),
            Wait::ShuttingDown => panic!("should not shut down"),
        }
        producer.join().unwrap();
    }

    #[test]
    fn stop_wakes_blocked_waiter() {
        let running = running_flag();
        let h: Handover<i32> = Handover::new(Arc::clone(&running));
        let h2 = h.clone();
        let running2 = Arc::clone(&running);
        let waiter = thread::spawn(move || {
            matches!(h2.wait_for_occupied(), Wait::ShuttingDown)
        });
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);
        h.stop();
        assert!(waiter.join().unwrap());
        let _ = running2;
    }

    #[test]
    fn publish_overwrites_without_requiring_empty() {
        let h: Handover<i32> = Handover::new(running_flag());
        h.publish(1);
        h.publish(2);
        match h.wait_for_occupied() {
            Wait::Ready(guard) => assert_eq!(*guard.peek(), 2),
            Wait::ShuttingDown => panic!("should not shut down"),
        }
        assert!(h.is_occupied());
    }

    #[test]
    fn is_occupied_reflects_state_without_consuming() {
        let h: Handover<i32> = Handover::new(running_flag());
        assert!(!h.is_occupied());
        match h.wait_for_available() {
            Wait::Ready(guard) => guard.occupy(1),
            Wait::ShuttingDown => panic!("should not shut down"),
        }
        assert!(h.is_occupied());
    }
}
