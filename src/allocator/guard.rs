//! Locks around the allocator's shared state.
//!
//! Only the page bitset, the union-object free list and the page counters are shared between
//! page managers. Every access to them goes through [`AllocatorGuard::guard`]. Bump
//! allocation inside pages a page manager already owns never takes the guard.

use std::cell::Cell;
use std::marker::PhantomData;

/// A lock supplied by whoever creates the allocator.
pub trait AllocatorGuard {
    /// Run `f` while holding the lock.
    fn guard<R>(&self, f: impl FnOnce() -> R) -> R;
}

/// No locking. An allocator with this guard can only be used from one thread, which the
/// type system enforces: `NullGuard` is not `Sync`.
#[derive(Default)]
pub struct NullGuard {
    _not_sync: PhantomData<Cell<()>>,
}

impl NullGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocatorGuard for NullGuard {
    fn guard<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

/// A spin lock. The critical sections are short (a bitset scan and a few pointer updates).
#[derive(Default)]
pub struct SpinGuard {
    lock: spin::Mutex<()>,
}

impl SpinGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocatorGuard for SpinGuard {
    fn guard<R>(&self, f: impl FnOnce() -> R) -> R {
        let _lock = self.lock.lock();
        f()
    }
}
