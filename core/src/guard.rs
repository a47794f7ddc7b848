//! Same-thread reentrancy guard.
//!
//! Not a mutex. There is one logical thread; the guard only records that a
//! job is inside its own dispatch so that reentrant Subscribe/Unsubscribe
//! calls are deferred instead of mutating the list being walked.

use std::cell::Cell;

#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    held: Cell<bool>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire iff free. Returns whether the caller now holds the guard.
    pub fn try_lock(&self) -> bool {
        !self.held.replace(true)
    }

    /// Acquire unconditionally. Dropping the token restores whatever state
    /// the guard had before, so a nested `lock` never reopens an outer hold.
    pub fn lock(&self) -> GuardToken<'_> {
        let was_held = self.held.replace(true);
        GuardToken { guard: self, was_held }
    }

    /// `try_lock` returning a scoped token.
    pub fn try_acquire(&self) -> Option<GuardToken<'_>> {
        self.try_lock().then(|| GuardToken { guard: self, was_held: false })
    }

    pub fn unlock(&self) {
        self.held.set(false);
    }

    pub fn is_locked(&self) -> bool {
        self.held.get()
    }
}

#[must_use = "the guard is released as soon as the token is dropped"]
pub struct GuardToken<'a> {
    guard:    &'a ReentrancyGuard,
    was_held: bool,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.held.set(self.was_held);
    }
}
