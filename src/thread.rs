//! UI thread affinity.
//!
//! Every mutating registry operation runs on the single thread that owns
//! the host's UI. [`UiThread`] remembers that thread and answers whether
//! the caller is on it.

use std::thread::{self, ThreadId};

/// The thread that owns the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiThread {
    id: ThreadId,
}

impl UiThread {
    /// Capture the calling thread as the UI thread.
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    /// Use an explicit thread as the UI thread.
    pub fn from_id(id: ThreadId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Whether the calling thread is the UI thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Check the calling thread, returning the caller's id on mismatch.
    pub fn check(&self) -> Result<(), ThreadId> {
        let caller = thread::current().id();
        if caller == self.id { Ok(()) } else { Err(caller) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_thread_passes() {
        let ui = UiThread::current();
        assert!(ui.is_current());
        assert!(ui.check().is_ok());
    }

    #[test]
    fn other_thread_fails_with_its_id() {
        let ui = UiThread::current();
        let (ok, caller) = std::thread::spawn(move || (ui.is_current(), ui.check()))
            .join()
            .unwrap();
        assert!(!ok);
        let caller = caller.unwrap_err();
        assert_ne!(caller, ui.id());
    }
}
