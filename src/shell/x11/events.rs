//! X11 event plumbing — reader thread and autorepeat collapsing.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::shell::ShellError;
use crate::trigger::{Phase, RecognizerId};

/// Spawn a thread that reads X11 events and forwards them to the UI thread.
///
/// Polls the connection fd with a 100ms timeout so the `stop` flag is
/// seen promptly. The thread only reads; every event is handled by the
/// receiver on the UI thread.
pub fn spawn_event_thread(
    conn: Arc<RustConnection>,
    stop: Arc<AtomicBool>,
) -> Result<(tokio::sync::mpsc::UnboundedReceiver<Event>, JoinHandle<()>), ShellError> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let handle = std::thread::Builder::new()
        .name("x11-events".into())
        .spawn(move || {
            let raw_fd = conn.stream().as_raw_fd();

            while !stop.load(Ordering::Relaxed) {
                // SAFETY: raw_fd is the X11 connection fd, valid while conn is alive.
                let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
                let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];

                match poll(&mut fds, PollTimeout::from(100u16)) {
                    Ok(0) => continue,
                    Ok(_) => loop {
                        match conn.poll_for_event() {
                            Ok(Some(event)) => {
                                if tx.send(event).is_err() {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "X11 connection error");
                                return;
                            }
                        }
                    },
                    Err(nix::Error::EINTR) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "poll error on X11 fd");
                        return;
                    }
                }
            }
        })
        .map_err(|e| ShellError::X11(format!("spawn event thread: {e}")))?;

    Ok((rx, handle))
}

/// Collapses X autorepeat into one continuous gesture.
///
/// Holding a key makes the server send release/press pairs carrying the
/// same timestamp. The event thread forwards them one by one, so a pair
/// can be split across two [`drain`](Self::drain) passes. A release is
/// therefore held back for one full pass; only a release still unmatched
/// on the following pass is reported. A press that matches a held release
/// turns into `Changed` instead of a new `Began`.
#[derive(Debug, Default)]
pub struct RepeatFilter {
    held: Vec<HeldRelease>,
}

#[derive(Debug)]
struct HeldRelease {
    id: RecognizerId,
    time: u32,
    /// Survived one drain pass.
    aged: bool,
}

impl RepeatFilter {
    /// Phase for a key press, given the recognizer's current phase.
    pub fn press(&mut self, id: RecognizerId, time: u32, current: Phase) -> Phase {
        if let Some(pos) = self.held.iter().position(|h| h.id == id && h.time == time) {
            self.held.remove(pos);
            return Phase::Changed;
        }
        match current {
            Phase::Began | Phase::Changed => Phase::Changed,
            _ => Phase::Began,
        }
    }

    pub fn release(&mut self, id: RecognizerId, time: u32) {
        self.held.retain(|h| h.id != id);
        self.held.push(HeldRelease {
            id,
            time,
            aged: false,
        });
    }

    /// Releases left unmatched since the previous pass.
    pub fn drain(&mut self) -> Vec<RecognizerId> {
        let mut ended = Vec::new();
        self.held.retain_mut(|h| {
            if h.aged {
                ended.push(h.id);
                false
            } else {
                h.aged = true;
                true
            }
        });
        ended
    }

    /// Whether a release is waiting for another pass.
    pub fn is_pending(&self) -> bool {
        !self.held.is_empty()
    }

    /// Forget a recognizer that is no longer grabbed.
    pub fn forget(&mut self, id: RecognizerId) {
        self.held.retain(|h| h.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{FireSink, RecognizerHandle, TriggerSpec};

    struct Nop;

    impl FireSink for Nop {
        fn on_recognizer_fired(&self, _: &RecognizerHandle, _: Phase) {}
    }

    fn id() -> RecognizerId {
        RecognizerHandle::new(TriggerSpec::key_chord("Super+B"), Arc::new(Nop)).id()
    }

    #[test]
    fn first_press_begins() {
        let mut f = RepeatFilter::default();
        assert_eq!(f.press(id(), 10, Phase::Idle), Phase::Began);
        assert_eq!(f.press(id(), 10, Phase::Ended), Phase::Began);
    }

    #[test]
    fn repeat_pair_becomes_changed() {
        let mut f = RepeatFilter::default();
        let r = id();
        f.release(r, 500);
        assert_eq!(f.press(r, 500, Phase::Began), Phase::Changed);
        assert!(f.drain().is_empty());
        assert!(!f.is_pending());
    }

    #[test]
    fn repeat_pair_split_across_passes_stays_one_gesture() {
        let mut f = RepeatFilter::default();
        let r = id();
        assert_eq!(f.press(r, 100, Phase::Idle), Phase::Began);

        f.release(r, 500);
        assert!(f.drain().is_empty());
        assert!(f.is_pending());

        assert_eq!(f.press(r, 500, Phase::Began), Phase::Changed);
        assert!(f.drain().is_empty());
        assert!(!f.is_pending());
    }

    #[test]
    fn real_release_drains_on_second_pass() {
        let mut f = RepeatFilter::default();
        let r = id();
        f.release(r, 500);
        assert!(f.drain().is_empty());
        assert_eq!(f.drain(), vec![r]);
        assert!(f.drain().is_empty());
    }

    #[test]
    fn later_press_after_release_begins_again() {
        let mut f = RepeatFilter::default();
        let r = id();
        f.release(r, 500);
        f.drain();
        assert_eq!(f.drain().len(), 1);
        assert_eq!(f.press(r, 900, Phase::Ended), Phase::Began);
    }

    #[test]
    fn forget_drops_held_release() {
        let mut f = RepeatFilter::default();
        let r = id();
        f.release(r, 1);
        f.forget(r);
        assert!(!f.is_pending());
        f.drain();
        assert!(f.drain().is_empty());
    }
}
