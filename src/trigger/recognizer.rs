//! Running recognizer instances.
//!
//! A [`RecognizerHandle`] is created once per registration and lives until
//! the last association using it goes away. Focus changes move it between
//! surfaces; they never rebuild it. The host drives its phase with
//! [`RecognizerHandle::advance`] and every accepted transition is handed to
//! the [`FireSink`] bound at creation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::TriggerSpec;
use crate::shell::SurfaceId;

/// Identity token for a recognizer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecognizerId(u64);

impl RecognizerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecognizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recognizer-{}", self.0)
    }
}

/// Gesture recognizer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Began,
    Changed,
    Ended,
    Cancelled,
    Failed,
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Phase::Ended | Phase::Cancelled | Phase::Failed)
    }

    /// Whether a recognizer in `self` may move to `next`.
    ///
    /// Discrete gestures go straight from `Idle` to `Ended`; continuous
    /// ones pass through `Began`. A terminal phase starts over.
    pub fn can_advance_to(self, next: Phase) -> bool {
        match self {
            Phase::Idle => matches!(next, Phase::Began | Phase::Ended | Phase::Failed),
            Phase::Began | Phase::Changed => {
                matches!(next, Phase::Changed | Phase::Ended | Phase::Cancelled)
            }
            _ if self.is_terminal() => {
                matches!(next, Phase::Idle | Phase::Began | Phase::Ended | Phase::Failed)
            }
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Began => "began",
            Phase::Changed => "changed",
            Phase::Ended => "ended",
            Phase::Cancelled => "cancelled",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Receives phase transitions of the recognizers bound to it.
pub trait FireSink: Send + Sync {
    fn on_recognizer_fired(&self, handle: &RecognizerHandle, phase: Phase);
}

#[derive(Debug)]
struct RecognizerState {
    phase: Phase,
    attached: Option<SurfaceId>,
}

struct Recognizer {
    id: RecognizerId,
    spec: TriggerSpec,
    fire: Arc<dyn FireSink>,
    state: Mutex<RecognizerState>,
}

/// Shared handle to a running recognizer. Clones are the same instance.
#[derive(Clone)]
pub struct RecognizerHandle {
    inner: Arc<Recognizer>,
}

impl RecognizerHandle {
    pub(crate) fn new(spec: TriggerSpec, fire: Arc<dyn FireSink>) -> Self {
        Self {
            inner: Arc::new(Recognizer {
                id: RecognizerId::next(),
                spec,
                fire,
                state: Mutex::new(RecognizerState {
                    phase: Phase::Idle,
                    attached: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> RecognizerId {
        self.inner.id
    }

    pub fn spec(&self) -> &TriggerSpec {
        &self.inner.spec
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// The surface this recognizer is currently added to.
    pub fn attached_surface(&self) -> Option<SurfaceId> {
        self.state().attached
    }

    pub fn is_attached_to(&self, surface: SurfaceId) -> bool {
        self.attached_surface() == Some(surface)
    }

    /// Whether transitions are delivered to `sink`.
    pub(crate) fn fires_into<S: FireSink>(&self, sink: &Arc<S>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner.fire), Arc::as_ptr(sink))
    }

    pub(crate) fn set_attached(&self, surface: Option<SurfaceId>) {
        self.state().attached = surface;
    }

    /// Move to `next` and deliver the transition to the fire sink.
    ///
    /// Returns `false` (and delivers nothing) when the transition is not
    /// allowed from the current phase.
    pub fn advance(&self, next: Phase) -> bool {
        {
            let mut state = self.state();
            if !state.phase.can_advance_to(next) {
                tracing::debug!(
                    recognizer = %self.inner.id,
                    from = %state.phase,
                    to = %next,
                    "ignoring phase transition"
                );
                return false;
            }
            state.phase = next;
        }

        // Sink runs without the state lock; it may read this handle.
        self.inner.fire.on_recognizer_fired(self, next);
        true
    }

    fn state(&self) -> MutexGuard<'_, RecognizerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartialEq for RecognizerHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for RecognizerHandle {}

impl fmt::Debug for RecognizerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("RecognizerHandle")
            .field("id", &self.inner.id)
            .field("spec", &self.inner.spec)
            .field("phase", &state.phase)
            .field("attached", &state.attached)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording(Mutex<Vec<(RecognizerId, Phase)>>);

    impl FireSink for Recording {
        fn on_recognizer_fired(&self, handle: &RecognizerHandle, phase: Phase) {
            self.0.lock().unwrap().push((handle.id(), phase));
        }
    }

    fn handle() -> (RecognizerHandle, Arc<Recording>) {
        let sink = Arc::new(Recording::default());
        let h = RecognizerHandle::new(TriggerSpec::two_finger_long_press(), sink.clone());
        (h, sink)
    }

    #[test]
    fn starts_idle_and_detached() {
        let (h, _) = handle();
        assert_eq!(h.phase(), Phase::Idle);
        assert_eq!(h.attached_surface(), None);
    }

    #[test]
    fn continuous_gesture_delivers_every_phase() {
        let (h, sink) = handle();
        assert!(h.advance(Phase::Began));
        assert!(h.advance(Phase::Changed));
        assert!(h.advance(Phase::Changed));
        assert!(h.advance(Phase::Ended));

        let phases: Vec<Phase> = sink.0.lock().unwrap().iter().map(|(_, p)| *p).collect();
        assert_eq!(
            phases,
            vec![Phase::Began, Phase::Changed, Phase::Changed, Phase::Ended]
        );
        assert_eq!(h.phase(), Phase::Ended);
    }

    #[test]
    fn knows_which_sink_it_fires_into() {
        let (h, sink) = handle();
        let other = Arc::new(Recording::default());
        assert!(h.fires_into(&sink));
        assert!(!h.fires_into(&other));
    }

    #[test]
    fn illegal_transition_is_not_delivered() {
        let (h, sink) = handle();
        assert!(!h.advance(Phase::Changed));
        assert!(!h.advance(Phase::Cancelled));
        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(h.phase(), Phase::Idle);
    }

    #[test]
    fn terminal_phase_starts_a_new_gesture() {
        let (h, sink) = handle();
        h.advance(Phase::Began);
        h.advance(Phase::Cancelled);
        assert!(h.advance(Phase::Began));
        assert_eq!(sink.0.lock().unwrap().len(), 3);
    }

    #[test]
    fn clones_are_the_same_instance() {
        let (a, _) = handle();
        let (b, _) = handle();
        let a2 = a.clone();
        assert_eq!(a, a2);
        assert_ne!(a, b);
        a.set_attached(Some(SurfaceId::new(7)));
        assert!(a2.is_attached_to(SurfaceId::new(7)));
    }
}
