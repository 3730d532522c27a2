//! In-memory host shell.
//!
//! Surfaces are numbered, focus moves are driven by the caller, and every
//! attach/detach is recorded in a journal. [`SimulatedShell::perform`]
//! plays a gesture phase on whatever is attached to a surface, the way a
//! platform would deliver touch input.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{FocusObserver, ShellError, SurfaceId, WindowShell};
use crate::trigger::{GestureKind, InvalidTrigger, Phase, RecognizerHandle, RecognizerId, TriggerSpec};

/// One recorded shell operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOp {
    Attach {
        recognizer: RecognizerId,
        surface: SurfaceId,
    },
    Detach {
        recognizer: RecognizerId,
        surface: SurfaceId,
    },
}

#[derive(Default)]
struct SimState {
    next_surface: u64,
    attached: BTreeMap<SurfaceId, Vec<RecognizerHandle>>,
    focused: Option<SurfaceId>,
    journal: Vec<ShellOp>,
    subscriptions: usize,
    unsupported: HashSet<GestureKind>,
}

/// Simulated windowing shell.
#[derive(Default)]
pub struct SimulatedShell {
    state: Mutex<SimState>,
    observers: Mutex<Vec<Arc<dyn FocusObserver>>>,
}

impl SimulatedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to produce recognizers of `kind`.
    pub fn without_kind(self, kind: GestureKind) -> Self {
        self.state().unsupported.insert(kind);
        self
    }

    /// Create a new, unfocused surface.
    pub fn add_surface(&self) -> SurfaceId {
        let mut state = self.state();
        state.next_surface += 1;
        let id = SurfaceId::new(state.next_surface);
        state.attached.insert(id, Vec::new());
        id
    }

    /// Move focus to `surface`: focus-lost for the previous surface, then
    /// focus-gained for the new one.
    pub fn focus(&self, surface: SurfaceId) {
        let previous = {
            let mut state = self.state();
            if state.focused == Some(surface) {
                return;
            }
            state.focused.replace(surface)
        };

        if let Some(previous) = previous {
            self.emit_lost(previous);
        }
        self.emit_gained(surface);
    }

    /// Drop focus without giving it to another surface.
    pub fn blur(&self) {
        let previous = self.state().focused.take();
        if let Some(previous) = previous {
            self.emit_lost(previous);
        }
    }

    /// Deliver `phase` to every recognizer attached to `surface`.
    ///
    /// Returns how many recognizers accepted the transition.
    pub fn perform(&self, surface: SurfaceId, phase: Phase) -> usize {
        let targets: Vec<RecognizerHandle> = self
            .state()
            .attached
            .get(&surface)
            .cloned()
            .unwrap_or_default();

        targets.iter().filter(|h| h.advance(phase)).count()
    }

    /// Recognizers currently attached to `surface`, in attach order.
    pub fn attached(&self, surface: SurfaceId) -> Vec<RecognizerId> {
        self.state()
            .attached
            .get(&surface)
            .map(|hs| hs.iter().map(RecognizerHandle::id).collect())
            .unwrap_or_default()
    }

    pub fn journal(&self) -> Vec<ShellOp> {
        self.state().journal.clone()
    }

    /// Number of focus subscriptions installed so far.
    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions
    }

    fn emit_gained(&self, surface: SurfaceId) {
        for observer in self.observers_snapshot() {
            observer.on_focus_gained(surface);
        }
    }

    fn emit_lost(&self, surface: SurfaceId) {
        for observer in self.observers_snapshot() {
            observer.on_focus_lost(surface);
        }
    }

    // Observers call back into attach/detach, so they run unlocked.
    fn observers_snapshot(&self) -> Vec<Arc<dyn FocusObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WindowShell for SimulatedShell {
    fn focused_surface(&self) -> Option<SurfaceId> {
        self.state().focused
    }

    fn check_trigger(&self, spec: &TriggerSpec) -> Result<(), InvalidTrigger> {
        if self.state().unsupported.contains(&spec.kind()) {
            return Err(InvalidTrigger::new(
                spec.to_string(),
                format!("{} recognizers are not available on this host", spec.kind()),
            ));
        }
        Ok(())
    }

    fn attach(&self, recognizer: &RecognizerHandle, surface: SurfaceId) -> Result<(), ShellError> {
        let mut state = self.state();
        let attached = state
            .attached
            .get_mut(&surface)
            .ok_or(ShellError::UnknownSurface(surface))?;
        if !attached.contains(recognizer) {
            attached.push(recognizer.clone());
        }
        state.journal.push(ShellOp::Attach {
            recognizer: recognizer.id(),
            surface,
        });
        Ok(())
    }

    fn detach(&self, recognizer: &RecognizerHandle, surface: SurfaceId) {
        let mut state = self.state();
        if let Some(attached) = state.attached.get_mut(&surface) {
            attached.retain(|h| h != recognizer);
        }
        state.journal.push(ShellOp::Detach {
            recognizer: recognizer.id(),
            surface,
        });
    }

    fn subscribe_focus(&self, observer: Arc<dyn FocusObserver>) {
        self.state().subscriptions += 1;
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FocusLog(Mutex<Vec<String>>);

    impl FocusObserver for FocusLog {
        fn on_focus_gained(&self, surface: SurfaceId) {
            self.0.lock().unwrap().push(format!("gained {}", surface.raw()));
        }

        fn on_focus_lost(&self, surface: SurfaceId) {
            self.0.lock().unwrap().push(format!("lost {}", surface.raw()));
        }
    }

    #[test]
    fn surfaces_are_numbered_from_one() {
        let shell = SimulatedShell::new();
        assert_eq!(shell.add_surface(), SurfaceId::new(1));
        assert_eq!(shell.add_surface(), SurfaceId::new(2));
        assert_eq!(shell.focused_surface(), None);
    }

    #[test]
    fn focus_move_emits_lost_then_gained() {
        let shell = SimulatedShell::new();
        let log = Arc::new(FocusLog::default());
        shell.subscribe_focus(log.clone());

        let w1 = shell.add_surface();
        let w2 = shell.add_surface();
        shell.focus(w1);
        shell.focus(w1);
        shell.focus(w2);
        shell.blur();

        assert_eq!(
            *log.0.lock().unwrap(),
            vec!["gained 1", "lost 1", "gained 2", "lost 2"]
        );
        assert_eq!(shell.focused_surface(), None);
        assert_eq!(shell.subscription_count(), 1);
    }

    #[test]
    fn unsupported_kind_is_reported() {
        let shell = SimulatedShell::new().without_kind(GestureKind::KeyChord);
        assert!(shell.check_trigger(&TriggerSpec::two_finger_long_press()).is_ok());
        let err = shell
            .check_trigger(&TriggerSpec::key_chord("Super+B"))
            .unwrap_err();
        assert!(err.reason.contains("not available"));
    }
}
