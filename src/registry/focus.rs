//! Focus tracker — keeps recognizers on the focused surface.
//!
//! Installed with the shell the first time a reporter registers and never
//! removed. Focus-gained moves every recognizer onto the new surface;
//! focus-lost takes them off the old one. Recognizers are moved, not
//! rebuilt, so a recognizer keeps its identity across focus changes.
//!
//! Lost and gained arrive as separate host events. Between them nothing
//! is attached anywhere, which is fine: no surface has input.

use std::sync::Weak;

use super::AssociationRegistry;
use crate::shell::{FocusObserver, SurfaceId};

/// Tracker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPhase {
    /// No surface focused; every recognizer is detached.
    Idle,
    /// Every recognizer is attached to this surface.
    Focused(SurfaceId),
}

/// Focus observer that re-parents the registry's recognizers.
pub struct FocusTracker {
    registry: Weak<AssociationRegistry>,
}

impl FocusTracker {
    pub(super) fn new(registry: Weak<AssociationRegistry>) -> Self {
        Self { registry }
    }

    fn registry(&self, event: &'static str) -> Option<std::sync::Arc<AssociationRegistry>> {
        let registry = self.registry.upgrade()?;
        if !registry.ui.is_current() {
            tracing::warn!(event, "focus event delivered off the UI thread, ignoring");
            return None;
        }
        Some(registry)
    }
}

impl FocusObserver for FocusTracker {
    fn on_focus_gained(&self, surface: SurfaceId) {
        let Some(registry) = self.registry("focus_gained") else {
            return;
        };

        let handles = registry.all_handles();
        for handle in &handles {
            registry.attach(handle, surface);
        }
        registry.set_focused(Some(surface));

        tracing::debug!(%surface, recognizers = handles.len(), "focus gained");
    }

    fn on_focus_lost(&self, surface: SurfaceId) {
        let Some(registry) = self.registry("focus_lost") else {
            return;
        };

        let mut detached = 0usize;
        for handle in registry.all_handles() {
            if handle.is_attached_to(surface) {
                registry.detach(&handle);
                detached += 1;
            }
        }
        registry.clear_focus_if(surface);

        tracing::debug!(%surface, detached, "focus lost");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registry::test_support::reporter;
    use crate::shell::WindowShell;
    use crate::shell::sim::{ShellOp, SimulatedShell};
    use crate::trigger::TriggerSpec;

    fn setup() -> (Arc<SimulatedShell>, Arc<AssociationRegistry>) {
        let shell = Arc::new(SimulatedShell::new());
        let registry = AssociationRegistry::new(shell.clone());
        (shell, registry)
    }

    #[test]
    fn lost_then_gained_moves_without_recreating() {
        let (shell, registry) = setup();
        let s1 = shell.add_surface();
        let s2 = shell.add_surface();
        shell.focus(s1);
        let (_, r) = reporter(1);
        let h = registry.register_default(&r).unwrap();

        shell.blur();
        assert_eq!(h.attached_surface(), None);
        assert_eq!(registry.focus_phase(), FocusPhase::Idle);

        shell.focus(s2);
        assert!(h.is_attached_to(s2));
        assert_eq!(registry.focus_phase(), FocusPhase::Focused(s2));
        assert_eq!(
            shell.journal(),
            vec![
                ShellOp::Attach { recognizer: h.id(), surface: s1 },
                ShellOp::Detach { recognizer: h.id(), surface: s1 },
                ShellOp::Attach { recognizer: h.id(), surface: s2 },
            ]
        );
    }

    #[test]
    fn gained_detaches_from_stale_surface_first() {
        let (shell, registry) = setup();
        let s1 = shell.add_surface();
        let s2 = shell.add_surface();
        shell.focus(s1);
        let (_, r) = reporter(1);
        let h = registry.register_default(&r).unwrap();

        // Gained without a preceding lost for s1.
        registry.tracker.on_focus_gained(s2);

        assert!(h.is_attached_to(s2));
        assert!(shell.attached(s1).is_empty());
        assert_eq!(shell.attached(s2), vec![h.id()]);
    }

    #[test]
    fn lost_for_other_surface_leaves_attachment() {
        let (shell, registry) = setup();
        let s1 = shell.add_surface();
        let s2 = shell.add_surface();
        shell.focus(s1);
        let (_, r) = reporter(1);
        let h = registry.register_default(&r).unwrap();

        registry.tracker.on_focus_lost(s2);

        assert!(h.is_attached_to(s1));
        assert_eq!(registry.focus_phase(), FocusPhase::Focused(s1));
    }

    #[test]
    fn every_distinct_handle_follows_focus() {
        let (shell, registry) = setup();
        let s1 = shell.add_surface();
        let s2 = shell.add_surface();
        shell.focus(s1);
        let (_, a) = reporter(1);
        let (_, b) = reporter(2);
        let (_, c) = reporter(3);
        let ha = registry.register_default(&a).unwrap();
        let shared = registry
            .build_recognizer(TriggerSpec::Tap { touches: 2, taps: 2 })
            .unwrap();
        registry.register_shared(&b, &shared).unwrap();
        registry.register_shared(&c, &shared).unwrap();

        shell.focus(s2);

        assert_eq!(shell.attached(s2), vec![ha.id(), shared.id()]);
        assert!(shell.attached(s1).is_empty());
        assert_eq!(shell.focused_surface(), Some(s2));
    }

    #[test]
    fn events_after_registry_dropped_are_ignored() {
        let shell = Arc::new(SimulatedShell::new());
        let s1 = shell.add_surface();
        let registry = AssociationRegistry::new(shell.clone());
        let (_, r) = reporter(1);
        registry.register_default(&r).unwrap();
        drop(registry);

        shell.focus(s1);
        assert!(shell.attached(s1).is_empty());
    }

    #[test]
    fn off_thread_focus_event_is_ignored() {
        let (shell, registry) = setup();
        let s1 = shell.add_surface();
        let (_, r) = reporter(1);
        let h = registry.register_default(&r).unwrap();

        let tracker = Arc::clone(&registry.tracker);
        std::thread::spawn(move || tracker.on_focus_gained(s1))
            .join()
            .unwrap();

        assert_eq!(h.attached_surface(), None);
    }
}
