//! Dispatch router — fired recognizer → reporters.
//!
//! Every recognizer the registry builds is bound to the router. Only the
//! initiating edge of a gesture (`Began`) dispatches; later phases of the
//! same gesture are ignored. Each distinct reporter associated with the
//! fired recognizer is composed once, in registration order.
//!
//! Nothing here fails observably. A fire can race an unregister, so an
//! unknown recognizer is an ordinary empty result.

use std::sync::Weak;

use super::AssociationRegistry;
use crate::trigger::{FireSink, Phase, RecognizerHandle};

/// Routes recognizer fires to their reporters.
pub struct DispatchRouter {
    registry: Weak<AssociationRegistry>,
}

impl DispatchRouter {
    pub(super) fn new(registry: Weak<AssociationRegistry>) -> Self {
        Self { registry }
    }

    /// Dispatch one phase transition. Returns how many reporters were
    /// composed.
    pub fn route(&self, recognizer: &RecognizerHandle, phase: Phase) -> usize {
        if phase != Phase::Began {
            tracing::trace!(recognizer = %recognizer.id(), %phase, "not an initiating phase");
            return 0;
        }

        let Some(registry) = self.registry.upgrade() else {
            tracing::debug!(recognizer = %recognizer.id(), "registry gone, dropping fire");
            return 0;
        };

        if !registry.ui.is_current() {
            tracing::warn!(recognizer = %recognizer.id(), "fire delivered off the UI thread, dropping");
            return 0;
        }

        // Snapshot first: reporters may unregister while composing.
        let reporters = registry.associations_for_recognizer(recognizer);
        if reporters.is_empty() {
            tracing::debug!(recognizer = %recognizer.id(), "no reporters for fired recognizer");
            return 0;
        }

        for reporter in &reporters {
            tracing::info!(
                reporter = %reporter.id(),
                recognizer = %recognizer.id(),
                trigger = %recognizer.spec(),
                "composing bug report"
            );
            reporter.compose_bug_report();
        }
        reporters.len()
    }
}

impl FireSink for DispatchRouter {
    fn on_recognizer_fired(&self, handle: &RecognizerHandle, phase: Phase) {
        self.route(handle, phase);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::registry::test_support::reporter;
    use crate::reporter::{BugReporter, ReporterRef};
    use crate::shell::sim::SimulatedShell;
    use crate::trigger::TriggerSpec;

    fn setup() -> (Arc<SimulatedShell>, Arc<AssociationRegistry>) {
        let shell = Arc::new(SimulatedShell::new());
        let registry = AssociationRegistry::new(shell.clone());
        (shell, registry)
    }

    #[test]
    fn shared_recognizer_fans_out_once_per_reporter() {
        let (shell, registry) = setup();
        shell.focus(shell.add_surface());
        let (c1, r1) = reporter(1);
        let (c2, r2) = reporter(1);

        let h = registry.build_recognizer(TriggerSpec::two_finger_long_press()).unwrap();
        registry.register_shared(&r1, &h).unwrap();
        registry.register_shared(&r2, &h).unwrap();

        assert!(h.advance(Phase::Began));
        assert_eq!((c1.composed(), c2.composed()), (1, 1));

        assert!(h.advance(Phase::Changed));
        assert_eq!((c1.composed(), c2.composed()), (1, 1));
    }

    #[test]
    fn only_began_dispatches() {
        let (_shell, registry) = setup();
        let (c, r) = reporter(1);
        let h = registry.register_default(&r).unwrap();

        for phase in [Phase::Idle, Phase::Changed, Phase::Ended, Phase::Cancelled, Phase::Failed] {
            assert_eq!(registry.router.route(&h, phase), 0);
        }
        assert_eq!(c.composed(), 0);
        assert_eq!(registry.router.route(&h, Phase::Began), 1);
        assert_eq!(c.composed(), 1);
    }

    #[test]
    fn unrelated_recognizer_does_not_fire() {
        let (_shell, registry) = setup();
        let (ca, a) = reporter(1);
        let (cb, b) = reporter(1);
        let ha = registry.register_default(&a).unwrap();
        registry.register(&b, TriggerSpec::Tap { touches: 1, taps: 2 }).unwrap();

        ha.advance(Phase::Began);
        assert_eq!((ca.composed(), cb.composed()), (1, 0));
    }

    #[test]
    fn unregistered_reporter_is_not_composed() {
        let (shell, registry) = setup();
        let w = shell.add_surface();
        shell.focus(w);
        let (c, r) = reporter(1);
        let h = registry.register_default(&r).unwrap();
        registry.unregister(&r).unwrap();

        assert_eq!(registry.router.route(&h, Phase::Began), 0);
        assert_eq!(shell.perform(w, Phase::Began), 0);
        assert_eq!(c.composed(), 0);
    }

    #[test]
    fn repeated_gestures_dispatch_each_time() {
        let (shell, registry) = setup();
        let w = shell.add_surface();
        shell.focus(w);
        let (c, r) = reporter(1);
        registry.register_default(&r).unwrap();

        for _ in 0..3 {
            shell.perform(w, Phase::Began);
            shell.perform(w, Phase::Ended);
        }
        assert_eq!(c.composed(), 3);
    }

    #[test]
    fn off_thread_fire_is_dropped() {
        let (_shell, registry) = setup();
        let (c, r) = reporter(1);
        let h = registry.register_default(&r).unwrap();

        let fired = std::thread::spawn(move || h.advance(Phase::Began))
            .join()
            .unwrap();

        assert!(fired);
        assert_eq!(c.composed(), 0);
    }

    #[test]
    fn gesture_follows_focus_to_second_window() {
        let (shell, registry) = setup();
        let w1 = shell.add_surface();
        let w2 = shell.add_surface();
        shell.focus(w1);
        let (a_count, a) = reporter(2);

        let h1 = registry.register_default(&a).unwrap();
        assert!(h1.is_attached_to(w1));

        shell.focus(w2);
        assert!(h1.is_attached_to(w2));
        assert_eq!(shell.perform(w1, Phase::Began), 0);

        assert_eq!(shell.perform(w2, Phase::Began), 1);
        assert_eq!(a_count.composed(), 1);
        shell.perform(w2, Phase::Ended);

        registry.unregister(&a).unwrap();
        shell.perform(w2, Phase::Began);
        assert_eq!(a_count.composed(), 1);
    }

    /// Unregisters itself from inside compose.
    struct SelfRemoving {
        registry: Arc<AssociationRegistry>,
        me: Mutex<Option<ReporterRef>>,
        composed: Mutex<usize>,
    }

    impl BugReporter for SelfRemoving {
        fn log_store_count(&self) -> usize {
            1
        }

        fn compose_bug_report(&self) {
            *self.composed.lock().unwrap() += 1;
            if let Some(me) = self.me.lock().unwrap().take() {
                self.registry.unregister(&me).unwrap();
            }
        }
    }

    #[test]
    fn reporter_can_unregister_while_composing() {
        let (shell, registry) = setup();
        let w = shell.add_surface();
        shell.focus(w);

        let inner = Arc::new(SelfRemoving {
            registry: Arc::clone(&registry),
            me: Mutex::new(None),
            composed: Mutex::new(0),
        });
        let me = ReporterRef::from_arc(inner.clone());
        *inner.me.lock().unwrap() = Some(me.clone());
        let (other_count, other) = reporter(1);

        let h = registry.build_recognizer(TriggerSpec::two_finger_long_press()).unwrap();
        registry.register_shared(&me, &h).unwrap();
        registry.register_shared(&other, &h).unwrap();

        shell.perform(w, Phase::Began);
        assert_eq!(*inner.composed.lock().unwrap(), 1);
        assert_eq!(other_count.composed(), 1);
        assert!(!registry.contains(&me));

        shell.perform(w, Phase::Ended);
        shell.perform(w, Phase::Began);
        assert_eq!(*inner.composed.lock().unwrap(), 1);
        assert_eq!(other_count.composed(), 2);
    }
}
