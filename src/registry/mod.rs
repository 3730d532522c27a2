//! Association registry — which reporter owns which trigger.
//!
//! Maps reporter identity to a running recognizer, keeps every recognizer
//! attached to the focused surface, and answers the dispatch router's
//! "who owns this recognizer" query.
//!
//! Architecture: the registry owns all association state. The
//! [`FocusTracker`] and [`DispatchRouter`] hold weak back-references and
//! run their work through the registry. Every mutating entry point first
//! checks that it is on the UI thread, so the state mutex is never
//! contended; it exists so the registry can be shared as `Arc`.
//!
//! Shell calls and reporter callbacks always run with the state lock
//! released. A reporter may unregister itself while composing.

mod dispatch;
mod focus;

pub use dispatch::DispatchRouter;
pub use focus::{FocusPhase, FocusTracker};

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::ThreadId;

use crate::reporter::{ReporterId, ReporterRef, WeakReporter};
use crate::shell::{SurfaceId, WindowShell};
use crate::thread::UiThread;
use crate::trigger::{InvalidTrigger, RecognizerHandle, TriggerSpec};

/// Registration errors. All are integration mistakes by the caller.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{operation} must be called on the UI thread (called from {caller:?}, UI thread is {ui:?})")]
    ThreadAffinityViolation {
        operation: &'static str,
        caller: ThreadId,
        ui: ThreadId,
    },
    #[error("{reporter} has no log store configured")]
    NoLogStoreConfigured { reporter: ReporterId },
    #[error("invalid trigger kind: {0}")]
    InvalidTriggerKind(#[from] InvalidTrigger),
}

/// One reporter bound to one recognizer.
struct Association {
    reporter: WeakReporter,
    recognizer: RecognizerHandle,
}

/// Focus bookkeeping.
#[derive(Debug, Default)]
struct FocusState {
    /// Focused surface as last reported by the shell.
    focused: Option<SurfaceId>,
    /// Whether the focus subscription has been installed. Never reset.
    initialized: bool,
}

#[derive(Default)]
struct RegistryState {
    /// Insertion-ordered, at most one entry per reporter id.
    associations: Vec<Association>,
    focus: FocusState,
}

static GLOBAL: OnceLock<Arc<AssociationRegistry>> = OnceLock::new();

/// Install the process-wide registry, or return the one already installed.
///
/// Must be called on the UI thread; that thread becomes the registry's UI
/// thread. The registry is never torn down. A `shell` passed after the
/// first call is ignored.
pub fn install_global(shell: Arc<dyn WindowShell>) -> Arc<AssociationRegistry> {
    let mut fresh = false;
    let registry = GLOBAL.get_or_init(|| {
        fresh = true;
        AssociationRegistry::new(shell)
    });
    if !fresh {
        tracing::debug!("global registry already installed, ignoring new shell");
    }
    Arc::clone(registry)
}

/// The process-wide registry, if installed.
pub fn global() -> Option<Arc<AssociationRegistry>> {
    GLOBAL.get().cloned()
}

/// Reporter → recognizer associations.
pub struct AssociationRegistry {
    ui: UiThread,
    shell: Arc<dyn WindowShell>,
    router: Arc<DispatchRouter>,
    tracker: Arc<FocusTracker>,
    state: Mutex<RegistryState>,
}

impl AssociationRegistry {
    /// Create a registry whose UI thread is the calling thread.
    pub fn new(shell: Arc<dyn WindowShell>) -> Arc<Self> {
        Self::with_ui_thread(shell, UiThread::current())
    }

    pub fn with_ui_thread(shell: Arc<dyn WindowShell>, ui: UiThread) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            ui,
            shell,
            router: Arc::new(DispatchRouter::new(weak.clone())),
            tracker: Arc::new(FocusTracker::new(weak.clone())),
            state: Mutex::new(RegistryState::default()),
        })
    }

    pub fn ui_thread(&self) -> UiThread {
        self.ui
    }

    /// Register `reporter` to be composed whenever a gesture matching
    /// `spec` begins on the focused surface.
    ///
    /// Replaces any previous association for the same reporter.
    ///
    /// # Errors
    ///
    /// Checked in order, with no effect on failure:
    /// `ThreadAffinityViolation` off the UI thread, `NoLogStoreConfigured`
    /// for a reporter without log stores, `InvalidTriggerKind` for a spec
    /// out of range or not producible by the shell.
    pub fn register(
        &self,
        reporter: &ReporterRef,
        spec: TriggerSpec,
    ) -> Result<RecognizerHandle, RegistryError> {
        self.check_thread("register")?;
        self.check_log_stores(reporter)?;
        self.check_trigger(&spec)?;

        let recognizer = RecognizerHandle::new(spec, self.router.clone());
        tracing::info!(
            reporter = %reporter.id(),
            recognizer = %recognizer.id(),
            trigger = %recognizer.spec(),
            "registering bug reporter"
        );
        self.associate(reporter, recognizer.clone());
        Ok(recognizer)
    }

    /// Register `reporter` with the two-finger long press.
    pub fn register_default(&self, reporter: &ReporterRef) -> Result<RecognizerHandle, RegistryError> {
        self.register(reporter, TriggerSpec::two_finger_long_press())
    }

    /// Create a recognizer bound to this registry without associating it.
    ///
    /// Hand the result to [`register_shared`](Self::register_shared) for
    /// each reporter that should fire on it.
    pub fn build_recognizer(&self, spec: TriggerSpec) -> Result<RecognizerHandle, RegistryError> {
        self.check_thread("build_recognizer")?;
        self.check_trigger(&spec)?;
        let recognizer = RecognizerHandle::new(spec, self.router.clone());
        tracing::debug!(recognizer = %recognizer.id(), trigger = %recognizer.spec(), "built recognizer");
        Ok(recognizer)
    }

    /// Associate `reporter` with an existing recognizer.
    ///
    /// Several reporters sharing one recognizer are each composed once when
    /// it fires. The recognizer must come from this registry's
    /// [`build_recognizer`](Self::build_recognizer) or
    /// [`register`](Self::register); one from another registry is refused
    /// with `InvalidTriggerKind`.
    pub fn register_shared(
        &self,
        reporter: &ReporterRef,
        recognizer: &RecognizerHandle,
    ) -> Result<(), RegistryError> {
        self.check_thread("register_shared")?;
        self.check_log_stores(reporter)?;
        if !recognizer.fires_into(&self.router) {
            tracing::warn!(
                reporter = %reporter.id(),
                recognizer = %recognizer.id(),
                "refusing recognizer built by another registry"
            );
            return Err(RegistryError::InvalidTriggerKind(InvalidTrigger::new(
                recognizer.spec().to_string(),
                "recognizer belongs to another registry",
            )));
        }

        tracing::info!(
            reporter = %reporter.id(),
            recognizer = %recognizer.id(),
            trigger = %recognizer.spec(),
            "registering bug reporter on shared recognizer"
        );
        self.associate(reporter, recognizer.clone());
        Ok(())
    }

    /// Remove `reporter`'s association, detaching its recognizer unless
    /// another reporter still uses it. No-op if not registered.
    pub fn unregister(&self, reporter: &ReporterRef) -> Result<(), RegistryError> {
        self.check_thread("unregister")?;

        let removed = {
            let mut state = self.state();
            let index = state
                .associations
                .iter()
                .position(|a| a.reporter.id() == reporter.id());
            index.map(|i| state.associations.remove(i).recognizer)
        };

        match removed {
            Some(recognizer) => {
                tracing::info!(
                    reporter = %reporter.id(),
                    recognizer = %recognizer.id(),
                    "unregistered bug reporter"
                );
                self.release(&recognizer);
            }
            None => tracing::debug!(reporter = %reporter.id(), "unregister: not registered"),
        }
        self.prune_dropped();
        Ok(())
    }

    /// Distinct live reporters associated with `recognizer`, in
    /// registration order.
    pub fn associations_for_recognizer(&self, recognizer: &RecognizerHandle) -> Vec<ReporterRef> {
        let state = self.state();
        let mut seen = HashSet::new();
        state
            .associations
            .iter()
            .filter(|a| &a.recognizer == recognizer)
            .filter(|a| seen.insert(a.reporter.id()))
            .filter_map(|a| a.reporter.upgrade())
            .collect()
    }

    /// Every associated recognizer, each listed once, in registration order.
    pub fn all_handles(&self) -> Vec<RecognizerHandle> {
        let state = self.state();
        let mut handles: Vec<RecognizerHandle> = Vec::with_capacity(state.associations.len());
        for association in &state.associations {
            if !handles.contains(&association.recognizer) {
                handles.push(association.recognizer.clone());
            }
        }
        handles
    }

    /// The recognizer currently associated with `reporter`.
    pub fn recognizer_for(&self, reporter: &ReporterRef) -> Option<RecognizerHandle> {
        self.state()
            .associations
            .iter()
            .find(|a| a.reporter.id() == reporter.id())
            .map(|a| a.recognizer.clone())
    }

    pub fn contains(&self, reporter: &ReporterRef) -> bool {
        self.recognizer_for(reporter).is_some()
    }

    /// Number of associations (including ones whose reporter has been
    /// dropped but not yet pruned).
    pub fn len(&self) -> usize {
        self.state().associations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().associations.is_empty()
    }

    /// Whether the focus subscription has been installed.
    pub fn is_observing_focus(&self) -> bool {
        self.state().focus.initialized
    }

    pub fn focus_phase(&self) -> FocusPhase {
        match self.state().focus.focused {
            Some(surface) => FocusPhase::Focused(surface),
            None => FocusPhase::Idle,
        }
    }

    fn check_thread(&self, operation: &'static str) -> Result<(), RegistryError> {
        self.ui.check().map_err(|caller| {
            tracing::warn!(operation, ?caller, ui = ?self.ui.id(), "called off the UI thread");
            RegistryError::ThreadAffinityViolation {
                operation,
                caller,
                ui: self.ui.id(),
            }
        })
    }

    fn check_log_stores(&self, reporter: &ReporterRef) -> Result<(), RegistryError> {
        if reporter.log_store_count() == 0 {
            tracing::warn!(reporter = %reporter.id(), "refusing bug reporter without a log store");
            return Err(RegistryError::NoLogStoreConfigured {
                reporter: reporter.id(),
            });
        }
        Ok(())
    }

    fn check_trigger(&self, spec: &TriggerSpec) -> Result<(), RegistryError> {
        spec.validate()
            .and_then(|()| self.shell.check_trigger(spec))
            .map_err(|e| {
                tracing::warn!(trigger = %spec, reason = %e.reason, "refusing trigger");
                RegistryError::InvalidTriggerKind(e)
            })
    }

    /// Insert or replace the association, attach, and install the focus
    /// subscription on first use.
    fn associate(&self, reporter: &ReporterRef, recognizer: RecognizerHandle) {
        if let Some(surface) = self.current_focus() {
            self.attach(&recognizer, surface);
        }

        let (replaced, install) = {
            let mut state = self.state();
            let replaced = match state
                .associations
                .iter_mut()
                .find(|a| a.reporter.id() == reporter.id())
            {
                Some(existing) => Some(std::mem::replace(&mut existing.recognizer, recognizer)),
                None => {
                    state.associations.push(Association {
                        reporter: reporter.downgrade(),
                        recognizer,
                    });
                    None
                }
            };
            let install = !state.focus.initialized;
            (replaced, install)
        };

        if let Some(old) = replaced {
            tracing::debug!(reporter = %reporter.id(), old = %old.id(), "replacing association");
            self.release(&old);
        }

        if install {
            // Seed the tracked focus before events start arriving.
            let focused = self.shell.focused_surface();
            {
                let mut state = self.state();
                state.focus.initialized = true;
                state.focus.focused = focused;
            }
            self.shell.subscribe_focus(self.tracker.clone());
            tracing::debug!(focused = ?focused, "focus subscription installed");
        }

        self.prune_dropped();
    }

    /// Focused surface: tracked once subscribed, asked of the shell before.
    fn current_focus(&self) -> Option<SurfaceId> {
        let (initialized, focused) = {
            let state = self.state();
            (state.focus.initialized, state.focus.focused)
        };
        if initialized {
            focused
        } else {
            self.shell.focused_surface()
        }
    }

    fn set_focused(&self, surface: Option<SurfaceId>) {
        self.state().focus.focused = surface;
    }

    fn clear_focus_if(&self, surface: SurfaceId) {
        let mut state = self.state();
        if state.focus.focused == Some(surface) {
            state.focus.focused = None;
        }
    }

    fn in_use(&self, recognizer: &RecognizerHandle) -> bool {
        self.state()
            .associations
            .iter()
            .any(|a| &a.recognizer == recognizer)
    }

    /// Detach a recognizer that just lost an association, unless another
    /// association still holds it.
    fn release(&self, recognizer: &RecognizerHandle) {
        if !self.in_use(recognizer) {
            self.detach(recognizer);
        }
    }

    /// Drop associations whose reporter the host has released.
    fn prune_dropped(&self) {
        let dropped: Vec<Association> = {
            let mut state = self.state();
            let (live, dead): (Vec<_>, Vec<_>) = std::mem::take(&mut state.associations)
                .into_iter()
                .partition(|a| a.reporter.upgrade().is_some());
            state.associations = live;
            dead
        };

        for association in dropped {
            tracing::debug!(reporter = %association.reporter.id(), "pruning dropped reporter");
            self.release(&association.recognizer);
        }
    }

    /// Attach to `surface`, first detaching from any other surface.
    fn attach(&self, recognizer: &RecognizerHandle, surface: SurfaceId) {
        match recognizer.attached_surface() {
            Some(current) if current == surface => return,
            Some(_) => self.detach(recognizer),
            None => {}
        }

        match self.shell.attach(recognizer, surface) {
            Ok(()) => {
                recognizer.set_attached(Some(surface));
                tracing::debug!(recognizer = %recognizer.id(), %surface, "attached");
            }
            Err(e) => {
                tracing::warn!(
                    recognizer = %recognizer.id(),
                    %surface,
                    error = %e,
                    "attach failed, will retry on next focus change"
                );
            }
        }
    }

    fn detach(&self, recognizer: &RecognizerHandle) {
        if let Some(surface) = recognizer.attached_surface() {
            self.shell.detach(recognizer, surface);
            recognizer.set_attached(None);
            tracing::debug!(recognizer = %recognizer.id(), %surface, "detached");
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::reporter::{BugReporter, ReporterRef};

    /// Reporter that counts compose calls.
    pub struct CountingReporter {
        stores: usize,
        composed: AtomicUsize,
    }

    impl CountingReporter {
        pub fn with_stores(stores: usize) -> Arc<Self> {
            Arc::new(Self {
                stores,
                composed: AtomicUsize::new(0),
            })
        }

        pub fn composed(&self) -> usize {
            self.composed.load(Ordering::SeqCst)
        }
    }

    impl BugReporter for CountingReporter {
        fn log_store_count(&self) -> usize {
            self.stores
        }

        fn compose_bug_report(&self) {
            self.composed.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn reporter(stores: usize) -> (Arc<CountingReporter>, ReporterRef) {
        let counter = CountingReporter::with_stores(stores);
        let reporter = ReporterRef::from_arc(counter.clone());
        (counter, reporter)
    }
}
