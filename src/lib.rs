//! bugtap — bind bug reporters to trigger gestures on the focused window.
//!
//! A host registers [`BugReporter`]s against [`TriggerSpec`]s. The
//! [`AssociationRegistry`] creates one recognizer per registration, keeps
//! it attached to whichever surface has focus, and composes every reporter
//! that owns a recognizer when its gesture begins.
//!
//! Platform specifics live behind [`WindowShell`]. The crate ships an
//! in-memory [`SimulatedShell`] and an X11 shell used by the `bugtapd`
//! daemon, plus a [`BundleReporter`] that snapshots log files into
//! MessagePack report bundles.

pub mod registry;
pub mod report;
pub mod reporter;
pub mod shell;
pub mod thread;
pub mod trigger;

pub use registry::{AssociationRegistry, DispatchRouter, FocusPhase, FocusTracker, RegistryError};
pub use report::BundleReporter;
pub use reporter::{BugReporter, ReporterId, ReporterRef};
pub use shell::sim::SimulatedShell;
pub use shell::{FocusObserver, ShellError, SurfaceId, WindowShell};
pub use thread::UiThread;
pub use trigger::{GestureKind, Phase, RecognizerHandle, RecognizerId, TriggerSpec};
