//! Host windowing shell abstraction.
//!
//! Everything platform-specific sits behind [`WindowShell`]: which surface
//! has focus, which trigger kinds the platform can recognize, and how a
//! recognizer is added to or removed from a surface. Focus changes come back
//! through a [`FocusObserver`] the registry installs once.
//!
//! Two shells ship with the crate: [`sim::SimulatedShell`] (in-memory, for
//! tests and embedders) and [`x11::X11Shell`] (key chords on X11 windows).

pub mod sim;
pub mod x11;

use std::fmt;
use std::sync::Arc;

use crate::trigger::{InvalidTrigger, RecognizerHandle, TriggerSpec};

/// Opaque id of a host surface (window).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface-0x{:x}", self.0)
    }
}

/// Host shell errors.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("X11: {0}")]
    X11(String),
    #[error("{surface}: grab for {spec} conflicts with another client")]
    GrabConflict { surface: SurfaceId, spec: String },
    #[error("no such surface: {0}")]
    UnknownSurface(SurfaceId),
    #[error(transparent)]
    InvalidTrigger(#[from] InvalidTrigger),
}

/// Narrow observer for focus changes, installed directly with the shell.
pub trait FocusObserver: Send + Sync {
    fn on_focus_gained(&self, surface: SurfaceId);
    fn on_focus_lost(&self, surface: SurfaceId);
}

/// Host windowing capabilities the registry consumes.
///
/// All methods are called on the UI thread. Implementations must not call
/// back into the registry from `attach` or `detach`.
pub trait WindowShell: Send + Sync {
    /// The surface currently receiving input, if any.
    fn focused_surface(&self) -> Option<SurfaceId>;

    /// Check that this host can produce a recognizer for `spec`.
    fn check_trigger(&self, spec: &TriggerSpec) -> Result<(), InvalidTrigger>;

    /// Add `recognizer` to `surface`.
    fn attach(&self, recognizer: &RecognizerHandle, surface: SurfaceId) -> Result<(), ShellError>;

    /// Remove `recognizer` from `surface`. Best-effort.
    fn detach(&self, recognizer: &RecognizerHandle, surface: SurfaceId);

    /// Start delivering focus-gained / focus-lost to `observer`.
    fn subscribe_focus(&self, observer: Arc<dyn FocusObserver>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_display_is_hex() {
        assert_eq!(SurfaceId::new(0x2a00007).to_string(), "surface-0x2a00007");
    }

    #[test]
    fn grab_conflict_message() {
        let e = ShellError::GrabConflict {
            surface: SurfaceId::new(16),
            spec: "key:Super+B".into(),
        };
        assert_eq!(
            e.to_string(),
            "surface-0x10: grab for key:Super+B conflicts with another client"
        );
    }
}
