//! X11 host shell — key chord triggers on the active window.
//!
//! Surfaces are top-level X11 windows. Focus follows the window manager's
//! `_NET_ACTIVE_WINDOW` property on the root window; a change produces
//! focus-lost for the old window and focus-gained for the new one.
//! Attaching a `KeyChord` recognizer installs a passive key grab on the
//! window (four variants, with and without CapsLock/NumLock), so the chord
//! only fires while that window has input focus.
//!
//! Events are read by a background thread (see [`events`]) and handed to
//! [`X11Shell::handle_event`] on the UI thread.

pub mod events;
pub mod keybinding;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{
    self, Atom, ChangeWindowAttributesAux, EventMask, GrabMode, Keysym, ModMask, Window,
};
use x11rb::rust_connection::RustConnection;

use self::events::RepeatFilter;
use self::keybinding::{Binding, event_matches, parse_chord};
use super::{FocusObserver, ShellError, SurfaceId, WindowShell};
use crate::trigger::{InvalidTrigger, Phase, RecognizerHandle, RecognizerId, TriggerSpec};

/// CapsLock modifier bit (always LockMask, bit 1).
const LOCK_MASK: u16 = 0x0002;

/// XK_Num_Lock keysym for dynamic modifier detection.
const XK_NUM_LOCK: Keysym = 0xff7f;

/// A recognizer's grab on one window.
struct Grab {
    handle: RecognizerHandle,
    binding: Binding,
    window: Window,
}

/// X11 implementation of [`WindowShell`].
pub struct X11Shell {
    conn: Arc<RustConnection>,
    root: Window,
    net_active_window: Atom,
    numlock_mask: u16,

    /// Resolved chords, keyed by chord text.
    bindings: Mutex<HashMap<String, Binding>>,
    grabs: Mutex<HashMap<RecognizerId, Grab>>,
    repeat: Mutex<RepeatFilter>,
    observers: Mutex<Vec<Arc<dyn FocusObserver>>>,
    /// Active window as last seen by [`refresh_focus`](Self::refresh_focus).
    focused: Mutex<Option<Window>>,
    watching_root: AtomicBool,
}

impl X11Shell {
    /// Connect to the display named by `$DISPLAY`.
    pub fn connect() -> Result<Self, ShellError> {
        let (conn, screen_num) =
            RustConnection::connect(None).map_err(|e| ShellError::X11(format!("connect failed: {e}")))?;

        let root = conn.setup().roots[screen_num].root;

        let net_active_window = xproto::intern_atom(&conn, false, b"_NET_ACTIVE_WINDOW")
            .map_err(|e| ShellError::X11(format!("intern_atom: {e}")))?
            .reply()
            .map_err(|e| ShellError::X11(format!("intern_atom reply: {e}")))?
            .atom;

        let numlock_mask = detect_numlock_mask(&conn);
        tracing::debug!(
            screen = screen_num,
            numlock_mask = format_args!("0x{numlock_mask:04x}"),
            "connected to X11 display"
        );

        Ok(Self {
            conn: Arc::new(conn),
            root,
            net_active_window,
            numlock_mask,
            bindings: Mutex::new(HashMap::new()),
            grabs: Mutex::new(HashMap::new()),
            repeat: Mutex::new(RepeatFilter::default()),
            observers: Mutex::new(Vec::new()),
            focused: Mutex::new(None),
            watching_root: AtomicBool::new(false),
        })
    }

    /// Start the background event reader.
    pub fn spawn_events(
        &self,
        stop: Arc<AtomicBool>,
    ) -> Result<(tokio::sync::mpsc::UnboundedReceiver<Event>, JoinHandle<()>), ShellError> {
        events::spawn_event_thread(Arc::clone(&self.conn), stop)
    }

    /// Handle one event on the UI thread.
    pub fn handle_event(&self, event: &Event) {
        match event {
            Event::PropertyNotify(e) if e.window == self.root && e.atom == self.net_active_window => {
                self.refresh_focus();
            }
            Event::KeyPress(e) => {
                for handle in self.matching(e.event, e.detail, u16::from(e.state)) {
                    let phase = lock(&self.repeat).press(handle.id(), e.time, handle.phase());
                    handle.advance(phase);
                }
            }
            Event::KeyRelease(e) => {
                for handle in self.matching(e.event, e.detail, u16::from(e.state)) {
                    lock(&self.repeat).release(handle.id(), e.time);
                }
            }
            _ => {}
        }
    }

    /// Deliver `Ended` for key releases not followed by an autorepeat press.
    ///
    /// Call once the pending event queue is empty. A release is reported
    /// on the second call after it arrived; while
    /// [`has_pending_release`](Self::has_pending_release) is true, call
    /// again after a short quiet period.
    pub fn settle(&self) {
        let released = lock(&self.repeat).drain();
        for id in released {
            let handle = lock(&self.grabs).get(&id).map(|g| g.handle.clone());
            if let Some(handle) = handle {
                handle.advance(Phase::Ended);
            }
        }
    }

    pub fn has_pending_release(&self) -> bool {
        lock(&self.repeat).is_pending()
    }

    /// Re-read the active window and emit lost/gained if it changed.
    pub fn refresh_focus(&self) {
        let current = match self.active_window() {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(error = %e, "could not read active window");
                return;
            }
        };

        let previous = {
            let mut focused = lock(&self.focused);
            if *focused == current {
                return;
            }
            std::mem::replace(&mut *focused, current)
        };

        let observers = lock(&self.observers).clone();
        if let Some(window) = previous {
            for observer in &observers {
                observer.on_focus_lost(surface_of(window));
            }
        }
        if let Some(window) = current {
            for observer in &observers {
                observer.on_focus_gained(surface_of(window));
            }
        }
    }

    /// Grabbed recognizers on `window` whose chord matches the key event.
    fn matching(&self, window: Window, keycode: u8, state: u16) -> Vec<RecognizerHandle> {
        lock(&self.grabs)
            .values()
            .filter(|g| g.window == window && event_matches(keycode, state, &g.binding, self.numlock_mask))
            .map(|g| g.handle.clone())
            .collect()
    }

    /// Read `_NET_ACTIVE_WINDOW` from the root window.
    fn active_window(&self) -> Result<Option<Window>, ShellError> {
        let reply = xproto::get_property(
            &*self.conn,
            false,
            self.root,
            self.net_active_window,
            xproto::AtomEnum::WINDOW,
            0,
            1,
        )
        .map_err(|e| ShellError::X11(format!("get_property _NET_ACTIVE_WINDOW: {e}")))?
        .reply()
        .map_err(|e| ShellError::X11(format!("get_property reply: {e}")))?;

        let window = reply.value32().and_then(|mut values| values.next());
        Ok(window.filter(|&w| w != 0))
    }

    fn binding_for(&self, spec: &TriggerSpec) -> Result<Binding, InvalidTrigger> {
        let TriggerSpec::KeyChord { chord } = spec else {
            return Err(InvalidTrigger::new(
                spec.to_string(),
                format!("{} recognizers are not available on X11, use a key chord", spec.kind()),
            ));
        };

        if let Some(binding) = lock(&self.bindings).get(chord) {
            return Ok(binding.clone());
        }

        let binding = parse_chord(chord)
            .and_then(|c| c.resolve(&*self.conn, self.conn.setup()))
            .map_err(|reason| InvalidTrigger::new(spec.to_string(), reason))?;
        lock(&self.bindings).insert(chord.clone(), binding.clone());
        Ok(binding)
    }

    /// Grab `binding` on `window` with every lock-mask variant.
    ///
    /// `Ok(false)` when any variant is already grabbed by another client.
    fn grab_key(&self, window: Window, binding: &Binding) -> Result<bool, ShellError> {
        let mut all_ok = true;

        for lock_mask in self.lock_masks() {
            let mods = ModMask::from(binding.modifiers | lock_mask);
            let cookie = xproto::grab_key(
                &*self.conn,
                false,
                window,
                mods,
                binding.keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )
            .map_err(|e| ShellError::X11(format!("grab_key send: {e}")))?;

            if let Err(e) = cookie.check() {
                tracing::warn!(
                    chord = %binding.raw,
                    window,
                    lock_mask,
                    error = %e,
                    "XGrabKey failed, chord may conflict with another client"
                );
                all_ok = false;
            }
        }

        Ok(all_ok)
    }

    /// Best-effort ungrab of every lock-mask variant.
    fn ungrab_key(&self, window: Window, binding: &Binding) {
        for lock_mask in self.lock_masks() {
            let mods = ModMask::from(binding.modifiers | lock_mask);
            if let Err(e) = xproto::ungrab_key(&*self.conn, binding.keycode, window, mods) {
                tracing::debug!(chord = %binding.raw, window, error = %e, "XUngrabKey failed");
            }
        }
        if let Err(e) = self.conn.flush() {
            tracing::debug!(error = %e, "flush after ungrab failed");
        }
    }

    /// Lock-mask combinations: none, CapsLock, NumLock, both.
    fn lock_masks(&self) -> [u16; 4] {
        [0, LOCK_MASK, self.numlock_mask, LOCK_MASK | self.numlock_mask]
    }
}

impl WindowShell for X11Shell {
    fn focused_surface(&self) -> Option<SurfaceId> {
        match self.active_window() {
            Ok(window) => window.map(surface_of),
            Err(e) => {
                tracing::debug!(error = %e, "no active window");
                None
            }
        }
    }

    fn check_trigger(&self, spec: &TriggerSpec) -> Result<(), InvalidTrigger> {
        self.binding_for(spec).map(|_| ())
    }

    fn attach(&self, recognizer: &RecognizerHandle, surface: SurfaceId) -> Result<(), ShellError> {
        let window = window_of(surface)?;
        let binding = self.binding_for(recognizer.spec())?;

        if !self.grab_key(window, &binding)? {
            self.ungrab_key(window, &binding);
            return Err(ShellError::GrabConflict {
                surface,
                spec: recognizer.spec().to_string(),
            });
        }
        self.conn
            .flush()
            .map_err(|e| ShellError::X11(format!("flush after grab: {e}")))?;

        tracing::debug!(recognizer = %recognizer.id(), chord = %binding.raw, window, "chord grabbed");
        lock(&self.grabs).insert(
            recognizer.id(),
            Grab {
                handle: recognizer.clone(),
                binding,
                window,
            },
        );
        Ok(())
    }

    fn detach(&self, recognizer: &RecognizerHandle, surface: SurfaceId) {
        let grab = lock(&self.grabs).remove(&recognizer.id());
        lock(&self.repeat).forget(recognizer.id());

        // The release will never reach us once the grab is gone.
        if matches!(recognizer.phase(), Phase::Began | Phase::Changed) {
            recognizer.advance(Phase::Cancelled);
        }

        match grab {
            Some(grab) => {
                if surface_of(grab.window) != surface {
                    tracing::debug!(recognizer = %recognizer.id(), %surface, "grab was on another window");
                }
                self.ungrab_key(grab.window, &grab.binding);
            }
            None => tracing::debug!(recognizer = %recognizer.id(), %surface, "detach: no grab held"),
        }
    }

    fn subscribe_focus(&self, observer: Arc<dyn FocusObserver>) {
        if !self.watching_root.swap(true, Ordering::SeqCst) {
            let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE);
            let result = xproto::change_window_attributes(&*self.conn, self.root, &aux)
                .map_err(|e| e.to_string())
                .and_then(|cookie| cookie.check().map_err(|e| e.to_string()));
            if let Err(e) = result {
                tracing::error!(error = %e, "could not watch root window for focus changes");
            }
            *lock(&self.focused) = self.active_window().ok().flatten();
        }
        lock(&self.observers).push(observer);
    }
}

fn surface_of(window: Window) -> SurfaceId {
    SurfaceId::new(u64::from(window))
}

fn window_of(surface: SurfaceId) -> Result<Window, ShellError> {
    Window::try_from(surface.raw()).map_err(|_| ShellError::UnknownSurface(surface))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Find the modifier bit NumLock is mapped to.
///
/// Falls back to Mod2 (0x0010), the usual mapping, if the server's
/// mappings can't be read.
fn detect_numlock_mask(conn: &RustConnection) -> u16 {
    const FALLBACK: u16 = 0x0010;

    let Some(mod_reply) = xproto::get_modifier_mapping(conn)
        .ok()
        .and_then(|c| c.reply().ok())
    else {
        return FALLBACK;
    };
    let per_mod = usize::from(mod_reply.keycodes_per_modifier());

    let setup = conn.setup();
    let min = setup.min_keycode;
    let count = setup.max_keycode - min + 1;
    let Some(kb_reply) = xproto::get_keyboard_mapping(conn, min, count)
        .ok()
        .and_then(|c| c.reply().ok())
    else {
        return FALLBACK;
    };
    let per_code = usize::from(kb_reply.keysyms_per_keycode);

    if per_mod == 0 || per_code == 0 {
        return FALLBACK;
    }

    let numlock_keycodes: Vec<u8> = kb_reply
        .keysyms
        .chunks(per_code)
        .enumerate()
        .filter(|(_, syms)| syms.contains(&XK_NUM_LOCK))
        .filter_map(|(i, _)| u8::try_from(i).ok().map(|i| min + i))
        .collect();

    // Eight rows (Shift, Lock, Control, Mod1..Mod5); row i is bit 1 << i.
    mod_reply
        .keycodes
        .chunks(per_mod)
        .take(8)
        .position(|row| row.iter().any(|kc| *kc != 0 && numlock_keycodes.contains(kc)))
        .map_or(FALLBACK, |row| 1u16 << row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_window_mapping() {
        let s = surface_of(0x2a00007);
        assert_eq!(s.raw(), 0x2a00007);
        assert_eq!(window_of(s).unwrap(), 0x2a00007);
    }

    #[test]
    fn oversized_surface_is_unknown() {
        let s = SurfaceId::new(u64::from(u32::MAX) + 1);
        assert!(matches!(window_of(s), Err(ShellError::UnknownSurface(_))));
    }
}
