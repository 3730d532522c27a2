//! Key chords — "Super+Shift+B" → (modifier mask, keycode).
//!
//! Parsing is split in two: [`parse_chord`] turns the text into a modifier
//! mask and keysym without touching the display, and [`Chord::resolve`]
//! looks the keysym up in the server's keyboard mapping.

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{self, Keysym, ModMask, Setup};

/// Chord text parsed into X11 terms, not yet bound to a keycode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chord {
    pub modifiers: u16,
    pub keysym: Keysym,
    pub raw: String,
}

/// A chord resolved against the server keyboard mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub modifiers: u16,
    pub keycode: u8,
    pub raw: String,
}

/// Parse `Modifier[+Modifier...]+Key`.
///
/// Modifiers: `Shift`, `Control`/`Ctrl`, `Alt`, `Super`. Keys: a letter,
/// a digit, `F1`–`F12`, or a named key. A bare key is refused: a trigger
/// without a modifier would swallow ordinary typing.
pub fn parse_chord(spec: &str) -> Result<Chord, String> {
    let parts: Vec<&str> = spec.split('+').map(str::trim).collect();
    let Some((key_name, modifier_parts)) = parts.split_last() else {
        return Err("empty chord".into());
    };
    if key_name.is_empty() {
        return Err(format!("missing key in {spec:?}"));
    }
    if modifier_parts.is_empty() {
        return Err(format!("bare key without modifier: {spec:?}"));
    }

    let mut modifiers = 0u16;
    for m in modifier_parts {
        modifiers |= modifier_mask(m).ok_or_else(|| format!("unknown modifier: {m:?}"))?;
    }

    let keysym = keysym_for(key_name).ok_or_else(|| format!("unknown key: {key_name:?}"))?;

    Ok(Chord {
        modifiers,
        keysym,
        raw: spec.to_string(),
    })
}

impl Chord {
    /// Look the keysym up in the server keyboard mapping.
    pub fn resolve(&self, conn: &impl Connection, setup: &Setup) -> Result<Binding, String> {
        let keycode = keycode_for(conn, setup, self.keysym).ok_or_else(|| {
            format!(
                "keysym 0x{:04x} of {:?} is not on this keyboard",
                self.keysym, self.raw
            )
        })?;
        Ok(Binding {
            modifiers: self.modifiers,
            keycode,
            raw: self.raw.clone(),
        })
    }
}

fn modifier_mask(name: &str) -> Option<u16> {
    match name.to_ascii_lowercase().as_str() {
        "shift" => Some(ModMask::SHIFT.into()),
        "control" | "ctrl" => Some(ModMask::CONTROL.into()),
        "alt" | "mod1" => Some(ModMask::M1.into()),
        "super" | "mod4" => Some(ModMask::M4.into()),
        _ => None,
    }
}

fn keysym_for(name: &str) -> Option<Keysym> {
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return match ch {
            c if c.is_ascii_alphabetic() => Some(c.to_ascii_lowercase() as Keysym),
            c if c.is_ascii_digit() => Some(c as Keysym),
            _ => None,
        };
    }

    // XK_F1 = 0xffbe, consecutive through XK_F12.
    if let Some(n) = name
        .strip_prefix(['F', 'f'])
        .and_then(|rest| rest.parse::<u32>().ok())
    {
        return (1..=12).contains(&n).then(|| 0xffbe + n - 1);
    }

    let keysym = match name.to_ascii_lowercase().as_str() {
        "space" => 0x0020,
        "return" | "enter" => 0xff0d,
        "escape" | "esc" => 0xff1b,
        "tab" => 0xff09,
        "backspace" => 0xff08,
        "delete" => 0xffff,
        "insert" => 0xff63,
        "home" => 0xff50,
        "end" => 0xff57,
        "pause" => 0xff13,
        "print" => 0xff61,
        _ => return None,
    };
    Some(keysym)
}

fn keycode_for(conn: &impl Connection, setup: &Setup, keysym: Keysym) -> Option<u8> {
    let min = setup.min_keycode;
    let count = setup.max_keycode - min + 1;

    let reply = xproto::get_keyboard_mapping(conn, min, count)
        .ok()?
        .reply()
        .ok()?;

    let per_code = usize::from(reply.keysyms_per_keycode);
    if per_code == 0 {
        return None;
    }

    reply
        .keysyms
        .chunks(per_code)
        .position(|syms| syms.contains(&keysym))
        .and_then(|i| u8::try_from(i).ok())
        .map(|i| min + i)
}

/// Whether a key event's keycode and state match `binding`, ignoring
/// CapsLock, NumLock and pointer button bits.
pub fn event_matches(keycode: u8, state: u16, binding: &Binding, numlock_mask: u16) -> bool {
    let ignored = u16::from(ModMask::LOCK) | numlock_mask;
    let mods = state & !ignored & 0x00ff;
    keycode == binding.keycode && mods == binding.modifiers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> Binding {
        Binding {
            modifiers: u16::from(ModMask::M4) | u16::from(ModMask::SHIFT),
            keycode: 56,
            raw: "Super+Shift+B".into(),
        }
    }

    #[test]
    fn parse_super_shift_letter() {
        let chord = parse_chord("Super+Shift+B").unwrap();
        assert_eq!(
            chord.modifiers,
            u16::from(ModMask::M4) | u16::from(ModMask::SHIFT)
        );
        assert_eq!(chord.keysym, 0x62);
        assert_eq!(chord.raw, "Super+Shift+B");
    }

    #[test]
    fn parse_modifier_aliases() {
        let a = parse_chord("ctrl+alt+1").unwrap();
        let b = parse_chord("Control+Mod1+1").unwrap();
        assert_eq!(a.modifiers, b.modifiers);
        assert_eq!(a.keysym, 0x31);
    }

    #[test]
    fn parse_function_and_named_keys() {
        assert_eq!(parse_chord("Ctrl+F1").unwrap().keysym, 0xffbe);
        assert_eq!(parse_chord("Ctrl+f12").unwrap().keysym, 0xffc9);
        assert_eq!(parse_chord("Super+Print").unwrap().keysym, 0xff61);
        assert_eq!(parse_chord("Alt+space").unwrap().keysym, 0x0020);
    }

    #[test]
    fn bare_key_is_refused() {
        let err = parse_chord("B").unwrap_err();
        assert!(err.contains("bare key"));
    }

    #[test]
    fn bad_parts_are_refused() {
        assert!(parse_chord("").is_err());
        assert!(parse_chord("Super+").is_err());
        assert!(parse_chord("Hyper+B").unwrap_err().contains("unknown modifier"));
        assert!(parse_chord("Ctrl+F13").unwrap_err().contains("unknown key"));
        assert!(parse_chord("Ctrl+FooBar").is_err());
    }

    #[test]
    fn event_match_ignores_lock_bits() {
        let b = binding();
        let numlock = u16::from(ModMask::M2);
        assert!(event_matches(56, b.modifiers, &b, numlock));
        assert!(event_matches(56, b.modifiers | u16::from(ModMask::LOCK), &b, numlock));
        assert!(event_matches(56, b.modifiers | numlock, &b, numlock));
        assert!(event_matches(56, b.modifiers | 0x100, &b, numlock));
    }

    #[test]
    fn event_match_requires_exact_modifiers() {
        let b = binding();
        let numlock = u16::from(ModMask::M2);
        assert!(!event_matches(57, b.modifiers, &b, numlock));
        assert!(!event_matches(56, u16::from(ModMask::M4), &b, numlock));
        assert!(!event_matches(
            56,
            b.modifiers | u16::from(ModMask::CONTROL),
            &b,
            numlock
        ));
    }

    #[test]
    fn custom_numlock_bit_is_only_bit_ignored() {
        let b = binding();
        let numlock = u16::from(ModMask::M3);
        assert!(event_matches(56, b.modifiers | numlock, &b, numlock));
        assert!(!event_matches(56, b.modifiers | u16::from(ModMask::M2), &b, numlock));
    }
}
