//! Trigger specifications — which gesture fires a bug report.
//!
//! A [`TriggerSpec`] names a gesture kind and its construction parameters.
//! Specs built in code are checked by the type system; specs parsed from
//! configuration strings go through [`TriggerSpec::from_str`] and
//! [`TriggerSpec::validate`], which report [`InvalidTrigger`].
//!
//! String form:
//!
//! | spec                 | meaning                                   |
//! |----------------------|-------------------------------------------|
//! | `long-press:2`       | two-finger long press, default duration   |
//! | `long-press:2:800`   | two-finger long press held for 800ms      |
//! | `tap:1x2`            | one-finger double tap                     |
//! | `swipe:2:left`       | two-finger swipe to the left              |
//! | `key:Super+Shift+B`  | key chord (desktop hosts)                 |

mod recognizer;

pub use recognizer::{FireSink, Phase, RecognizerHandle, RecognizerId};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Most simultaneous touches a touch trigger may require.
pub const MAX_TOUCHES: u8 = 5;

/// Most taps a tap trigger may require.
pub const MAX_TAPS: u8 = 5;

/// Default hold time for a long press.
pub const DEFAULT_LONG_PRESS_MS: u32 = 500;

/// Longest hold time accepted for a long press.
const MAX_LONG_PRESS_MS: u32 = 10_000;

/// The gesture recognizer family a spec produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GestureKind {
    LongPress,
    Tap,
    Swipe,
    KeyChord,
}

impl fmt::Display for GestureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GestureKind::LongPress => "long-press",
            GestureKind::Tap => "tap",
            GestureKind::Swipe => "swipe",
            GestureKind::KeyChord => "key",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeDirection {
    Left,
    Right,
    Up,
    Down,
}

impl fmt::Display for SwipeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwipeDirection::Left => "left",
            SwipeDirection::Right => "right",
            SwipeDirection::Up => "up",
            SwipeDirection::Down => "down",
        };
        f.write_str(name)
    }
}

/// A gesture kind plus its construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    LongPress { touches: u8, min_duration_ms: u32 },
    Tap { touches: u8, taps: u8 },
    Swipe { touches: u8, direction: SwipeDirection },
    KeyChord { chord: String },
}

/// A trigger that cannot be turned into a recognizer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid trigger {spec:?}: {reason}")]
pub struct InvalidTrigger {
    /// The offending spec, as given.
    pub spec: String,
    pub reason: String,
}

impl InvalidTrigger {
    pub fn new(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            reason: reason.into(),
        }
    }
}

impl TriggerSpec {
    /// Two-finger press-and-hold, the default bug report gesture.
    pub fn two_finger_long_press() -> Self {
        TriggerSpec::LongPress {
            touches: 2,
            min_duration_ms: DEFAULT_LONG_PRESS_MS,
        }
    }

    pub fn key_chord(chord: impl Into<String>) -> Self {
        TriggerSpec::KeyChord {
            chord: chord.into(),
        }
    }

    pub fn kind(&self) -> GestureKind {
        match self {
            TriggerSpec::LongPress { .. } => GestureKind::LongPress,
            TriggerSpec::Tap { .. } => GestureKind::Tap,
            TriggerSpec::Swipe { .. } => GestureKind::Swipe,
            TriggerSpec::KeyChord { .. } => GestureKind::KeyChord,
        }
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), InvalidTrigger> {
        let reason = match self {
            TriggerSpec::LongPress {
                touches,
                min_duration_ms,
            } => touches_reason(*touches).or_else(|| {
                (*min_duration_ms == 0 || *min_duration_ms > MAX_LONG_PRESS_MS).then(|| {
                    format!("hold time must be 1..={MAX_LONG_PRESS_MS}ms, got {min_duration_ms}")
                })
            }),
            TriggerSpec::Tap { touches, taps } => touches_reason(*touches).or_else(|| {
                (*taps == 0 || *taps > MAX_TAPS)
                    .then(|| format!("tap count must be 1..={MAX_TAPS}, got {taps}"))
            }),
            TriggerSpec::Swipe { touches, .. } => touches_reason(*touches),
            TriggerSpec::KeyChord { chord } => chord
                .trim()
                .is_empty()
                .then(|| "empty key chord".to_string()),
        };

        match reason {
            Some(reason) => Err(InvalidTrigger::new(self.to_string(), reason)),
            None => Ok(()),
        }
    }
}

fn touches_reason(touches: u8) -> Option<String> {
    (touches == 0 || touches > MAX_TOUCHES)
        .then(|| format!("touch count must be 1..={MAX_TOUCHES}, got {touches}"))
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSpec::LongPress {
                touches,
                min_duration_ms,
            } => write!(f, "long-press:{touches}:{min_duration_ms}"),
            TriggerSpec::Tap { touches, taps } => write!(f, "tap:{touches}x{taps}"),
            TriggerSpec::Swipe { touches, direction } => write!(f, "swipe:{touches}:{direction}"),
            TriggerSpec::KeyChord { chord } => write!(f, "key:{chord}"),
        }
    }
}

impl FromStr for TriggerSpec {
    type Err = InvalidTrigger;

    /// Parse the string form and validate the result.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |reason: String| InvalidTrigger::new(s, reason);

        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected <kind>:<params>".into()))?;

        let spec = match kind.to_ascii_lowercase().as_str() {
            "long-press" | "longpress" | "long_press" => {
                let (touches, duration) = match rest.split_once(':') {
                    Some((t, d)) => (t, Some(d)),
                    None => (rest, None),
                };
                let min_duration_ms = match duration {
                    Some(d) => d
                        .parse()
                        .map_err(|_| invalid(format!("bad hold time: {d:?}")))?,
                    None => DEFAULT_LONG_PRESS_MS,
                };
                TriggerSpec::LongPress {
                    touches: parse_count(touches).map_err(invalid)?,
                    min_duration_ms,
                }
            }
            "tap" => {
                let (touches, taps) = rest
                    .split_once(['x', 'X'])
                    .ok_or_else(|| invalid("expected tap:<touches>x<taps>".into()))?;
                TriggerSpec::Tap {
                    touches: parse_count(touches).map_err(invalid)?,
                    taps: parse_count(taps).map_err(invalid)?,
                }
            }
            "swipe" => {
                let (touches, direction) = rest
                    .split_once(':')
                    .ok_or_else(|| invalid("expected swipe:<touches>:<direction>".into()))?;
                let direction = match direction.to_ascii_lowercase().as_str() {
                    "left" => SwipeDirection::Left,
                    "right" => SwipeDirection::Right,
                    "up" => SwipeDirection::Up,
                    "down" => SwipeDirection::Down,
                    other => return Err(invalid(format!("unknown swipe direction: {other:?}"))),
                };
                TriggerSpec::Swipe {
                    touches: parse_count(touches).map_err(invalid)?,
                    direction,
                }
            }
            "key" => TriggerSpec::key_chord(rest.trim()),
            other => return Err(invalid(format!("unknown gesture kind: {other:?}"))),
        };

        spec.validate()
            .map_err(|e| InvalidTrigger::new(s, e.reason))?;
        Ok(spec)
    }
}

fn parse_count(s: &str) -> Result<u8, String> {
    s.trim()
        .parse()
        .map_err(|_| format!("expected a small number, got {s:?}"))
}
