//! Capture keys read from the controlling terminal.

use camera_calib_core::{Key, KeyInput};
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use std::io;
use std::time::{Duration, Instant};

/// Space accepts, Enter finalizes, Esc (or Ctrl+C, which raw mode no
/// longer turns into a signal) aborts.
pub fn map_key(event: &KeyEvent) -> Option<Key> {
    match event.code {
        KeyCode::Char(' ') => Some(Key::Space),
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Esc => Some(Key::Escape),
        KeyCode::Char('c') if event.modifiers.contains(KeyModifiers::CONTROL) => Some(Key::Escape),
        _ => None,
    }
}

/// Longest gap between two auto-repeat presses of a held key, including the
/// delay before the first repeat.
pub const REPEAT_WINDOW: Duration = Duration::from_millis(550);

/// Drops presses of the same key that follow each other within
/// [`REPEAT_WINDOW`], as auto-repeat does while a key is held.
///
/// Every dropped press extends the window, so a key held for any length of
/// time yields one action.
#[derive(Clone, Copy, Debug, Default)]
pub struct RepeatFilter {
    last: Option<(Key, Instant)>,
}

impl RepeatFilter {
    /// `true` when the press at `at` starts a new action.
    pub fn accept(&mut self, key: Key, at: Instant) -> bool {
        let repeat = matches!(
            self.last,
            Some((prev, t)) if prev == key && at.saturating_duration_since(t) < REPEAT_WINDOW
        );
        self.last = Some((key, at));
        !repeat
    }
}

/// Puts the terminal in raw mode for as long as it lives.
///
/// Terminals that support it are asked to tag auto-repeat presses and only
/// first presses are forwarded. Elsewhere auto-repeat arrives as plain
/// presses and a [`RepeatFilter`] drops them.
pub struct TerminalKeys {
    enhanced: bool,
    repeats: RepeatFilter,
}

impl TerminalKeys {
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        let enhanced = supports_keyboard_enhancement().unwrap_or(false);
        if enhanced {
            execute!(
                io::stdout(),
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
        }
        Ok(Self {
            enhanced,
            repeats: RepeatFilter::default(),
        })
    }
}

impl Drop for TerminalKeys {
    fn drop(&mut self) {
        if self.enhanced {
            let _ = execute!(io::stdout(), PopKeyboardEnhancementFlags);
        }
        let _ = disable_raw_mode();
    }
}

impl KeyInput for TerminalKeys {
    fn wait_key(&mut self, timeout: Duration) -> io::Result<Option<Key>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !event::poll(remaining)? {
                return Ok(None);
            }
            if let Event::Key(k) = event::read()? {
                if k.kind == KeyEventKind::Press {
                    if let Some(key) = map_key(&k) {
                        if self.enhanced || self.repeats.accept(key, Instant::now()) {
                            return Ok(Some(key));
                        }
                    }
                }
            }
            if remaining.is_zero() {
                return Ok(None);
            }
        }
    }
}
