// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! The firmware console: text/graphics screen switching and keyboard
//! prompts.

use log::{debug, info};
use uefi::boot;
use uefi::proto::console::text::{Key, ScanCode};
use uefi::proto::unsafe_protocol;
use uefi::{Char16, Status, StatusExt, system};

use crate::{firmware, logger};

const CARRIAGE_RETURN: u16 = 0x0D;
const ONE_SECOND_US: usize = 1_000_000;

/* ================== Console control ================== */

/// `EFI_CONSOLE_CONTROL_SCREEN_MODE`.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScreenMode {
    Text = 0,
    Graphics = 1,
}

impl ScreenMode {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ScreenMode::Text),
            1 => Some(ScreenMode::Graphics),
            _ => None,
        }
    }
}

/// Intel `EFI_CONSOLE_CONTROL_PROTOCOL`, found on EFI 1.x era firmware
/// where the console hides text while it shows graphics.
#[repr(C)]
#[unsafe_protocol("f42f7782-012e-4c12-9956-49f94304f721")]
pub struct ConsoleControlProtocol {
    get_mode: unsafe extern "efiapi" fn(
        this: *mut ConsoleControlProtocol,
        mode: *mut u32,
        gop_uga_exists: *mut u8,
        std_in_locked: *mut u8,
    ) -> Status,
    set_mode: unsafe extern "efiapi" fn(this: *mut ConsoleControlProtocol, mode: u32) -> Status,
    _lock_std_in: *const core::ffi::c_void,
}

impl ConsoleControlProtocol {
    fn mode(&mut self) -> uefi::Result<u32> {
        let (mut mode, mut gop_uga, mut locked) = (0u32, 0u8, 0u8);
        let f = self.get_mode;
        unsafe { f(self, &mut mode, &mut gop_uga, &mut locked) }.to_result()?;
        Ok(mode)
    }

    fn set_mode(&mut self, mode: ScreenMode) -> uefi::Result {
        let f = self.set_mode;
        unsafe { f(self, mode as u32) }.to_result()
    }
}

/// A forced switch is always issued; otherwise only when the console is
/// known to be in the other mode.
pub(crate) fn needs_switch(current: Option<ScreenMode>, target: ScreenMode, force: bool) -> bool {
    force || current.is_some_and(|c| c != target)
}

/// Must not log: the logger calls it before every on-screen line.
fn switch_screen(target: ScreenMode, force: bool) {
    let Ok((_, mut control)) = firmware::locate::<ConsoleControlProtocol>() else {
        return;
    };
    let current = control.mode().ok().and_then(ScreenMode::from_raw);
    if needs_switch(current, target, force) {
        let _ = control.set_mode(target);
    }
}

/// Make console text visible. A no-op on firmware without console control.
pub fn switch_to_text(force: bool) {
    switch_screen(ScreenMode::Text, force);
}

pub fn clear_screen() {
    switch_to_text(false);
    system::with_stdout(|out| {
        let _ = out.clear();
    });
}

/* ================== Prompts ================== */

/// Block until Enter is pressed. The log file is brought up to date first
/// so that it survives a reset at this point.
pub fn wait_for_enter(print_message: bool) {
    if print_message {
        info!("Press Enter to continue");
    }
    logger::flush();

    system::with_stdin(|stdin| {
        let _ = stdin.reset(false);
        loop {
            let Some(event) = stdin.wait_for_key_event() else {
                debug!("console has no key event");
                return;
            };
            let mut events = [event];
            if boot::wait_for_event(&mut events).is_err() {
                return;
            }
            if let Ok(Some(key)) = stdin.read_key() {
                if is_enter(&key) {
                    return;
                }
            }
        }
    });
}

/// `wait_for_enter`, then give the user a second to queue another key.
pub fn wait_for_enter_and_stall(print_message: bool) {
    wait_for_enter(print_message);
    boot::stall(ONE_SECOND_US);
}

/// A key already waiting in the input buffer, if any.
pub fn read_key_now() -> Option<Key> {
    system::with_stdin(|stdin| stdin.read_key().ok().flatten())
}

pub fn is_enter(key: &Key) -> bool {
    matches!(key, Key::Printable(c) if u16::from(*c) == CARRIAGE_RETURN)
}

pub fn is_char(key: &Key, ch: char) -> bool {
    match (key, Char16::try_from(ch)) {
        (Key::Printable(c), Ok(want)) => *c == want,
        _ => false,
    }
}

pub fn is_f8(key: &Key) -> bool {
    matches!(key, Key::Special(ScanCode::FUNCTION_8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printable(c: char) -> Key {
        Key::Printable(Char16::try_from(c).unwrap())
    }

    #[test]
    fn classifies_keys() {
        assert!(is_enter(&printable('\r')));
        assert!(!is_enter(&printable('\n')));
        assert!(is_char(&printable('v'), 'v'));
        assert!(!is_char(&printable('V'), 'v'));
        assert!(is_f8(&Key::Special(ScanCode::FUNCTION_8)));
        assert!(!is_f8(&Key::Special(ScanCode::FUNCTION_7)));
        assert!(!is_enter(&Key::Special(ScanCode::FUNCTION_8)));
    }

    #[test]
    fn screen_switch_only_when_needed() {
        use ScreenMode::{Graphics, Text};
        assert!(needs_switch(Some(Graphics), Text, false));
        assert!(!needs_switch(Some(Text), Text, false));
        assert!(!needs_switch(None, Text, false));
        assert!(needs_switch(Some(Text), Text, true));
        assert!(needs_switch(None, Graphics, true));
        assert_eq!(ScreenMode::from_raw(1), Some(Graphics));
        assert_eq!(ScreenMode::from_raw(2), None);
    }
}
