// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use log::{debug, warn};

use super::{Adapters, Display, DisplayState, ModeSwitch};
use crate::error::Result;

/// Drives the active display to a required resolution.
pub struct ModeNegotiator<A: Adapters> {
    adapters: A,
    display: Option<Display>,
}

impl<A: Adapters> ModeNegotiator<A> {
    pub fn new(adapters: A) -> Self {
        Self {
            adapters,
            display: None,
        }
    }

    /// Protocol discovery runs at most once.
    pub fn ensure_available(&mut self) -> Result<&mut Display> {
        let display = match self.display.take() {
            Some(d) => d,
            None => Display::acquire(&mut self.adapters)?,
        };
        Ok(self.display.insert(display))
    }

    /// Live snapshot of the current mode.
    pub fn state(&mut self) -> Result<DisplayState> {
        let display = self.ensure_available()?;
        Ok(*display.refresh()?)
    }

    pub fn switch_to(&mut self, width: u32, height: u32) -> Result<ModeSwitch> {
        let display = self.ensure_available()?;
        let outcome = display.backend_mut().request_mode(width, height);
        // Whatever happened, the snapshot must follow the hardware.
        display.refresh()?;
        match outcome {
            Ok(ModeSwitch::Exact) => debug!("switched to {}x{}", width, height),
            Ok(ModeSwitch::Nearest(w, h)) => {
                warn!("{}x{} not available, using {}x{}", width, height, w, h)
            }
            Err(e) => warn!("unable to switch to {}x{}: {}", width, height, e),
        }
        outcome
    }

    /// Exact comparison against the live geometry.
    pub fn matches(&mut self, width: u32, height: u32) -> bool {
        match self.state() {
            Ok(s) => s.resolution() == (width, height),
            Err(_) => false,
        }
    }

    /// Workaround for firmware that reports a successful mode change without
    /// committing it: reopen the protocol and ask again. The caller decides
    /// what to do with the result.
    pub fn force_mode_hack(&mut self, width: u32, height: u32) -> Result<()> {
        let display = self.ensure_available()?;
        display.backend_mut().reinitialize()?;
        let outcome = display.backend_mut().request_mode(width, height);
        display.refresh()?;
        debug!("forced mode request {}x{}: {:?}", width, height, outcome);
        outcome.map(|_| ())
    }

    pub fn display(&self) -> Option<&Display> {
        self.display.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::tests::{FakeAdapters, FakeScreen, screen};
    use crate::error::ShimError;

    fn negotiator(
        gop: Option<std::rc::Rc<std::cell::RefCell<FakeScreen>>>,
    ) -> ModeNegotiator<FakeAdapters> {
        ModeNegotiator::new(FakeAdapters {
            gop,
            uga: None,
            probes: 0,
        })
    }

    #[test]
    fn discovery_happens_once() {
        let mut n = negotiator(Some(FakeScreen::new(screen(1024, 768))));
        n.ensure_available().unwrap();
        n.state().unwrap();
        n.matches(1024, 768);
        assert_eq!(n.adapters.probes, 1);
    }

    #[test]
    fn switch_and_verify() {
        let shared = FakeScreen::new(screen(1920, 1080));
        shared.borrow_mut().modes.push((1024, 768));
        let mut n = negotiator(Some(shared));
        assert_eq!(n.switch_to(1024, 768), Ok(ModeSwitch::Exact));
        assert!(n.matches(1024, 768));
        assert!(!n.matches(1024, 769));
    }

    #[test]
    fn lying_firmware_needs_the_hack() {
        let shared = FakeScreen::new(screen(1920, 1080));
        {
            let mut s = shared.borrow_mut();
            s.modes.push((1024, 768));
            s.lie_about_switch = true;
        }
        let mut n = negotiator(Some(shared.clone()));
        assert_eq!(n.switch_to(1024, 768), Ok(ModeSwitch::Exact));
        assert!(!n.matches(1024, 768));

        n.force_mode_hack(1024, 768).unwrap();
        assert_eq!(shared.borrow().reinit_count, 1);
        assert!(n.matches(1024, 768));
        assert_eq!(n.display().unwrap().state().resolution(), (1024, 768));
    }

    #[test]
    fn failed_switch_still_refreshes() {
        let shared = FakeScreen::new(screen(800, 600));
        let mut n = negotiator(Some(shared.clone()));
        n.ensure_available().unwrap();
        shared.borrow_mut().state = screen(640, 480);
        assert_eq!(n.switch_to(1024, 768), Err(ShimError::Unsupported));
        assert_eq!(n.display().unwrap().state().resolution(), (640, 480));
    }

    #[test]
    fn no_adapter() {
        let mut n = negotiator(None);
        assert!(!n.matches(1024, 768));
        assert_eq!(n.switch_to(1024, 768), Err(ShimError::NoAdapterFound));
        assert_eq!(
            n.force_mode_hack(1024, 768),
            Err(ShimError::NoAdapterFound)
        );
    }
}
