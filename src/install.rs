// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Putting the Int10h shim in place.
//!
//! Order matters: the display is settled first (the VBE records describe
//! whatever mode ends up active), then the ROM window is unlocked, filled,
//! described and locked again, and only then is the IVT pointed at it.

extern crate alloc;
use alloc::boxed::Box;
use log::{debug, error, info, warn};

use crate::config::Settings;
use crate::display::{Adapters, ModeNegotiator};
use crate::error::{Result, ShimError};
use crate::ivt::{self, VIDEO_VECTOR};
use crate::lock::{self, LockOp, LockStrategy};
use crate::realmode::{FarPtr, LockableRegion, PhysMemory, VGA_ROM_WINDOW};
use crate::vbe::{self, MODE_HEIGHT, MODE_WIDTH, RECORDS_SIZE};

/// Hardware the installer works on.
pub struct Platform<'a> {
    pub mem: &'a mut dyn PhysMemory,
    pub locks: &'a mut [Box<dyn LockStrategy>],
    pub window: LockableRegion,
    /// The page holding the IVT is ours and may be written.
    pub ivt_claimed: bool,
    /// Called after a non-fatal problem unless errors are skipped.
    pub pause: &'a mut dyn FnMut(),
}

impl<'a> Platform<'a> {
    pub fn new(
        mem: &'a mut dyn PhysMemory,
        locks: &'a mut [Box<dyn LockStrategy>],
        ivt_claimed: bool,
        pause: &'a mut dyn FnMut(),
    ) -> Self {
        Self {
            mem,
            locks,
            window: VGA_ROM_WINDOW,
            ivt_claimed,
            pause,
        }
    }

    fn lock(&mut self, op: LockOp) -> Result<()> {
        lock::set_lock(self.mem, self.window, op, self.locks)
    }

    fn handler_present(&self) -> bool {
        ivt::is_handler_present(&*self.mem, self.window)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// A handler was already there; nothing was touched.
    AlreadyPresent,
    Installed {
        entry: FarPtr,
        /// The final sanity check agreed.
        verified: bool,
    },
}

fn problem(platform: &mut Platform, settings: &Settings) {
    if !settings.skip_errors {
        (platform.pause)();
    }
}

pub fn install<A: Adapters>(
    platform: &mut Platform,
    negotiator: &mut ModeNegotiator<A>,
    settings: &Settings,
    blob: &[u8],
) -> Result<InstallOutcome> {
    // Any other failure shows up in the mode check below.
    if let Err(ShimError::NoAdapterFound) = negotiator.switch_to(MODE_WIDTH, MODE_HEIGHT) {
        error!("no graphics adapter, the shim cannot describe a framebuffer");
        return Err(ShimError::NoAdapterFound);
    }
    if settings.verbose || settings.log_to_file {
        if let Some(display) = negotiator.display() {
            display.log_info();
        }
    }

    if !negotiator.matches(MODE_WIDTH, MODE_HEIGHT) {
        warn!(
            "display does not seem to support {}x{}, which the legacy boot path requires",
            MODE_WIDTH, MODE_HEIGHT
        );
        warn!("trying to force the mode; the screen may glitch");
        problem(platform, settings);
        if let Err(e) = negotiator.force_mode_hack(MODE_WIDTH, MODE_HEIGHT) {
            debug!("forced mode request failed: {}", e);
        }
    }

    if settings.force_fake_vesa {
        info!("overwriting the Int10h handler as requested");
    } else if platform.handler_present() {
        info!("Int10h already has a handler, nothing to do");
        return Ok(InstallOutcome::AlreadyPresent);
    }

    if blob.len() > platform.window.len {
        error!(
            "shim is larger than the ROM window ({} > {})",
            blob.len(),
            platform.window.len
        );
        return Err(ShimError::BadBufferSize);
    }
    if blob.len() <= RECORDS_SIZE {
        error!("shim handler code is missing ({} bytes)", blob.len());
        return Err(ShimError::NotFound);
    }

    let state = negotiator.state()?;

    if let Err(e) = platform.lock(LockOp::Unlock) {
        error!("unable to unlock video ROM at {:#x}: {}", platform.window.base, e);
        return Err(e);
    }

    let base = platform.window.base;
    platform.mem.fill(base, platform.window.len, 0);
    platform.mem.write_bytes(base, blob);
    let end = match vbe::synthesize(platform.mem, base, &state) {
        Ok(end) => end,
        Err(e) => {
            error!("VESA information could not be filled in: {}", e);
            platform.mem.fill(base, platform.window.len, 0);
            if let Err(e) = platform.lock(LockOp::Lock) {
                debug!("re-lock after failure: {}", e);
            }
            return Err(e);
        }
    };
    let entry = FarPtr::relative(base, end)?;
    info!("VESA information filled in, Int10h handler at {} ({:#x})", entry, end);

    match platform.lock(LockOp::Lock) {
        Ok(()) => {}
        Err(e) if e.is_recoverable() => {
            debug!("unable to lock video ROM at {:#x} ({}), continuing", base, e)
        }
        Err(e) => {
            error!("locking video ROM at {:#x}: {}", base, e);
            return Err(e);
        }
    }

    let current = ivt::read_vector(&*platform.mem, VIDEO_VECTOR);
    if platform.ivt_claimed {
        ivt::write_vector(platform.mem, VIDEO_VECTOR, entry);
        debug!("Int10h vector now {}", entry);
    } else if current == entry {
        debug!("IVT not claimed but Int10h already points at {}", entry);
    } else {
        warn!(
            "unable to claim the IVT; Int10h points at {} instead of {}",
            current, entry
        );
        problem(platform, settings);
    }

    let verified = platform.handler_present();
    if verified {
        info!("pre-boot Int10h sanity check passed");
    } else {
        warn!("pre-boot Int10h sanity check failed");
        problem(platform, settings);
    }
    Ok(InstallOutcome::Installed { entry, verified })
}
