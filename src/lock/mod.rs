// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Making the legacy video window writable and read-only again.
//!
//! Several mechanisms can write-protect shadow RAM and none of them can be
//! trusted to report honestly, so every attempt is followed by a write probe
//! of the memory itself.

extern crate alloc;
use alloc::boxed::Box;
use alloc::vec::Vec;
use log::{debug, warn};

use crate::error::{Result, ShimError};
use crate::realmode::{LockableRegion, PhysMemory};

pub mod legacy_region;
pub mod mtrr;

pub use legacy_region::{LegacyRegion2Lock, LegacyRegionLock};
pub use mtrr::{FIXED_MTRR_SIZE, MtrrLock};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockOp {
    Lock,
    Unlock,
}

impl LockOp {
    /// Probe result that means this operation has taken effect.
    pub fn writable(self) -> bool {
        self == LockOp::Unlock
    }
}

/// One way of changing the write protection of a memory range.
pub trait LockStrategy {
    fn name(&self) -> &'static str;
    /// `Err` means the mechanism is not available here. `Ok` only means the
    /// request was issued.
    fn apply(&mut self, region: LockableRegion, op: LockOp) -> Result<()>;
}

/// Lock mechanisms in the order they are tried.
pub fn firmware_strategies() -> Vec<Box<dyn LockStrategy>> {
    let strategies: [Box<dyn LockStrategy>; 3] = [
        Box::new(LegacyRegionLock),
        Box::new(LegacyRegion2Lock),
        Box::new(MtrrLock),
    ];
    Vec::from(strategies)
}

/// Whether a byte at `addr` accepts writes. The original value is restored.
pub fn can_write(mem: &mut dyn PhysMemory, addr: u64) -> bool {
    let original = mem.read_u8(addr);
    let probe = original.wrapping_add(1);
    mem.write_u8(addr, probe);
    let writable = mem.read_u8(addr) == probe;
    mem.write_u8(addr, original);
    writable
}

/// Bring `region` into the state `op` asks for.
///
/// On success `can_write(region.base)` agrees with `op`.
pub fn set_lock(
    mem: &mut dyn PhysMemory,
    region: LockableRegion,
    op: LockOp,
    strategies: &mut [Box<dyn LockStrategy>],
) -> Result<()> {
    if region.base == 0 || region.len == 0 {
        return Err(ShimError::InvalidParameter);
    }
    if can_write(mem, region.base) == op.writable() {
        debug!("{:#x} already in {:?} state", region.base, op);
        return Ok(());
    }

    for strategy in strategies.iter_mut() {
        if let Err(e) = strategy.apply(region, op) {
            debug!("{} unavailable: {}", strategy.name(), e);
            continue;
        }
        if can_write(mem, region.base) == op.writable() {
            debug!("{:?} {:#x} with {}: ok", op, region.base, strategy.name());
            return Ok(());
        }
        debug!(
            "{:?} {:#x} with {}: {}",
            op,
            region.base,
            strategy.name(),
            ShimError::DeviceError
        );
    }

    warn!("no mechanism could {:?} memory at {:#x}", op, region.base);
    Err(ShimError::NotReady)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realmode::tests::RamWindow;
    use crate::realmode::{VGA_ROM_ADDRESS, VGA_ROM_WINDOW};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Flips the fake ROM's protection, or pretends to.
    struct FakeLock {
        locked: Rc<Cell<bool>>,
        available: bool,
        honest: bool,
        calls: Rc<Cell<u32>>,
    }

    impl FakeLock {
        fn boxed(
            mem: &RamWindow,
            available: bool,
            honest: bool,
        ) -> (Box<dyn LockStrategy>, Rc<Cell<u32>>) {
            let calls = Rc::new(Cell::new(0));
            let lock = FakeLock {
                locked: mem.locked.clone(),
                available,
                honest,
                calls: calls.clone(),
            };
            (Box::new(lock), calls)
        }
    }

    impl LockStrategy for FakeLock {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn apply(&mut self, _region: LockableRegion, op: LockOp) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            if !self.available {
                return Err(ShimError::NotFound);
            }
            if self.honest {
                self.locked.set(op == LockOp::Lock);
            }
            Ok(())
        }
    }

    #[test]
    fn probe_restores_the_byte() {
        let mut mem = RamWindow::new();
        mem.write_u8(VGA_ROM_ADDRESS, 0xFF);
        assert!(can_write(&mut mem, VGA_ROM_ADDRESS));
        assert_eq!(mem.read_u8(VGA_ROM_ADDRESS), 0xFF);

        let mut locked = RamWindow::locked();
        assert!(!can_write(&mut locked, VGA_ROM_ADDRESS));
    }

    #[test]
    fn already_in_state_touches_nothing() {
        let mut mem = RamWindow::new();
        let (s, calls) = FakeLock::boxed(&mem, true, true);
        let mut strategies = vec![s];
        set_lock(&mut mem, VGA_ROM_WINDOW, LockOp::Unlock, &mut strategies).unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn lying_mechanism_falls_through_to_the_next() {
        let mut mem = RamWindow::locked();
        let (liar, liar_calls) = FakeLock::boxed(&mem, true, false);
        let (absent, _) = FakeLock::boxed(&mem, false, true);
        let (honest, honest_calls) = FakeLock::boxed(&mem, true, true);
        let mut strategies = vec![liar, absent, honest];

        set_lock(&mut mem, VGA_ROM_WINDOW, LockOp::Unlock, &mut strategies).unwrap();
        assert_eq!(liar_calls.get(), 1);
        assert_eq!(honest_calls.get(), 1);
        assert!(can_write(&mut mem, VGA_ROM_ADDRESS));

        set_lock(&mut mem, VGA_ROM_WINDOW, LockOp::Lock, &mut strategies).unwrap();
        assert!(!can_write(&mut mem, VGA_ROM_ADDRESS));
    }

    #[test]
    fn nothing_available_for_an_oversized_window() {
        let mut mem = RamWindow::locked();
        let (a, _) = FakeLock::boxed(&mem, false, true);
        let (b, _) = FakeLock::boxed(&mem, false, true);
        let mut strategies: Vec<Box<dyn LockStrategy>> = vec![a, b, Box::new(MtrrLock)];
        let region = LockableRegion {
            base: VGA_ROM_ADDRESS,
            len: FIXED_MTRR_SIZE + 0x1000,
        };
        assert_eq!(
            set_lock(&mut mem, region, LockOp::Unlock, &mut strategies),
            Err(ShimError::NotReady)
        );
        assert!(!can_write(&mut mem, VGA_ROM_ADDRESS));
    }

    #[test]
    fn all_liars_is_not_ready() {
        let mut mem = RamWindow::locked();
        let (liar, _) = FakeLock::boxed(&mem, true, false);
        let mut strategies = vec![liar];
        assert_eq!(
            set_lock(&mut mem, VGA_ROM_WINDOW, LockOp::Unlock, &mut strategies),
            Err(ShimError::NotReady)
        );
    }

    #[test]
    fn empty_regions_are_rejected() {
        let mut mem = RamWindow::new();
        let mut strategies: Vec<Box<dyn LockStrategy>> = Vec::new();
        for region in [
            LockableRegion { base: 0, len: 0x1000 },
            LockableRegion {
                base: VGA_ROM_ADDRESS,
                len: 0,
            },
        ] {
            assert_eq!(
                set_lock(&mut mem, region, LockOp::Lock, &mut strategies),
                Err(ShimError::InvalidParameter)
            );
        }
    }

    #[test]
    fn success_always_matches_the_probe() {
        for start_locked in [false, true] {
            for op in [LockOp::Lock, LockOp::Unlock] {
                for honest in [false, true] {
                    let mut mem = RamWindow::new();
                    mem.locked.set(start_locked);
                    let (s, _) = FakeLock::boxed(&mem, true, honest);
                    let mut strategies = vec![s];
                    if set_lock(&mut mem, VGA_ROM_WINDOW, op, &mut strategies).is_ok() {
                        assert_eq!(can_write(&mut mem, VGA_ROM_ADDRESS), op.writable());
                    }
                }
            }
        }
    }
}
