// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Write-protecting the shadow window with fixed-range MTRRs.

use log::debug;
use x86_64::registers::model_specific::Msr;

use super::{LockOp, LockStrategy};
use crate::cpu;
use crate::error::{Result, ShimError};
use crate::realmode::{LockableRegion, REAL_MODE_LIMIT};

/// Span rewritten on every lock or unlock.
pub const FIXED_MTRR_SIZE: usize = 0x20000;

const MTRR_FIX_64K_00000: u32 = 0x250;
const MTRR_FIX_16K_80000: u32 = 0x258;
const MTRR_FIX_4K_C0000: u32 = 0x268;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryType {
    Uncacheable = 0,
    WriteProtected = 5,
}

impl From<LockOp> for MemoryType {
    fn from(op: LockOp) -> Self {
        match op {
            LockOp::Lock => MemoryType::WriteProtected,
            LockOp::Unlock => MemoryType::Uncacheable,
        }
    }
}

/// One byte-wide field of a fixed-range MTRR.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FixedSlot {
    pub msr: u32,
    /// Byte index inside the MSR, 0..8.
    pub field: u8,
    pub base: u64,
    pub size: u64,
}

/// Fixed-range MTRR field covering `addr`, if any.
pub fn fixed_mtrr_slot(addr: u64) -> Option<FixedSlot> {
    let (first_msr, range_base, unit) = match addr {
        0x0_0000..=0x7_FFFF => (MTRR_FIX_64K_00000, 0x0_0000, 0x1_0000),
        0x8_0000..=0xB_FFFF => (MTRR_FIX_16K_80000, 0x8_0000, 0x4000),
        0xC_0000..=0xF_FFFF => (MTRR_FIX_4K_C0000, 0xC_0000, 0x1000),
        _ => return None,
    };
    let index = (addr - range_base) / unit;
    Some(FixedSlot {
        msr: first_msr + (index / 8) as u32,
        field: (index % 8) as u8,
        base: range_base + index * unit,
        size: unit,
    })
}

fn set_field(value: u64, field: u8, ty: MemoryType) -> u64 {
    let shift = field as u32 * 8;
    (value & !(0xFF << shift)) | (ty as u64) << shift
}

#[derive(Default)]
pub struct MtrrLock;

impl MtrrLock {
    fn check(region: LockableRegion) -> Result<()> {
        if region.len > FIXED_MTRR_SIZE {
            debug!("{:#x} bytes exceed the fixed MTRR span", region.len);
            return Err(ShimError::Unsupported);
        }
        if region.base + FIXED_MTRR_SIZE as u64 > REAL_MODE_LIMIT {
            return Err(ShimError::Unsupported);
        }
        Ok(())
    }
}

impl LockStrategy for MtrrLock {
    fn name(&self) -> &'static str {
        "MTRRs"
    }

    fn apply(&mut self, region: LockableRegion, op: LockOp) -> Result<()> {
        // Size checks first: they never touch the CPU.
        Self::check(region)?;
        if !cpu::has_fixed_mtrrs() {
            return Err(ShimError::Unsupported);
        }

        let ty = MemoryType::from(op);
        let end = region.base + FIXED_MTRR_SIZE as u64;
        unsafe {
            cpu::with_mtrrs_disabled(|| {
                let mut addr = region.base;
                while addr < end {
                    let Some(slot) = fixed_mtrr_slot(addr) else {
                        break;
                    };
                    let mut msr = Msr::new(slot.msr);
                    let v = msr.read();
                    msr.write(set_field(v, slot.field, ty));
                    addr = slot.base + slot.size;
                }
            })
        };
        debug!("fixed MTRRs {:#x}..{:#x} set to {:?}", region.base, end, ty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_the_fixed_layout() {
        assert_eq!(
            fixed_mtrr_slot(0x7_0000),
            Some(FixedSlot {
                msr: 0x250,
                field: 7,
                base: 0x7_0000,
                size: 0x1_0000
            })
        );
        assert_eq!(fixed_mtrr_slot(0xA_0000).map(|s| (s.msr, s.field)), Some((0x259, 0)));
        assert_eq!(fixed_mtrr_slot(0xC_0000).map(|s| (s.msr, s.field)), Some((0x268, 0)));
        assert_eq!(fixed_mtrr_slot(0xC_8FFF).map(|s| (s.msr, s.field)), Some((0x269, 0)));
        assert_eq!(fixed_mtrr_slot(0xF_F000).map(|s| (s.msr, s.field)), Some((0x26F, 7)));
        assert_eq!(fixed_mtrr_slot(REAL_MODE_LIMIT), None);
    }

    #[test]
    fn video_window_spans_four_msrs() {
        let mut msrs = std::vec::Vec::new();
        let mut addr = 0xC_0000;
        while addr < 0xC_0000 + FIXED_MTRR_SIZE as u64 {
            let s = fixed_mtrr_slot(addr).unwrap();
            if !msrs.contains(&s.msr) {
                msrs.push(s.msr);
            }
            addr = s.base + s.size;
        }
        assert_eq!(msrs, [0x268, 0x269, 0x26A, 0x26B]);
    }

    #[test]
    fn field_update_touches_one_byte() {
        let v = 0x0606_0606_0606_0606;
        assert_eq!(
            set_field(v, 2, MemoryType::WriteProtected),
            0x0606_0606_0605_0606
        );
        assert_eq!(set_field(v, 7, MemoryType::Uncacheable), 0x0006_0606_0606_0606);
    }

    #[test]
    fn oversized_regions_are_refused_before_cpu_access() {
        let region = LockableRegion {
            base: 0xC_0000,
            len: FIXED_MTRR_SIZE + 1,
        };
        assert_eq!(MtrrLock.apply(region, LockOp::Lock), Err(ShimError::Unsupported));
        let high = LockableRegion {
            base: 0xF_0000,
            len: 0x1000,
        };
        assert_eq!(MtrrLock::check(high), Err(ShimError::Unsupported));
    }
}
