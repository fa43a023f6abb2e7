// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Physical memory below 1 MiB as seen by real-mode code.
//!
//! All raw address arithmetic lives here: the `PhysMemory` accessors, the
//! fixed regions (IVT, video ROM window) and `FarPtr`, which only exists in
//! forms that satisfy `segment * 16 + offset == address`.

use crate::error::{Result, ShimError};

/// Top of the real-mode address space.
pub const REAL_MODE_LIMIT: u64 = 0x10_0000;

/// Legacy video ROM shadow window.
pub const VGA_ROM_ADDRESS: u64 = 0xC0000;
pub const VGA_ROM_SIZE: usize = 0x10000;

pub const VGA_ROM_WINDOW: LockableRegion = LockableRegion {
    base: VGA_ROM_ADDRESS,
    len: VGA_ROM_SIZE,
};

/// Byte-addressed view of physical memory.
pub trait PhysMemory {
    fn read_u8(&self, addr: u64) -> u8;
    fn write_u8(&mut self, addr: u64, val: u8);

    fn read_u16(&self, addr: u64) -> u16 {
        u16::from_le_bytes([self.read_u8(addr), self.read_u8(addr + 1)])
    }

    fn write_u16(&mut self, addr: u64, val: u16) {
        let [lo, hi] = val.to_le_bytes();
        self.write_u8(addr, lo);
        self.write_u8(addr + 1, hi);
    }

    fn write_bytes(&mut self, addr: u64, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.write_u8(addr + i as u64, b);
        }
    }

    fn read_bytes(&self, addr: u64, out: &mut [u8]) {
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.read_u8(addr + i as u64);
        }
    }

    fn fill(&mut self, addr: u64, len: usize, val: u8) {
        for i in 0..len as u64 {
            self.write_u8(addr + i, val);
        }
    }
}

/// Identity-mapped physical memory while boot services are still running.
///
/// Address 0 is never dereferenced: the lowest byte touched by this crate is
/// the IVT slot for Int10h at 0x40.
pub struct FirmwareMemory {
    _priv: (),
}

impl FirmwareMemory {
    /// # Safety
    /// The caller must be running with the firmware's identity mapping and
    /// must own every address it later reads or writes through this value.
    pub unsafe fn new() -> Self {
        Self { _priv: () }
    }
}

impl PhysMemory for FirmwareMemory {
    #[inline]
    fn read_u8(&self, addr: u64) -> u8 {
        debug_assert!(addr != 0);
        unsafe { core::ptr::read_volatile(addr as usize as *const u8) }
    }

    #[inline]
    fn write_u8(&mut self, addr: u64, val: u8) {
        debug_assert!(addr != 0);
        unsafe { core::ptr::write_volatile(addr as usize as *mut u8, val) }
    }
}

/// A fixed physical range, e.g. the video ROM shadow window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LockableRegion {
    pub base: u64,
    pub len: usize,
}

impl LockableRegion {
    pub fn end(&self) -> u64 {
        self.base + self.len as u64
    }

    pub fn contains(&self, addr: u64) -> bool {
        (self.base..self.end()).contains(&addr)
    }
}

/// Real-mode segment:offset pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct FarPtr {
    pub segment: u16,
    pub offset: u16,
}

impl FarPtr {
    pub const fn new(segment: u16, offset: u16) -> Self {
        Self { segment, offset }
    }

    /// Far pointer to `addr` using the segment that starts exactly at `base`.
    pub fn relative(base: u64, addr: u64) -> Result<Self> {
        if base == 0 || base & 0xF != 0 || base >= REAL_MODE_LIMIT || addr < base {
            return Err(ShimError::InvalidParameter);
        }
        let offset = u16::try_from(addr - base).map_err(|_| ShimError::InvalidParameter)?;
        Ok(Self {
            segment: (base >> 4) as u16,
            offset,
        })
    }

    pub fn phys(&self) -> u64 {
        ((self.segment as u64) << 4) + self.offset as u64
    }

    /// VBE/IVT encoding: offset in the low word, segment in the high word.
    pub fn to_u32(&self) -> u32 {
        ((self.segment as u32) << 16) | self.offset as u32
    }

    pub fn from_u32(raw: u32) -> Self {
        Self {
            segment: (raw >> 16) as u16,
            offset: raw as u16,
        }
    }
}

impl core::fmt::Display for FarPtr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.segment, self.offset)
    }
}
