// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Just enough PCI to find the display controller's framebuffer aperture
//! when the firmware only offers UGA Draw (which has no framebuffer query).

use log::debug;
use x86_64::instructions::port::Port;

const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
const PCI_CONFIG_DATA: u16 = 0xCFC;

const CLASS_DISPLAY: u8 = 0x03;
const REG_COMMAND: u8 = 0x04;
const REG_CLASS: u8 = 0x08;
const REG_HEADER: u8 = 0x0C;
const REG_BAR0: u8 = 0x10;
const CMD_MEMORY_SPACE: u32 = 1 << 1;

/// Type 0 configuration space access.
pub trait PciConfig {
    fn read32(&mut self, bus: u8, slot: u8, func: u8, offset: u8) -> u32;
    fn write32(&mut self, bus: u8, slot: u8, func: u8, offset: u8, value: u32);
}

/// Configuration mechanism #1.
pub struct PortConfig {
    address: Port<u32>,
    data: Port<u32>,
}

impl PortConfig {
    /// # Safety
    /// Port I/O on 0xCF8/0xCFC must not race with other config accesses.
    pub unsafe fn new() -> Self {
        Self {
            address: Port::new(PCI_CONFIG_ADDRESS),
            data: Port::new(PCI_CONFIG_DATA),
        }
    }

    fn select(&mut self, bus: u8, slot: u8, func: u8, offset: u8) {
        let addr = 0x8000_0000u32
            | (bus as u32) << 16
            | (slot as u32) << 11
            | (func as u32) << 8
            | (offset as u32 & 0xFC);
        unsafe { self.address.write(addr) };
    }
}

impl PciConfig for PortConfig {
    fn read32(&mut self, bus: u8, slot: u8, func: u8, offset: u8) -> u32 {
        self.select(bus, slot, func, offset);
        unsafe { self.data.read() }
    }

    fn write32(&mut self, bus: u8, slot: u8, func: u8, offset: u8, value: u32) {
        self.select(bus, slot, func, offset);
        unsafe { self.data.write(value) }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Aperture {
    pub base: u64,
    pub size: u64,
}

/// Largest memory BAR of the first display-class function on the bus.
pub fn find_display_aperture(cfg: &mut dyn PciConfig) -> Option<Aperture> {
    for bus in 0..=255u8 {
        for slot in 0..32u8 {
            let id = cfg.read32(bus, slot, 0, 0x00);
            if id & 0xFFFF == 0xFFFF {
                continue;
            }
            let multi = cfg.read32(bus, slot, 0, REG_HEADER) & 0x0080_0000 != 0;
            for func in 0..if multi { 8 } else { 1 } {
                if cfg.read32(bus, slot, func, 0x00) & 0xFFFF == 0xFFFF {
                    continue;
                }
                let class = (cfg.read32(bus, slot, func, REG_CLASS) >> 24) as u8;
                if class != CLASS_DISPLAY {
                    continue;
                }
                debug!("display controller at {:02x}:{:02x}.{}", bus, slot, func);
                if let Some(ap) = largest_memory_bar(cfg, bus, slot, func) {
                    return Some(ap);
                }
            }
        }
    }
    None
}

fn largest_memory_bar(cfg: &mut dyn PciConfig, bus: u8, slot: u8, func: u8) -> Option<Aperture> {
    let command = cfg.read32(bus, slot, func, REG_COMMAND);
    // Sizing writes all-ones into the BARs; keep the decoder off meanwhile.
    cfg.write32(bus, slot, func, REG_COMMAND, command & !CMD_MEMORY_SPACE);

    let mut best: Option<Aperture> = None;
    let mut index = 0u8;
    while index < 6 {
        let reg = REG_BAR0 + index * 4;
        let low = cfg.read32(bus, slot, func, reg);
        if low & 1 != 0 {
            index += 1;
            continue;
        }
        let is_64 = (low >> 1) & 0b11 == 0b10 && index < 5;

        cfg.write32(bus, slot, func, reg, 0xFFFF_FFFF);
        let low_mask = cfg.read32(bus, slot, func, reg);
        cfg.write32(bus, slot, func, reg, low);

        let (base, mask) = if is_64 {
            let high = cfg.read32(bus, slot, func, reg + 4);
            cfg.write32(bus, slot, func, reg + 4, 0xFFFF_FFFF);
            let high_mask = cfg.read32(bus, slot, func, reg + 4);
            cfg.write32(bus, slot, func, reg + 4, high);
            (
                (high as u64) << 32 | (low & !0xF) as u64,
                (high_mask as u64) << 32 | (low_mask & !0xF) as u64,
            )
        } else {
            (
                (low & !0xF) as u64,
                0xFFFF_FFFF_0000_0000 | (low_mask & !0xF) as u64,
            )
        };

        if mask != 0xFFFF_FFFF_0000_0000 && base != 0 {
            let size = (!mask).wrapping_add(1);
            if best.map_or(true, |b| size > b.size) {
                best = Some(Aperture { base, size });
            }
        }
        index += if is_64 { 2 } else { 1 };
    }

    cfg.write32(bus, slot, func, REG_COMMAND, command);
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// One device with real BAR sizing semantics.
    struct FakeBus {
        regs: HashMap<(u8, u8, u8, u8), u32>,
        sizes: HashMap<u8, u64>,
    }

    impl FakeBus {
        fn display_at(slot: u8) -> Self {
            let mut regs = HashMap::new();
            regs.insert((0, slot, 0, 0x00), 0x1111_1234);
            regs.insert((0, slot, 0, REG_CLASS), 0x0300_0000);
            regs.insert((0, slot, 0, REG_COMMAND), 0x0000_0007);
            // BAR0: 16 MiB prefetchable 32-bit at 0xE000_0000
            regs.insert((0, slot, 0, 0x10), 0xE000_0008);
            // BAR1: 4 KiB MMIO
            regs.insert((0, slot, 0, 0x14), 0xFEB0_0000);
            // BAR2: I/O
            regs.insert((0, slot, 0, 0x18), 0x0000_C001);
            let mut sizes = HashMap::new();
            sizes.insert(0x10, 16 << 20);
            sizes.insert(0x14, 4 << 10);
            Self { regs, sizes }
        }
    }

    impl PciConfig for FakeBus {
        fn read32(&mut self, bus: u8, slot: u8, func: u8, offset: u8) -> u32 {
            *self.regs.get(&(bus, slot, func, offset)).unwrap_or(&0xFFFF_FFFF)
        }

        fn write32(&mut self, bus: u8, slot: u8, func: u8, offset: u8, value: u32) {
            let v = match self.sizes.get(&offset) {
                Some(&size) if value == 0xFFFF_FFFF => (!(size as u32 - 1)) | 0x8,
                _ => value,
            };
            self.regs.insert((bus, slot, func, offset), v);
        }
    }

    #[test]
    fn picks_largest_memory_bar() {
        let mut bus = FakeBus::display_at(2);
        let ap = find_display_aperture(&mut bus).unwrap();
        assert_eq!(
            ap,
            Aperture {
                base: 0xE000_0000,
                size: 16 << 20
            }
        );
        // BARs and the command register are restored.
        assert_eq!(bus.read32(0, 2, 0, 0x10), 0xE000_0008);
        assert_eq!(bus.read32(0, 2, 0, REG_COMMAND), 0x7);
    }

    #[test]
    fn ignores_non_display_devices() {
        let mut bus = FakeBus::display_at(3);
        bus.regs.insert((0, 3, 0, REG_CLASS), 0x0200_0000);
        assert_eq!(find_display_aperture(&mut bus), None);
    }
}
