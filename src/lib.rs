// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! vbeshim: gives a UEFI-only machine a minimal VESA BIOS so that a
//! legacy-minded OS loader finds an Int10h handler and a linear 1024x768
//! framebuffer.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod chainload;
pub mod config;
pub mod console;
pub mod cpu;
pub mod display;
pub mod error;
pub mod firmware;
pub mod install;
pub mod ivt;
pub mod lock;
pub mod logger;
pub mod paths;
pub mod pci;
pub mod realmode;
pub mod vbe;

pub use error::{Result, ShimError};

/// Flat real-mode image from `asm/int10h.asm`; empty when NASM was missing
/// at build time.
pub static INT10H_HANDLER: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/int10h.bin"));

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembled_handler_leaves_room_for_the_records() {
        if INT10H_HANDLER.is_empty() {
            return;
        }
        assert!(INT10H_HANDLER.len() > vbe::RECORDS_SIZE);
        assert!(INT10H_HANDLER.len() <= realmode::VGA_ROM_SIZE);
        assert!(INT10H_HANDLER[..vbe::RECORDS_SIZE].iter().all(|&b| b == 0));
        // cmp ah, 0x4f
        assert_eq!(
            INT10H_HANDLER[vbe::RECORDS_SIZE..][..3],
            [0x80, 0xFC, 0x4F]
        );
    }
}
