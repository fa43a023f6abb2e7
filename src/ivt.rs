// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Real-mode interrupt vector table.

use log::debug;

use crate::realmode::{FarPtr, LockableRegion, PhysMemory};

pub const IVT_ADDRESS: u64 = 0;
pub const VIDEO_VECTOR: u8 = 0x10;

/// First bytes of a cleared or never-populated shadow ROM.
const PROTECTIVE_OPCODES: [u8; 2] = [0xFF, 0x00];

fn slot(vector: u8) -> u64 {
    IVT_ADDRESS + vector as u64 * 4
}

pub fn read_vector(mem: &dyn PhysMemory, vector: u8) -> FarPtr {
    let at = slot(vector);
    FarPtr::new(mem.read_u16(at + 2), mem.read_u16(at))
}

pub fn write_vector(mem: &mut dyn PhysMemory, vector: u8, ptr: FarPtr) {
    let at = slot(vector);
    mem.write_u16(at, ptr.offset);
    mem.write_u16(at + 2, ptr.segment);
}

/// Whether something that looks like an Int10h handler is installed.
///
/// A vector pointing outside `window` is trusted. Inside it, a handler whose
/// first byte is a protective opcode is treated as missing.
pub fn is_handler_present(mem: &dyn PhysMemory, window: LockableRegion) -> bool {
    let vector = read_vector(mem, VIDEO_VECTOR);
    let target = vector.phys();
    if !window.contains(target) {
        debug!("Int10h -> {} ({:#x}), outside the video ROM window", vector, target);
        return true;
    }
    let opcode = mem.read_u8(target);
    let present = !PROTECTIVE_OPCODES.contains(&opcode);
    debug!(
        "Int10h -> {} ({:#x}), first opcode {:#04x}: {}",
        vector,
        target,
        opcode,
        if present { "present" } else { "absent" }
    );
    present
}
