// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! CPU feature probing and the cache-disabled window needed to rewrite MTRRs.

use core::arch::asm;
use core::arch::x86_64::__cpuid;

use x86_64::instructions::interrupts;
use x86_64::registers::control::{Cr0, Cr0Flags};
use x86_64::registers::model_specific::Msr;

pub const IA32_MTRRCAP: u32 = 0xFE;
pub const IA32_MTRR_DEF_TYPE: u32 = 0x2FF;

const CPUID_EDX_MTRR: u32 = 1 << 12;
const MTRRCAP_FIX: u64 = 1 << 8;
const DEF_TYPE_FE: u64 = 1 << 10;
const DEF_TYPE_E: u64 = 1 << 11;

/// CPUID.1:EDX.MTRR and IA32_MTRRCAP.FIX.
pub fn has_fixed_mtrrs() -> bool {
    let l1 = unsafe { __cpuid(1) };
    if l1.edx & CPUID_EDX_MTRR == 0 {
        return false;
    }
    let cap = unsafe { Msr::new(IA32_MTRRCAP).read() };
    cap & MTRRCAP_FIX != 0
}

#[inline]
fn wbinvd() {
    unsafe { asm!("wbinvd", options(nostack, preserves_flags)) }
}

/// Run `f` with interrupts masked, caches disabled and flushed, and MTRRs
/// turned off, then restore everything in reverse order.
///
/// # Safety
/// `f` may only touch MTRR MSRs; anything else runs uncached.
pub unsafe fn with_mtrrs_disabled<R>(f: impl FnOnce() -> R) -> R {
    interrupts::without_interrupts(|| {
        let cr0 = Cr0::read();
        unsafe { Cr0::write((cr0 | Cr0Flags::CACHE_DISABLE) - Cr0Flags::NOT_WRITE_THROUGH) };
        wbinvd();

        let mut def_type = Msr::new(IA32_MTRR_DEF_TYPE);
        let saved = unsafe { def_type.read() };
        unsafe { def_type.write(saved & !(DEF_TYPE_E | DEF_TYPE_FE)) };

        let r = f();

        wbinvd();
        unsafe { def_type.write(saved) };
        unsafe { Cr0::write(cr0) };
        r
    })
}
