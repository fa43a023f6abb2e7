// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Chipset shadow-RAM control through the Framework and PI legacy region
//! protocols.

use core::ffi::c_void;
use log::debug;
use uefi::boot::ScopedProtocol;
use uefi::proto::{ProtocolPointer, unsafe_protocol};
use uefi::Status;

use super::{LockOp, LockStrategy};
use crate::error::{Result, ShimError};
use crate::firmware;
use crate::realmode::LockableRegion;

type RangeFn<P> =
    unsafe extern "efiapi" fn(this: *mut P, start: u32, length: u32, granularity: *mut u32) -> Status;

/// Intel Framework `EFI_LEGACY_REGION_PROTOCOL`.
#[repr(C)]
#[unsafe_protocol("0fc9013a-0568-4ba9-9b7e-c9c390a6609b")]
pub struct LegacyRegionProtocol {
    _decode: *const c_void,
    lock: RangeFn<LegacyRegionProtocol>,
    _boot_lock: *const c_void,
    unlock: RangeFn<LegacyRegionProtocol>,
}

/// PI `EFI_LEGACY_REGION2_PROTOCOL`.
#[repr(C)]
#[unsafe_protocol("70101eaf-0085-440c-b356-8ee36fef24f0")]
pub struct LegacyRegion2Protocol {
    _decode: *const c_void,
    lock: RangeFn<LegacyRegion2Protocol>,
    _boot_lock: *const c_void,
    unlock: RangeFn<LegacyRegion2Protocol>,
    _get_info: *const c_void,
}

/// Both protocols share the lock/unlock calling convention.
trait RangeControl: Sized {
    fn range_fn(&self, op: LockOp) -> RangeFn<Self>;
}

impl RangeControl for LegacyRegionProtocol {
    fn range_fn(&self, op: LockOp) -> RangeFn<Self> {
        match op {
            LockOp::Lock => self.lock,
            LockOp::Unlock => self.unlock,
        }
    }
}

impl RangeControl for LegacyRegion2Protocol {
    fn range_fn(&self, op: LockOp) -> RangeFn<Self> {
        match op {
            LockOp::Lock => self.lock,
            LockOp::Unlock => self.unlock,
        }
    }
}

fn call<P: RangeControl + ProtocolPointer>(
    proto: &mut ScopedProtocol<P>,
    region: LockableRegion,
    op: LockOp,
) -> Result<Status> {
    let start = u32::try_from(region.base).map_err(|_| ShimError::InvalidParameter)?;
    let length = u32::try_from(region.len).map_err(|_| ShimError::InvalidParameter)?;
    let this: &mut P = proto;
    let f = this.range_fn(op);
    let mut granularity = 0u32;
    let status = unsafe { f(this, start, length, &mut granularity) };
    debug!("granularity {:#x}", granularity);
    Ok(status)
}

macro_rules! region_strategy {
    ($name:ident, $proto:ty, $label:literal) => {
        #[derive(Default)]
        pub struct $name;

        impl LockStrategy for $name {
            fn name(&self) -> &'static str {
                $label
            }

            fn apply(&mut self, region: LockableRegion, op: LockOp) -> Result<()> {
                let (_, mut proto) = firmware::locate::<$proto>()?;
                // The status is informational; the arbiter probes the memory.
                let status = call(&mut proto, region, op)?;
                debug!(
                    "{} {:?} {:#x}+{:#x}: {:?}",
                    $label, op, region.base, region.len, status
                );
                Ok(())
            }
        }
    };
}

region_strategy!(LegacyRegionLock, LegacyRegionProtocol, "EfiLegacyRegionProtocol");
region_strategy!(LegacyRegion2Lock, LegacyRegion2Protocol, "EfiLegacyRegion2Protocol");
