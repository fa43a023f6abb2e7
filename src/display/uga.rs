// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! EFI 1.1 UGA Draw backend, for firmware that predates GOP.

use core::ffi::c_void;
use log::debug;
use uefi::boot::ScopedProtocol;
use uefi::proto::unsafe_protocol;
use uefi::{Handle, Status, StatusExt};

use super::{DisplayBackend, DisplayProtocol, DisplayState, ModeSwitch, PixelFormat};
use crate::error::{Result, ShimError};
use crate::firmware;
use crate::pci::{self, Aperture};

const COLOR_DEPTH: u32 = 32;
const REFRESH_RATE: u32 = 60;

/// Resolutions tried when the exact request is refused.
const STANDARD_MODES: [(u32, u32); 9] = [
    (640, 480),
    (800, 600),
    (1024, 768),
    (1152, 864),
    (1280, 800),
    (1280, 1024),
    (1440, 900),
    (1600, 1200),
    (1920, 1080),
];

#[repr(C)]
#[unsafe_protocol("982c298b-f4fa-41cb-b838-77aa688fb839")]
pub struct UgaDrawProtocol {
    get_mode: unsafe extern "efiapi" fn(
        this: *mut UgaDrawProtocol,
        horizontal: *mut u32,
        vertical: *mut u32,
        color_depth: *mut u32,
        refresh_rate: *mut u32,
    ) -> Status,
    set_mode: unsafe extern "efiapi" fn(
        this: *mut UgaDrawProtocol,
        horizontal: u32,
        vertical: u32,
        color_depth: u32,
        refresh_rate: u32,
    ) -> Status,
    blt: *const c_void,
}

impl UgaDrawProtocol {
    fn mode(&mut self) -> uefi::Result<(u32, u32)> {
        let (mut h, mut v, mut depth, mut rate) = (0, 0, 0, 0);
        let f = self.get_mode;
        unsafe { f(self, &mut h, &mut v, &mut depth, &mut rate) }.to_result()?;
        Ok((h, v))
    }

    fn set_mode(&mut self, width: u32, height: u32) -> uefi::Result {
        let f = self.set_mode;
        unsafe { f(self, width, height, COLOR_DEPTH, REFRESH_RATE) }.to_result()
    }
}

pub struct UgaBackend {
    handle: Handle,
    uga: Option<ScopedProtocol<UgaDrawProtocol>>,
    aperture: Option<Aperture>,
}

impl UgaBackend {
    pub fn open() -> Option<Self> {
        let (handle, uga) = match firmware::locate::<UgaDrawProtocol>() {
            Ok(found) => found,
            Err(e) => {
                debug!("UgaDraw not available: {}", e);
                return None;
            }
        };
        let aperture = pci::find_display_aperture(&mut unsafe { pci::PortConfig::new() });
        match aperture {
            Some(ap) => debug!("UGA framebuffer aperture {:#x}+{:#x}", ap.base, ap.size),
            None => debug!("UGA framebuffer aperture not found"),
        }
        Some(Self {
            handle,
            uga: Some(uga),
            aperture,
        })
    }

    fn uga(&mut self) -> Result<&mut ScopedProtocol<UgaDrawProtocol>> {
        self.uga.as_mut().ok_or(ShimError::NoAdapterFound)
    }
}

/// Standard modes other than `want`, nearest first.
pub(crate) fn fallback_modes(want: (u32, u32)) -> impl Iterator<Item = (u32, u32)> {
    let mut modes = STANDARD_MODES;
    modes.sort_unstable_by_key(|&(w, h)| w.abs_diff(want.0) + h.abs_diff(want.1));
    modes.into_iter().filter(move |&m| m != want)
}

impl DisplayBackend for UgaBackend {
    fn protocol(&self) -> DisplayProtocol {
        DisplayProtocol::UgaDraw
    }

    fn query(&mut self) -> Result<DisplayState> {
        let aperture = self.aperture;
        let (width, height) = self.uga()?.mode()?;
        let (base, size) = aperture.map_or((0, 0), |a| (a.base, a.size as usize));
        Ok(DisplayState {
            protocol: DisplayProtocol::UgaDraw,
            width,
            height,
            pixel_format: PixelFormat::Bgrx8,
            pixels_per_scan_line: width,
            frame_buffer_base: base,
            frame_buffer_size: size,
        })
    }

    fn request_mode(&mut self, width: u32, height: u32) -> Result<ModeSwitch> {
        let uga = self.uga()?;
        if uga.set_mode(width, height).is_ok() {
            return Ok(ModeSwitch::Exact);
        }
        for (w, h) in fallback_modes((width, height)) {
            if uga.set_mode(w, h).is_ok() {
                return Ok(ModeSwitch::Nearest(w, h));
            }
        }
        Err(ShimError::Unsupported)
    }

    fn reinitialize(&mut self) -> Result<()> {
        self.uga = None;
        firmware::reconnect(self.handle)?;
        let (handle, uga) = firmware::locate::<UgaDrawProtocol>()?;
        self.handle = handle;
        self.uga = Some(uga);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[test]
    fn fallback_is_nearest_first() {
        let order: Vec<_> = fallback_modes((1024, 768)).take(3).collect();
        assert_eq!(order, [(1152, 864), (1280, 800), (800, 600)]);
    }

    #[test]
    fn fallback_skips_the_request() {
        assert!(fallback_modes((800, 600)).all(|m| m != (800, 600)));
        assert_eq!(fallback_modes((800, 600)).count(), STANDARD_MODES.len() - 1);
    }
}
