// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! UEFI Graphics Output Protocol backend.

extern crate alloc;
use alloc::vec::Vec;
use log::debug;
use uefi::Handle;
use uefi::boot::ScopedProtocol;
use uefi::proto::console::gop::{GraphicsOutput, Mode, PixelFormat as GopPixelFormat};

use super::{DisplayBackend, DisplayProtocol, DisplayState, ModeSwitch, PixelFormat};
use crate::error::{Result, ShimError};
use crate::firmware;

pub struct GopBackend {
    handle: Handle,
    gop: Option<ScopedProtocol<GraphicsOutput>>,
}

impl GopBackend {
    pub fn open() -> Option<Self> {
        // Shared: the console keeps drawing through the same instance.
        match firmware::locate::<GraphicsOutput>() {
            Ok((handle, gop)) => Some(Self {
                handle,
                gop: Some(gop),
            }),
            Err(e) => {
                debug!("GraphicsOutput not available: {}", e);
                None
            }
        }
    }

    fn gop(&mut self) -> Result<&mut ScopedProtocol<GraphicsOutput>> {
        self.gop.as_mut().ok_or(ShimError::NoAdapterFound)
    }
}

fn pixel_format(f: GopPixelFormat) -> PixelFormat {
    match f {
        GopPixelFormat::Rgb => PixelFormat::Rgbx8,
        GopPixelFormat::Bgr => PixelFormat::Bgrx8,
        GopPixelFormat::Bitmask => PixelFormat::Bitmask,
        GopPixelFormat::BltOnly => PixelFormat::BltOnly,
    }
}

/// Index of the mode to set for `want`: exact match, else the smallest mode
/// covering it, else the largest mode there is.
pub(crate) fn choose_mode(modes: &[(u32, u32)], want: (u32, u32)) -> Option<(usize, ModeSwitch)> {
    if let Some(i) = modes.iter().position(|&m| m == want) {
        return Some((i, ModeSwitch::Exact));
    }
    let area = |&(w, h): &(u32, u32)| w as u64 * h as u64;
    let covering = modes
        .iter()
        .enumerate()
        .filter(|(_, (w, h))| *w >= want.0 && *h >= want.1)
        .min_by_key(|(_, m)| area(m));
    let (i, &(w, h)) = match covering {
        Some(c) => c,
        None => modes.iter().enumerate().max_by_key(|(_, m)| area(m))?,
    };
    Some((i, ModeSwitch::Nearest(w, h)))
}

impl DisplayBackend for GopBackend {
    fn protocol(&self) -> DisplayProtocol {
        DisplayProtocol::GraphicsOutput
    }

    fn query(&mut self) -> Result<DisplayState> {
        let gop = self.gop()?;
        let info = gop.current_mode_info();
        let (width, height) = info.resolution();
        let mut fb = gop.frame_buffer();
        Ok(DisplayState {
            protocol: DisplayProtocol::GraphicsOutput,
            width: width as u32,
            height: height as u32,
            pixel_format: pixel_format(info.pixel_format()),
            pixels_per_scan_line: info.stride() as u32,
            frame_buffer_base: fb.as_mut_ptr() as u64,
            frame_buffer_size: fb.size(),
        })
    }

    fn request_mode(&mut self, width: u32, height: u32) -> Result<ModeSwitch> {
        let gop = self.gop()?;
        let (cw, ch) = gop.current_mode_info().resolution();
        if (cw as u32, ch as u32) == (width, height) {
            return Ok(ModeSwitch::Exact);
        }

        let modes: Vec<Mode> = gop.modes().collect();
        let sizes: Vec<(u32, u32)> = modes
            .iter()
            .map(|m| {
                let (w, h) = m.info().resolution();
                (w as u32, h as u32)
            })
            .collect();
        let (index, outcome) = choose_mode(&sizes, (width, height)).ok_or(ShimError::Unsupported)?;
        debug!(
            "GOP mode {} ({}x{}) of {} for {}x{}",
            index,
            sizes[index].0,
            sizes[index].1,
            modes.len(),
            width,
            height
        );
        gop.set_mode(&modes[index])?;
        Ok(outcome)
    }

    fn reinitialize(&mut self) -> Result<()> {
        self.gop = None;
        firmware::reconnect(self.handle)?;
        // The driver may publish the new instance on a new child handle.
        let (handle, gop) = firmware::locate::<GraphicsOutput>()?;
        if handle != self.handle {
            debug!("GraphicsOutput moved to a new handle");
        }
        self.handle = handle;
        self.gop = Some(gop);
        Ok(())
    }
}
