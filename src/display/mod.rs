// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Display state: which graphics protocol backs the console and what the
//! hardware is scanning out right now.

extern crate alloc;
use alloc::boxed::Box;
use log::{debug, info};

use crate::error::{Result, ShimError};

pub mod gop;
pub mod negotiate;
pub mod uga;

pub use negotiate::ModeNegotiator;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum DisplayProtocol {
    #[default]
    None,
    GraphicsOutput,
    UgaDraw,
}

/// Channel order of a 32-bit pixel, lowest byte first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// red, green, blue, reserved
    Rgbx8,
    /// blue, green, red, reserved
    #[default]
    Bgrx8,
    Bitmask,
    BltOnly,
}

impl PixelFormat {
    pub fn is_linear_32bpp(self) -> bool {
        matches!(self, PixelFormat::Rgbx8 | PixelFormat::Bgrx8)
    }
}

/// One consistent snapshot of the active mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct DisplayState {
    pub protocol: DisplayProtocol,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub pixels_per_scan_line: u32,
    pub frame_buffer_base: u64,
    pub frame_buffer_size: usize,
}

impl DisplayState {
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes the visible area needs at 4 bytes per pixel.
    pub fn min_frame_buffer_size(&self) -> u64 {
        self.pixels_per_scan_line as u64 * self.height as u64 * 4
    }

    pub fn is_consistent(&self) -> bool {
        if self.protocol == DisplayProtocol::None {
            return false;
        }
        if !self.pixel_format.is_linear_32bpp() {
            return true;
        }
        self.pixels_per_scan_line >= self.width
            && self.frame_buffer_size as u64 >= self.min_frame_buffer_size()
    }
}

/// Outcome of a mode request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModeSwitch {
    Exact,
    /// The requested geometry was not available; this one was set instead.
    Nearest(u32, u32),
}

/// What the negotiator needs from a graphics protocol.
pub trait DisplayBackend {
    fn protocol(&self) -> DisplayProtocol;
    /// Live geometry, never cached.
    fn query(&mut self) -> Result<DisplayState>;
    fn request_mode(&mut self, width: u32, height: u32) -> Result<ModeSwitch>;
    /// Drop the protocol handle and open it again from scratch.
    fn reinitialize(&mut self) -> Result<()>;
}

/// Source of display backends, in the order they should be tried.
pub trait Adapters {
    fn graphics_output(&mut self) -> Option<Box<dyn DisplayBackend>>;
    fn uga_draw(&mut self) -> Option<Box<dyn DisplayBackend>>;
}

/// Adapters exposed by the running firmware.
pub struct FirmwareAdapters;

impl Adapters for FirmwareAdapters {
    fn graphics_output(&mut self) -> Option<Box<dyn DisplayBackend>> {
        gop::GopBackend::open().map(|b| Box::new(b) as Box<dyn DisplayBackend>)
    }

    fn uga_draw(&mut self) -> Option<Box<dyn DisplayBackend>> {
        uga::UgaBackend::open().map(|b| Box::new(b) as Box<dyn DisplayBackend>)
    }
}

/// A discovered display protocol plus its latest snapshot.
pub struct Display {
    backend: Box<dyn DisplayBackend>,
    state: DisplayState,
}

impl Display {
    /// GOP first, UGA Draw second. A GOP that cannot even report its mode
    /// counts as absent.
    pub fn acquire(adapters: &mut dyn Adapters) -> Result<Self> {
        match adapters.graphics_output() {
            Some(gop) => match Self::start(gop) {
                Ok(display) => return Ok(display),
                Err(e) => debug!("GraphicsOutput unusable ({}), trying UgaDraw", e),
            },
            None => debug!("GraphicsOutput not available, trying UgaDraw"),
        }
        let uga = adapters.uga_draw().ok_or(ShimError::NoAdapterFound)?;
        Self::start(uga)
    }

    fn start(backend: Box<dyn DisplayBackend>) -> Result<Self> {
        let mut display = Self {
            backend,
            state: DisplayState::default(),
        };
        display.refresh()?;
        info!(
            "display via {:?}: {}x{}",
            display.state.protocol, display.state.width, display.state.height
        );
        Ok(display)
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn protocol(&self) -> DisplayProtocol {
        self.backend.protocol()
    }

    /// Re-read the live geometry and replace the snapshot wholesale.
    pub fn refresh(&mut self) -> Result<&DisplayState> {
        let state = self.backend.query()?;
        if !state.is_consistent() {
            log::warn!(
                "inconsistent display geometry: {}x{} stride {} fb {:#x}+{:#x}",
                state.width,
                state.height,
                state.pixels_per_scan_line,
                state.frame_buffer_base,
                state.frame_buffer_size
            );
        }
        self.state = state;
        Ok(&self.state)
    }

    pub(crate) fn backend_mut(&mut self) -> &mut dyn DisplayBackend {
        self.backend.as_mut()
    }

    pub fn log_info(&self) {
        let s = &self.state;
        info!("protocol          : {:?}", s.protocol);
        info!("resolution        : {}x{}", s.width, s.height);
        info!("pixel format      : {:?}", s.pixel_format);
        info!("pixels/scan line  : {}", s.pixels_per_scan_line);
        info!(
            "frame buffer      : {:#x} ({} bytes)",
            s.frame_buffer_base, s.frame_buffer_size
        );
    }
}
