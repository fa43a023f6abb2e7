// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! VBE 3.0 controller and mode information for the one emulated mode.
//!
//! The two records are laid out back to back at the start of the ROM
//! window (see `asm/int10h.asm`): general info at +0, mode info at +256.
//! Every pointer inside them is a far pointer into the same segment.

use bitflags::bitflags;
use log::{debug, error};

use crate::display::{DisplayState, PixelFormat};
use crate::error::{Result, ShimError};
use crate::realmode::{FarPtr, PhysMemory};

pub const VBE_MODE: u16 = 0x00F1;
pub const MODE_WIDTH: u32 = 1024;
pub const MODE_HEIGHT: u32 = 768;
pub const BYTES_PER_PIXEL: u32 = 4;

pub const INFO_BLOCK_SIZE: usize = 256;
pub const MODE_INFO_SIZE: usize = 256;
/// Bytes at the start of the ROM window taken by both records.
pub const RECORDS_SIZE: usize = INFO_BLOCK_SIZE + MODE_INFO_SIZE;

pub const VENDOR_NAME: &[u8] = b"Jotunheim Project\0";
pub const PRODUCT_NAME: &[u8] = b"vbeshim emulated adapter\0";
pub const PRODUCT_REVISION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();

const MODE_LIST_END: u16 = 0xFFFF;
const MEMORY_MODEL_DIRECT_COLOR: u8 = 6;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const DAC_8BIT = 1 << 0;
        const NOT_VGA = 1 << 1;
        const BLANK_RAMDAC = 1 << 2;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct ModeAttributes: u16 {
        const SUPPORTED = 1 << 0;
        const EXTENDED_INFO = 1 << 1;
        const TTY_OUTPUT = 1 << 2;
        const COLOR = 1 << 3;
        const GRAPHICS = 1 << 4;
        const NOT_VGA = 1 << 5;
        const NO_WINDOWED = 1 << 6;
        const LINEAR_FB = 1 << 7;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct DirectColorInfo: u8 {
        const PROGRAMMABLE_RAMP = 1 << 0;
        const RESERVED_USABLE = 1 << 1;
    }
}

/* ================== General information block ================== */

mod info {
    pub const SIGNATURE: usize = 0x00;
    pub const VERSION: usize = 0x04;
    pub const OEM_STRING: usize = 0x06;
    pub const CAPABILITIES: usize = 0x0A;
    pub const MODE_LIST: usize = 0x0E;
    pub const TOTAL_MEMORY: usize = 0x12;
    pub const OEM_SOFTWARE_REV: usize = 0x14;
    pub const VENDOR_NAME: usize = 0x16;
    pub const PRODUCT_NAME: usize = 0x1A;
    pub const PRODUCT_REV: usize = 0x1E;
    /// First byte after the fixed header; strings and the mode list go here.
    pub const SCRATCH: usize = 0x22;
}

/* ================== Mode information block ================== */

mod mode {
    pub const ATTRIBUTES: usize = 0x00;
    pub const WIN_A_ATTRIBUTES: usize = 0x02;
    pub const WIN_B_ATTRIBUTES: usize = 0x03;
    pub const WIN_GRANULARITY: usize = 0x04;
    pub const WIN_SIZE: usize = 0x06;
    pub const WIN_A_SEGMENT: usize = 0x08;
    pub const WIN_B_SEGMENT: usize = 0x0A;
    pub const WIN_FUNC_PTR: usize = 0x0C;
    pub const BYTES_PER_SCAN_LINE: usize = 0x10;
    pub const X_RESOLUTION: usize = 0x12;
    pub const Y_RESOLUTION: usize = 0x14;
    pub const X_CHAR_SIZE: usize = 0x16;
    pub const Y_CHAR_SIZE: usize = 0x17;
    pub const PLANES: usize = 0x18;
    pub const BITS_PER_PIXEL: usize = 0x19;
    pub const BANKS: usize = 0x1A;
    pub const MEMORY_MODEL: usize = 0x1B;
    pub const BANK_SIZE: usize = 0x1C;
    pub const IMAGE_PAGES: usize = 0x1D;
    pub const RESERVED_ONE: usize = 0x1E;
    /// Red mask size; size/position pairs for red, green, blue, reserved.
    pub const COLOR_FIELDS: usize = 0x1F;
    pub const DIRECT_COLOR_INFO: usize = 0x27;
    pub const PHYS_BASE_PTR: usize = 0x28;
    pub const OFF_SCREEN_OFFSET: usize = 0x2C;
    pub const OFF_SCREEN_SIZE: usize = 0x30;
    pub const LIN_BYTES_PER_SCAN_LINE: usize = 0x32;
    pub const BNK_IMAGE_PAGES: usize = 0x34;
    pub const LIN_IMAGE_PAGES: usize = 0x35;
    pub const LIN_COLOR_FIELDS: usize = 0x36;
    pub const MAX_PIXEL_CLOCK: usize = 0x3E;
}

/// Bit offsets of (red, green, blue, reserved) within a pixel.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelLayout {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub reserved: u8,
}

impl ChannelLayout {
    pub const MASK_SIZE: u8 = 8;

    pub fn for_format(format: PixelFormat) -> Result<Self> {
        match format {
            PixelFormat::Bgrx8 => Ok(Self {
                blue: 0,
                green: 8,
                red: 16,
                reserved: 24,
            }),
            PixelFormat::Rgbx8 => Ok(Self {
                red: 0,
                green: 8,
                blue: 16,
                reserved: 24,
            }),
            _ => Err(ShimError::Unsupported),
        }
    }

    /// (size, position) pairs in VBE field order.
    fn fields(&self) -> [u8; 8] {
        let s = Self::MASK_SIZE;
        [s, self.red, s, self.green, s, self.blue, s, self.reserved]
    }
}

/// Linear address of the top-left pixel of a 1024x768 window centered in
/// the real framebuffer.
pub fn centered_lfb(state: &DisplayState) -> u64 {
    let dx = state.width.saturating_sub(MODE_WIDTH) / 2;
    let dy = state.height.saturating_sub(MODE_HEIGHT) / 2;
    let stride_bytes = state.pixels_per_scan_line as u64 * BYTES_PER_PIXEL as u64;
    state.frame_buffer_base + dy as u64 * stride_bytes + dx as u64 * BYTES_PER_PIXEL as u64
}

fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// Appends NUL-terminated strings and the mode list after the info header,
/// handing back far pointers to what it wrote.
struct Scratch<'a> {
    buf: &'a mut [u8; INFO_BLOCK_SIZE],
    base: u64,
    cursor: usize,
}

impl Scratch<'_> {
    fn push(&mut self, bytes: &[u8]) -> Result<FarPtr> {
        let end = self.cursor + bytes.len();
        if end > INFO_BLOCK_SIZE {
            return Err(ShimError::BadBufferSize);
        }
        self.buf[self.cursor..end].copy_from_slice(bytes);
        let ptr = FarPtr::relative(self.base, self.base + self.cursor as u64)?;
        self.cursor = end;
        Ok(ptr)
    }
}

pub fn build_info_block(base: u64, state: &DisplayState) -> Result<[u8; INFO_BLOCK_SIZE]> {
    let mut buf = [0u8; INFO_BLOCK_SIZE];
    buf[info::SIGNATURE..info::SIGNATURE + 4].copy_from_slice(b"VESA");
    put_u16(&mut buf, info::VERSION, 0x0300);
    put_u32(&mut buf, info::CAPABILITIES, Capabilities::DAC_8BIT.bits());
    let total_64k = (state.frame_buffer_size as u64).div_ceil(0x10000);
    put_u16(&mut buf, info::TOTAL_MEMORY, total_64k.min(u16::MAX as u64) as u16);
    put_u16(&mut buf, info::OEM_SOFTWARE_REV, 0x0000);

    let mut modes = [0u8; 4];
    modes[..2].copy_from_slice(&VBE_MODE.to_le_bytes());
    modes[2..].copy_from_slice(&MODE_LIST_END.to_le_bytes());

    let mut scratch = Scratch {
        buf: &mut buf,
        base,
        cursor: info::SCRATCH,
    };
    let oem = scratch.push(VENDOR_NAME)?;
    let mode_list = scratch.push(&modes)?;
    let vendor = scratch.push(VENDOR_NAME)?;
    let product = scratch.push(PRODUCT_NAME)?;
    let revision = scratch.push(PRODUCT_REVISION)?;

    put_u32(&mut buf, info::OEM_STRING, oem.to_u32());
    put_u32(&mut buf, info::MODE_LIST, mode_list.to_u32());
    put_u32(&mut buf, info::VENDOR_NAME, vendor.to_u32());
    put_u32(&mut buf, info::PRODUCT_NAME, product.to_u32());
    put_u32(&mut buf, info::PRODUCT_REV, revision.to_u32());
    Ok(buf)
}

pub fn build_mode_info(state: &DisplayState) -> Result<[u8; MODE_INFO_SIZE]> {
    let layout = ChannelLayout::for_format(state.pixel_format)?;
    let lfb = u32::try_from(centered_lfb(state)).map_err(|_| ShimError::Unsupported)?;
    let pitch = u16::try_from(state.pixels_per_scan_line as u64 * BYTES_PER_PIXEL as u64)
        .map_err(|_| ShimError::Unsupported)?;

    let attributes = ModeAttributes::SUPPORTED
        | ModeAttributes::EXTENDED_INFO
        | ModeAttributes::COLOR
        | ModeAttributes::GRAPHICS
        | ModeAttributes::NOT_VGA
        | ModeAttributes::NO_WINDOWED
        | ModeAttributes::LINEAR_FB;

    let mut buf = [0u8; MODE_INFO_SIZE];
    put_u16(&mut buf, mode::ATTRIBUTES, attributes.bits());

    // Linear framebuffer only: no windows, no banks.
    buf[mode::WIN_A_ATTRIBUTES] = 0;
    buf[mode::WIN_B_ATTRIBUTES] = 0;
    put_u16(&mut buf, mode::WIN_GRANULARITY, 0);
    put_u16(&mut buf, mode::WIN_SIZE, 0);
    put_u16(&mut buf, mode::WIN_A_SEGMENT, 0);
    put_u16(&mut buf, mode::WIN_B_SEGMENT, 0);
    put_u32(&mut buf, mode::WIN_FUNC_PTR, 0);
    buf[mode::BANKS] = 1;
    buf[mode::BANK_SIZE] = 0;
    buf[mode::IMAGE_PAGES] = 0;

    put_u16(&mut buf, mode::BYTES_PER_SCAN_LINE, pitch);
    put_u16(&mut buf, mode::X_RESOLUTION, MODE_WIDTH as u16);
    put_u16(&mut buf, mode::Y_RESOLUTION, MODE_HEIGHT as u16);
    buf[mode::X_CHAR_SIZE] = 8;
    buf[mode::Y_CHAR_SIZE] = 16;
    buf[mode::PLANES] = 1;
    buf[mode::BITS_PER_PIXEL] = (BYTES_PER_PIXEL * 8) as u8;
    buf[mode::MEMORY_MODEL] = MEMORY_MODEL_DIRECT_COLOR;
    buf[mode::RESERVED_ONE] = 1;

    buf[mode::COLOR_FIELDS..mode::COLOR_FIELDS + 8].copy_from_slice(&layout.fields());
    buf[mode::DIRECT_COLOR_INFO] = DirectColorInfo::RESERVED_USABLE.bits();

    put_u32(&mut buf, mode::PHYS_BASE_PTR, lfb);
    put_u32(&mut buf, mode::OFF_SCREEN_OFFSET, 0);
    put_u16(&mut buf, mode::OFF_SCREEN_SIZE, 0);

    put_u16(&mut buf, mode::LIN_BYTES_PER_SCAN_LINE, pitch);
    buf[mode::BNK_IMAGE_PAGES] = 0;
    buf[mode::LIN_IMAGE_PAGES] = 0;
    buf[mode::LIN_COLOR_FIELDS..mode::LIN_COLOR_FIELDS + 8].copy_from_slice(&layout.fields());
    put_u32(&mut buf, mode::MAX_PIXEL_CLOCK, 0);
    Ok(buf)
}

/// Writes both records at `base` and returns the first byte after them.
pub fn synthesize(mem: &mut dyn PhysMemory, base: u64, state: &DisplayState) -> Result<u64> {
    if base == 0 {
        return Err(ShimError::InvalidParameter);
    }
    if !state.pixel_format.is_linear_32bpp() {
        error!("unsupported pixel format {:?}", state.pixel_format);
        return Err(ShimError::Unsupported);
    }
    if !state.is_consistent() {
        error!("display geometry is inconsistent, refusing to describe it");
        return Err(ShimError::InvalidParameter);
    }

    let info_block = build_info_block(base, state)?;
    let mode_block = build_mode_info(state)?;
    mem.write_bytes(base, &info_block);
    mem.write_bytes(base + INFO_BLOCK_SIZE as u64, &mode_block);

    debug!(
        "VBE records at {:#x}, lfb {:#x}, {} x 64K",
        base,
        centered_lfb(state),
        u16::from_le_bytes([
            info_block[info::TOTAL_MEMORY],
            info_block[info::TOTAL_MEMORY + 1]
        ])
    );
    Ok(base + RECORDS_SIZE as u64)
}
