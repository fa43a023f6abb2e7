// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Handing control to the real boot loader, `<name>.original.efi`.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;
use log::{debug, error, info};
use uefi::boot::{self, LoadImageSource};
use uefi::fs::{FileSystem, Path};
use uefi::proto::BootPolicy;
use uefi::proto::device_path::text::{AllowShortcuts, DisplayOnly};
use uefi::proto::device_path::{DevicePath, build};
use uefi::proto::loaded_image::LoadedImage;
use uefi::CString16;

use crate::console;
use crate::error::{Result, ShimError};
use crate::firmware::open;
use crate::{logger, paths};

pub const ORIGINAL_EXTENSION: &str = "original.efi";

/// Path of the running image on its volume, e.g. `\EFI\Boot\bootx64.efi`.
pub fn self_image_path() -> Result<String> {
    let loaded = open::<LoadedImage>(boot::image_handle())?;
    let file_path = loaded.file_path().ok_or(ShimError::NotFound)?;
    let text = file_path
        .to_string(DisplayOnly(false), AllowShortcuts(false))
        .map_err(|_| ShimError::NotFound)?;
    Ok(paths::clean_up_directories(&String::from(&*text)))
}

/// The loader to chainload: `\EFI\Boot\bootx64.efi` -> `\EFI\Boot\bootx64.original.efi`.
pub fn target_path(image_path: &str) -> String {
    paths::change_extension(image_path, ORIGINAL_EXTENSION)
}

fn exists(fs: &mut FileSystem, path: &str) -> bool {
    CString16::try_from(path)
        .ok()
        .and_then(|p| fs.try_exists(Path::new(&p)).ok())
        .unwrap_or(false)
}

/// Full device path of `file` on the device the running image came from.
fn device_path_for(file: &str) -> Result<Vec<u8>> {
    let loaded = open::<LoadedImage>(boot::image_handle())?;
    let device = loaded.device().ok_or(ShimError::NotFound)?;
    let device_path = open::<DevicePath>(device)?;
    let name = CString16::try_from(file).map_err(|_| ShimError::InvalidParameter)?;

    let mut storage = Vec::new();
    let mut builder = build::DevicePathBuilder::with_vec(&mut storage);
    for node in device_path.node_iter() {
        builder = builder.push(&node).map_err(|_| ShimError::BadBufferSize)?;
    }
    builder
        .push(&build::media::FilePath { path_name: &name })
        .map_err(|_| ShimError::BadBufferSize)?
        .finalize()
        .map_err(|_| ShimError::BadBufferSize)?;
    Ok(storage)
}

pub fn launch(path: &str, verbose: bool) -> Result<()> {
    let storage = device_path_for(path)?;
    let device_path = <&DevicePath>::try_from(storage.as_slice())
        .map_err(|_| ShimError::InvalidParameter)?;
    let image = boot::load_image(
        boot::image_handle(),
        LoadImageSource::FromDevicePath {
            device_path,
            boot_policy: BootPolicy::ExactMatch,
        },
    )?;
    debug!("loaded {}", path);

    if verbose {
        info!("Press Enter to start {}", path);
        console::wait_for_enter_and_stall(false);
    }
    logger::flush();
    boot::start_image(image)?;
    Ok(())
}

/// Locate the original loader, honour a pending F8 and start it.
pub fn run(fs: &mut FileSystem, image_path: &str, verbose: bool) -> Result<()> {
    let target = target_path(image_path);
    if exists(fs, &target) {
        info!("found boot loader at '{}'", target);
    } else {
        error!("could not find boot loader at '{}'", target);
        error!("Press Enter to continue.");
        console::wait_for_enter(false);
    }

    // The F8 press is consumed here; the loader needs a fresh one.
    if !verbose && console::read_key_now().is_some_and(|k| console::is_f8(&k)) {
        console::switch_to_text(false);
        error!("F8 keypress detected, switching to text mode");
        error!("Press Enter to continue and then immediately press F8 again");
        console::wait_for_enter_and_stall(false);
    }

    launch(&target, verbose)
}
