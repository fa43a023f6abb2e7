// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Boot-service helpers shared by the firmware-facing modules.
//!
//! Every open here is `GetProtocol`: nothing the shim touches may be taken
//! away from the drivers and consoles that already use it.

extern crate alloc;
use alloc::vec::Vec;
use log::debug;
use uefi::Handle;
use uefi::boot::{self, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol};
use uefi::fs::FileSystem;
use uefi::proto::ProtocolPointer;
use uefi::proto::device_path::{DevicePath, build};
use uefi::proto::loaded_image::LoadedImage;
use uefi::proto::media::fs::SimpleFileSystem;

use crate::error::{Result, ShimError};

pub fn open<P: ProtocolPointer + ?Sized>(handle: Handle) -> Result<ScopedProtocol<P>> {
    let proto = unsafe {
        boot::open_protocol::<P>(
            OpenProtocolParams {
                handle,
                agent: boot::image_handle(),
                controller: None,
            },
            OpenProtocolAttributes::GetProtocol,
        )
    }?;
    Ok(proto)
}

/// First handle carrying `P`, opened shared.
pub fn locate<P: ProtocolPointer + ?Sized>() -> Result<(Handle, ScopedProtocol<P>)> {
    let handle = boot::get_handle_for_protocol::<P>()?;
    Ok((handle, open::<P>(handle)?))
}

/// The volume the running image was loaded from. May be opened any number
/// of times while other copies are alive.
pub fn image_volume() -> Result<FileSystem> {
    let loaded = open::<LoadedImage>(boot::image_handle())?;
    let device = loaded.device().ok_or(ShimError::NotFound)?;
    let sfs = open::<SimpleFileSystem>(device)?;
    Ok(sfs.into())
}

/// Device path of `child` without its last node.
fn parent_path(child: Handle) -> Result<Vec<u8>> {
    let path = open::<DevicePath>(child)?;
    let nodes: Vec<_> = path.node_iter().collect();
    let (_, parent) = nodes.split_last().ok_or(ShimError::NotFound)?;
    if parent.is_empty() {
        return Err(ShimError::NotFound);
    }

    let mut storage = Vec::new();
    let mut builder = build::DevicePathBuilder::with_vec(&mut storage);
    for node in parent {
        builder = builder.push(node).map_err(|_| ShimError::BadBufferSize)?;
    }
    builder.finalize().map_err(|_| ShimError::BadBufferSize)?;
    Ok(storage)
}

/// The controller whose driver produced the protocols on `child`; `child`
/// itself when it has no parent in the device path.
fn controller_of(child: Handle) -> Handle {
    let parent = parent_path(child).and_then(|storage| {
        let mut path =
            <&DevicePath>::try_from(storage.as_slice()).map_err(|_| ShimError::InvalidParameter)?;
        Ok(boot::locate_device_path::<DevicePath>(&mut path)?)
    });
    match parent {
        Ok(handle) => handle,
        Err(e) => {
            debug!("no parent controller ({}), reconnecting the handle itself", e);
            child
        }
    }
}

/// Stop the drivers behind `child` and bind them again, so the protocol
/// instances on it are rebuilt from scratch. Handles and interfaces taken
/// before this call are stale afterwards.
pub fn reconnect(child: Handle) -> Result<()> {
    let controller = controller_of(child);
    if let Err(e) = boot::disconnect_controller(controller, None, None) {
        debug!("disconnecting controller: {:?}", e);
    }
    boot::connect_controller(controller, None, None, true)?;
    Ok(())
}
