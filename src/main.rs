// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
#![cfg_attr(target_os = "uefi", no_std)]
#![cfg_attr(target_os = "uefi", no_main)]

#[cfg(target_os = "uefi")]
mod efi {
    extern crate alloc;

    use alloc::string::String;
    use core::arch::asm;
    use log::{error, info, warn};
    use uefi::fs::FileSystem;
    use uefi::prelude::*;
    use uefi_raw::table::boot::{AllocateType, MemoryType};

    use vbeshim::config::{self, Settings};
    use vbeshim::display::{FirmwareAdapters, ModeNegotiator};
    use vbeshim::install::{self, InstallOutcome, Platform};
    use vbeshim::realmode::FirmwareMemory;
    use vbeshim::{INT10H_HANDLER, VERSION, chainload, console, firmware, lock, logger, paths};

    #[global_allocator]
    static ALLOCATOR: uefi::allocator::Allocator = uefi::allocator::Allocator;

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        error!("[fatal] {}", info);
        unsafe {
            loop {
                asm!("hlt");
            }
        }
    }

    /* ================== IVT page ================== */

    /// Take ownership of the page at physical address 0 so the IVT may be
    /// written. `boot::allocate_pages` refuses address 0, so this goes
    /// through the raw table.
    fn claim_ivt_page() -> bool {
        let Some(st) = uefi::table::system_table_raw() else {
            return false;
        };
        let status = unsafe {
            let bs = &*st.as_ref().boot_services;
            // Some firmware hands the page out early; give it back first.
            let _ = (bs.free_pages)(0, 1);
            let mut addr: u64 = 0;
            (bs.allocate_pages)(
                AllocateType::ADDRESS,
                MemoryType::BOOT_SERVICES_CODE,
                1,
                &mut addr,
            )
        };
        if status.is_error() {
            warn!("unable to claim IVT page at 0x0000: {:?}", status);
            false
        } else {
            info!("IVT page at 0x0000 claimed");
            true
        }
    }

    /* ================== Set-up ================== */

    fn open_volume() -> Option<FileSystem> {
        // Shared: the logger opens the same volume again to flush.
        match firmware::image_volume() {
            Ok(fs) => Some(fs),
            Err(e) => {
                error!("unable to open the boot volume: {}", e);
                None
            }
        }
    }

    fn load_settings(fs: &mut FileSystem, image_path: &str) -> Settings {
        let mut settings = Settings::load(fs, image_path);
        if settings.log_to_file {
            let log_path = paths::sibling(image_path, config::LOG_NAME);
            if let Err(e) = logger::open_log_file(fs, &log_path) {
                logger::discard_file_log();
                warn!("unable to open {}: {}", log_path, e);
                settings.log_to_file = false;
            }
        } else {
            logger::discard_file_log();
        }
        if !settings.verbose && console::read_key_now().is_some_and(|k| console::is_char(&k, 'v')) {
            settings.verbose = true;
        }
        logger::set_verbose(settings.verbose);
        settings
    }

    fn install_shim(settings: &Settings, ivt_claimed: bool) {
        let mut mem = unsafe { FirmwareMemory::new() };
        let mut locks = lock::firmware_strategies();
        let skip = settings.skip_errors;
        let mut pause = || {
            if !skip {
                console::wait_for_enter(true);
            }
        };
        let mut platform = Platform::new(&mut mem, &mut locks, ivt_claimed, &mut pause);
        let mut negotiator = ModeNegotiator::new(FirmwareAdapters);

        match install::install(&mut platform, &mut negotiator, settings, INT10H_HANDLER) {
            Ok(InstallOutcome::AlreadyPresent) => info!("no shim required"),
            Ok(InstallOutcome::Installed { entry, verified }) => {
                info!("shim installed at {} (verified: {})", entry, verified)
            }
            Err(e) => error!("shim not installed: {}", e),
        }
    }

    /* =================================== Entry =================================== */
    #[entry]
    fn main() -> Status {
        unsafe { logger::init() }
        let ivt_claimed = claim_ivt_page();

        let image_path: Option<String> = match chainload::self_image_path() {
            Ok(p) => Some(p),
            Err(e) => {
                error!("unable to locate self-path: {}", e);
                None
            }
        };
        let mut fs = open_volume();

        let settings = match (fs.as_mut(), image_path.as_deref()) {
            (Some(fs), Some(path)) => load_settings(fs, path),
            _ => {
                logger::discard_file_log();
                Settings::default()
            }
        };

        if settings.verbose {
            console::clear_screen();
        }
        info!("vbeshim {}", VERSION);
        if settings.verbose {
            info!("running in verbose mode, press Enter to continue");
            console::wait_for_enter(false);
        }

        if fs.is_some() && image_path.is_some() {
            install_shim(&settings, ivt_claimed);
        }

        match (fs.as_mut(), image_path.as_deref()) {
            (Some(fs), Some(path)) => {
                if let Err(e) = chainload::run(fs, path, settings.verbose) {
                    error!("unable to start the boot loader: {}", e);
                    console::wait_for_enter(true);
                }
            }
            _ => {
                error!("no boot loader to chainload");
                console::wait_for_enter(true);
            }
        }

        logger::flush();
        Status::SUCCESS
    }
}

#[cfg(not(target_os = "uefi"))]
fn main() {
    eprintln!("vbeshim is a UEFI application: build it with --target x86_64-unknown-uefi");
}
