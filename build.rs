// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
// Assembles the real-mode Int10h handler into a flat binary blob.
use std::{env, fs, path::PathBuf};

const HANDLER_SRC: &str = "asm/int10h.asm";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed={HANDLER_SRC}");

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    let blob = out_dir.join("int10h.bin");

    let target = env::var("TARGET").unwrap_or_default();
    if !(target.starts_with("x86_64-") || target.starts_with("i686-")) {
        println!("cargo:warning=Skipping Int10h handler for non-x86 target: {target}");
        fs::write(&blob, b"").unwrap();
        return;
    }

    let mut build = nasm_rs::Build::new();

    // The handler runs in real mode from the ROM window, so it has to be a
    // flat image (no headers, no relocations). Last `-f` wins in NASM.
    build.flag("-f").flag("bin");
    build.debug(false);
    build.include("asm");
    build.out_dir(&out_dir);
    build.file(HANDLER_SRC);

    match build.compile_objects() {
        Ok(objects) => {
            let Some(obj) = objects.first() else {
                panic!("NASM produced no output for {HANDLER_SRC}");
            };
            fs::copy(obj, &blob).unwrap();
        }
        Err(e) => {
            // Keep the library and its host tests buildable without NASM;
            // the installer refuses to run with an empty blob.
            println!("cargo:warning=NASM build of {HANDLER_SRC} failed: {e}");
            fs::write(&blob, b"").unwrap();
        }
    }
}
