// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Backslash-separated UEFI file paths.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

pub const SEPARATOR: char = '\\';

/// Normalize `/` to `\`, drop empty and `.` components and resolve `..`.
/// The result is always absolute.
pub fn clean_up_directories(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['\\', '/']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    for p in &parts {
        out.push(SEPARATOR);
        out.push_str(p);
    }
    if out.is_empty() {
        out.push(SEPARATOR);
    }
    out
}

fn split_dir(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATOR) {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// `\EFI\Boot\bootx64.efi` + `log` -> `\EFI\Boot\bootx64.log`
pub fn change_extension(path: &str, ext: &str) -> String {
    let (dir, name) = split_dir(path);
    let stem = match name.rfind('.') {
        Some(0) | None => name,
        Some(i) => &name[..i],
    };
    let mut out = String::with_capacity(path.len() + ext.len());
    if path.contains(SEPARATOR) {
        out.push_str(dir);
        out.push(SEPARATOR);
    }
    out.push_str(stem);
    out.push('.');
    out.push_str(ext);
    out
}

/// A file next to `path`.
pub fn sibling(path: &str, file_name: &str) -> String {
    let (dir, _) = split_dir(path);
    let mut out = String::with_capacity(dir.len() + file_name.len() + 1);
    out.push_str(dir);
    out.push(SEPARATOR);
    out.push_str(file_name);
    out
}
