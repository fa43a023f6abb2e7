// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Run-time switches, read from `vbeshim.ini` or from marker files next to
//! the running image.
//!
//! ```ini
//! [config]
//! skiperrors=1
//! force_fakevesa=0
//! verbose=1
//! logfile=1
//! ```

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;
use log::debug;
use uefi::CString16;
use uefi::fs::{FileSystem, Path};

use crate::paths;

pub const INI_NAME: &str = "vbeshim.ini";
pub const LOG_NAME: &str = "vbeshim.log";
const SECTION: &str = "config";

const MARKER_SKIP_ERRORS: &str = "vbeshim.skiperrors";
const MARKER_FORCE_FAKE_VESA: &str = "vbeshim.force_fakevesa";
const MARKER_VERBOSE: &str = "vbeshim.verbose";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    /// Never stop at warnings.
    pub skip_errors: bool,
    /// Install the shim even if an Int10h handler seems present.
    pub force_fake_vesa: bool,
    pub verbose: bool,
    pub log_to_file: bool,
}

/// Files next to the running image.
pub trait ConfigFiles {
    fn read(&mut self, path: &str) -> Option<Vec<u8>>;
    fn exists(&mut self, path: &str) -> bool;
}

impl ConfigFiles for FileSystem {
    fn read(&mut self, path: &str) -> Option<Vec<u8>> {
        let path = CString16::try_from(path).ok()?;
        FileSystem::read(self, Path::new(&path)).ok()
    }

    fn exists(&mut self, path: &str) -> bool {
        match CString16::try_from(path) {
            Ok(path) => self.try_exists(Path::new(&path)).unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// `1` enables, anything else (including garbage) disables.
fn flag(value: &str) -> bool {
    value.parse::<u64>() == Ok(1)
}

impl Settings {
    /// Keys outside `[config]` are ignored. Missing keys stay off.
    pub fn parse_ini(text: &str) -> Self {
        let mut settings = Settings::default();
        let mut in_section = false;

        for line in text
            .lines()
            .map(|l| l.split([';', '#']).next().unwrap_or("").trim())
            .filter(|l| !l.is_empty())
        {
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                in_section = name.trim().eq_ignore_ascii_case(SECTION);
                continue;
            }
            if !in_section {
                continue;
            }
            let mut split = line.splitn(2, '=');
            let (key, value) = match (split.next(), split.next()) {
                (Some(k), Some(v)) => (k.trim(), v.trim()),
                _ => continue,
            };
            let key = String::from(key).to_ascii_lowercase();
            match key.as_str() {
                "skiperrors" => settings.skip_errors = flag(value),
                "force_fakevesa" => settings.force_fake_vesa = flag(value),
                "verbose" => settings.verbose = flag(value),
                "logfile" => settings.log_to_file = flag(value),
                other => debug!("unknown config key '{}'", other),
            }
        }
        settings
    }

    /// The ini file wins when present; otherwise marker files switch on
    /// single flags. `image_path` is the running image, already cleaned up.
    pub fn load(files: &mut dyn ConfigFiles, image_path: &str) -> Self {
        let ini = paths::sibling(image_path, INI_NAME);
        if let Some(bytes) = files.read(&ini) {
            debug!("reading {}", ini);
            return Self::parse_ini(&String::from_utf8_lossy(&bytes));
        }

        let mut marker = |name: &str| files.exists(&paths::sibling(image_path, name));
        Settings {
            skip_errors: marker(MARKER_SKIP_ERRORS),
            force_fake_vesa: marker(MARKER_FORCE_FAKE_VESA),
            verbose: marker(MARKER_VERBOSE),
            log_to_file: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeVolume(HashMap<String, Vec<u8>>);

    impl FakeVolume {
        fn with(mut self, path: &str, contents: &str) -> Self {
            self.0.insert(path.into(), contents.as_bytes().to_vec());
            self
        }
    }

    impl ConfigFiles for FakeVolume {
        fn read(&mut self, path: &str) -> Option<Vec<u8>> {
            self.0.get(path).cloned()
        }

        fn exists(&mut self, path: &str) -> bool {
            self.0.contains_key(path)
        }
    }

    const IMAGE: &str = r"\EFI\Boot\bootx64.efi";

    #[test]
    fn parses_config_section() {
        let s = Settings::parse_ini(
            "; vbeshim\n[Config]\r\nskiperrors = 1\nverbose=0\nLOGFILE=1 # keep a log\n",
        );
        assert_eq!(
            s,
            Settings {
                skip_errors: true,
                force_fake_vesa: false,
                verbose: false,
                log_to_file: true
            }
        );
    }

    #[test]
    fn only_one_enables() {
        let s = Settings::parse_ini("[config]\nverbose=2\nskiperrors=yes\nforce_fakevesa=01\n");
        assert!(!s.verbose);
        assert!(!s.skip_errors);
        assert!(s.force_fake_vesa);
    }

    #[test]
    fn other_sections_are_ignored() {
        let s = Settings::parse_ini("verbose=1\n[boot]\nverbose=1\n[config]\nlogfile=1\n");
        assert!(!s.verbose);
        assert!(s.log_to_file);
    }

    #[test]
    fn ini_beats_markers() {
        let mut vol = FakeVolume::default()
            .with(r"\EFI\Boot\vbeshim.ini", "[config]\n")
            .with(r"\EFI\Boot\vbeshim.verbose", "");
        assert_eq!(Settings::load(&mut vol, IMAGE), Settings::default());
    }

    #[test]
    fn markers_without_ini() {
        let mut vol = FakeVolume::default()
            .with(r"\EFI\Boot\vbeshim.skiperrors", "")
            .with(r"\EFI\Boot\vbeshim.force_fakevesa", "")
            .with(r"\vbeshim.verbose", "");
        let s = Settings::load(&mut vol, IMAGE);
        assert!(s.skip_errors);
        assert!(s.force_fake_vesa);
        assert!(!s.verbose);
        assert!(!s.log_to_file);
    }
}
