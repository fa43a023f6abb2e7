// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! `log` backend: UEFI console, COM1 and an optional log file.
//!
//! Errors and warnings always reach the console; everything else only in
//! verbose mode. COM1 and the file buffer see every record.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use heapless::String as LineBuf;
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;
use uart_16550::SerialPort;
use uefi::CString16;
use uefi::fs::{FileSystem, Path};
use uefi::proto::console::text::Color;

use crate::error::{Result, ShimError};
use crate::{console, firmware};

const COM1_BASE: u16 = 0x3F8;
pub const LINE_CAPACITY: usize = 256;

pub type Line = LineBuf<LINE_CAPACITY>;

static COM1: Mutex<Option<SerialPort>> = Mutex::new(None);
static FILE_BUFFER: Mutex<Vec<u8>> = Mutex::new(Vec::new());
static LOG_PATH: Mutex<Option<String>> = Mutex::new(None);

/// Records are buffered until the settings are known.
const FILE_PENDING: u8 = 0;
const FILE_ON: u8 = 1;
const FILE_OFF: u8 = 2;

pub struct ShimLogger {
    verbose: AtomicBool,
    file: AtomicU8,
}

static LOGGER: ShimLogger = ShimLogger {
    verbose: AtomicBool::new(false),
    file: AtomicU8::new(FILE_PENDING),
};

/// Install the logger. Safe to call once; later calls are ignored.
///
/// # Safety
/// Programs the UART at 0x3F8; nothing else may own COM1.
pub unsafe fn init() {
    let mut port = unsafe { SerialPort::new(COM1_BASE) };
    port.init();
    *COM1.lock() = Some(port);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}

pub fn set_verbose(on: bool) {
    LOGGER.verbose.store(on, Ordering::Relaxed);
}

pub fn file_logging() -> bool {
    LOGGER.file.load(Ordering::Relaxed) == FILE_ON
}

/// No log file this run: drop what was buffered and stop buffering.
pub fn discard_file_log() {
    LOGGER.file.store(FILE_OFF, Ordering::Relaxed);
    *LOG_PATH.lock() = None;
    let mut buffer = FILE_BUFFER.lock();
    buffer.clear();
    buffer.shrink_to_fit();
}

/// Whether a record at `level` is shown on screen.
pub fn console_enabled(level: Level, verbose: bool) -> bool {
    verbose || level <= Level::Warn
}

/// Keeps whatever fits instead of failing the whole write.
struct Truncating<'a>(&'a mut Line);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// `LEVEL target: message`, truncated to the line buffer.
pub fn render(record: &Record) -> Line {
    let mut line = Line::new();
    let _ = write!(
        Truncating(&mut line),
        "{:<5} {}: {}",
        record.level(),
        record.target(),
        record.args()
    );
    line
}

fn serial_write(line: &str) {
    if let Some(ref mut port) = *COM1.lock() {
        for &b in line.as_bytes() {
            port.send(b);
        }
        port.send(b'\r');
        port.send(b'\n');
    }
}

fn console_write(record: &Record) {
    let body = match record.level() {
        Level::Error | Level::Warn => Color::Yellow,
        _ => Color::LightGray,
    };
    console::switch_to_text(false);
    uefi::system::with_stdout(|out| {
        let _ = out.set_color(Color::DarkGray, Color::Black);
        let _ = write!(out, "{}: ", record.target());
        let _ = out.set_color(body, Color::Black);
        let _ = writeln!(out, "{}", record.args());
        let _ = out.set_color(Color::LightGray, Color::Black);
    });
}

fn buffer_line(buffer: &mut Vec<u8>, line: &str) {
    buffer.extend_from_slice(line.as_bytes());
    buffer.extend_from_slice(b"\r\n");
}

impl Log for ShimLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let line = render(record);
        serial_write(&line);
        if self.file.load(Ordering::Relaxed) != FILE_OFF {
            buffer_line(&mut FILE_BUFFER.lock(), &line);
        }
        if console_enabled(record.level(), self.verbose.load(Ordering::Relaxed)) {
            console_write(record);
        }
    }

    fn flush(&self) {}
}

/// Where the log file lives.
pub trait LogVolume {
    fn remove(&mut self, path: &str);
    /// Create or truncate `path` and write `contents` to it.
    fn replace(&mut self, path: &str, contents: &[u8]) -> Result<()>;
}

impl LogVolume for FileSystem {
    fn remove(&mut self, path: &str) {
        if let Ok(p) = CString16::try_from(path) {
            let _ = self.remove_file(Path::new(&p));
        }
    }

    fn replace(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        let p = CString16::try_from(path).map_err(|_| ShimError::InvalidParameter)?;
        self.write(Path::new(&p), contents)
            .map_err(|_| ShimError::DeviceError)
    }
}

/// Start logging to `path`, deleting any previous log. Records logged
/// since start-up are already buffered and land in the file too.
pub fn open_log_file(volume: &mut dyn LogVolume, path: &str) -> Result<()> {
    volume.remove(path);
    volume.replace(path, b"")?;
    *LOG_PATH.lock() = Some(String::from(path));
    LOGGER.file.store(FILE_ON, Ordering::Relaxed);
    Ok(())
}

/// Write everything logged so far to the log file, replacing its contents.
pub fn flush_to_file(volume: &mut dyn LogVolume) -> Result<()> {
    let path = match (file_logging(), LOG_PATH.lock().clone()) {
        (true, Some(path)) => path,
        _ => return Ok(()),
    };
    // Released before the write: file system drivers may log too.
    let contents = FILE_BUFFER.lock().clone();
    volume.replace(&path, &contents)
}

/// `flush_to_file` on the volume the image was loaded from. The volume is
/// opened shared, so this works while the caller holds it open as well.
pub fn flush() {
    if !file_logging() {
        return;
    }
    let result = firmware::image_volume().and_then(|mut fs| flush_to_file(&mut fs));
    if let Err(e) = result {
        let mut line = Line::new();
        let _ = write!(Truncating(&mut line), "log file flush failed: {}", e);
        serial_write(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_level_target_and_message() {
        let line = render(
            &Record::builder()
                .level(Level::Warn)
                .target("vbeshim::lock")
                .args(format_args!("no mechanism for {:#x}", 0xC0000))
                .build(),
        );
        assert_eq!(line.as_str(), "WARN  vbeshim::lock: no mechanism for 0xc0000");
    }

    #[test]
    fn long_records_are_truncated_not_dropped() {
        let long = "x".repeat(LINE_CAPACITY * 2);
        let line = render(
            &Record::builder()
                .level(Level::Info)
                .target("t")
                .args(format_args!("{}", long))
                .build(),
        );
        assert!(line.starts_with("INFO  t: xxx"));
        assert!(line.len() <= LINE_CAPACITY);
    }

    #[test]
    fn quiet_console_only_shows_problems() {
        assert!(console_enabled(Level::Error, false));
        assert!(console_enabled(Level::Warn, false));
        assert!(!console_enabled(Level::Info, false));
        assert!(!console_enabled(Level::Debug, false));
        assert!(console_enabled(Level::Debug, true));
    }

    #[derive(Default)]
    struct FakeVolume(std::collections::HashMap<String, Vec<u8>>);

    impl LogVolume for FakeVolume {
        fn remove(&mut self, path: &str) {
            self.0.remove(path);
        }

        fn replace(&mut self, path: &str, contents: &[u8]) -> Result<()> {
            self.0.insert(path.into(), contents.to_vec());
            Ok(())
        }
    }

    fn info(message: &str) {
        LOGGER.log(
            &Record::builder()
                .level(Level::Info)
                .target("vbeshim")
                .args(format_args!("{}", message))
                .build(),
        );
    }

    // The only test touching the global file sink.
    #[test]
    fn log_file_receives_every_record() {
        const PATH: &str = r"\EFI\Boot\vbeshim.log";
        let mut volume = FakeVolume::default();
        volume.replace(PATH, b"stale run").unwrap();

        info("before the settings were read");
        open_log_file(&mut volume, PATH).unwrap();
        assert_eq!(volume.0[PATH], b"");

        info("after");
        flush_to_file(&mut volume).unwrap();
        assert_eq!(
            String::from_utf8(volume.0[PATH].clone()).unwrap(),
            "INFO  vbeshim: before the settings were read\r\nINFO  vbeshim: after\r\n"
        );

        discard_file_log();
        info("dropped");
        volume.replace(PATH, b"kept").unwrap();
        flush_to_file(&mut volume).unwrap();
        assert_eq!(volume.0[PATH], b"kept");
        assert!(FILE_BUFFER.lock().is_empty());
    }

    #[test]
    fn buffered_lines_use_crlf() {
        let mut buf = Vec::new();
        buffer_line(&mut buf, "one");
        buffer_line(&mut buf, "two");
        assert_eq!(buf, b"one\r\ntwo\r\n");
    }
}
