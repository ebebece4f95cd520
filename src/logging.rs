//! `log` backend for a library that lives inside someone else's process.
//!
//! Nothing is installed until the host (or `HOSTFS_LOG`) asks for it, and a
//! host that already set its own `log` backend keeps it. Records go to stderr
//! or to a C callback; neither sink may panic or re-enter itself.

use crate::common::types::{HostfsLogLevel, HostfsLogRecord, HostfsStatus, HostfsStringView};

use core::ffi::{c_char, c_void};
use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::cell::Cell;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

pub type HostfsLogCallback = Option<extern "C" fn(record: *const HostfsLogRecord, user_data: *mut c_void)>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
enum Sink {
    Disabled = 0,
    Stderr = 1,
    Callback = 2,
}

impl Sink {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Sink::Stderr,
            2 => Sink::Callback,
            _ => Sink::Disabled,
        }
    }
}

#[derive(Clone, Copy)]
struct CallbackTarget {
    callback: HostfsLogCallback,
    user_data: usize,
}

thread_local! {
    static EMITTING: Cell<bool> = const { Cell::new(false) };
}

pub struct HostfsLogger {
    sink: AtomicU8,
    level: AtomicU8,
    target: Mutex<CallbackTarget>,
}

impl HostfsLogger {
    const fn new() -> Self {
        Self {
            sink: AtomicU8::new(Sink::Disabled as u8),
            level: AtomicU8::new(HostfsLogLevel::Off as u8),
            target: Mutex::new(CallbackTarget {
                callback: None,
                user_data: 0,
            }),
        }
    }

    fn level(&self) -> Option<Level> {
        level_from_u8(self.level.load(Ordering::Relaxed))
    }

    fn set_level(&self, level: HostfsLogLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
        log::set_max_level(level_filter(level));
    }

    fn sink(&self) -> Sink {
        Sink::from_u8(self.sink.load(Ordering::Relaxed))
    }

    fn set_sink(&self, sink: Sink) {
        self.sink.store(sink as u8, Ordering::Relaxed);
    }

    fn set_callback(&self, callback: HostfsLogCallback, user_data: *mut c_void) {
        *self.target.lock() = CallbackTarget {
            callback,
            user_data: user_data as usize,
        };
    }

    fn emit(&self, record: &Record) {
        match self.sink() {
            Sink::Stderr => {
                // A closed or full stderr must not take the host down.
                let _ = write_line(&mut io::stderr().lock(), std::process::id(), record);
            }
            Sink::Callback => {
                // Copied out so the callback runs without the lock held.
                let target = *self.target.lock();
                let Some(callback) = target.callback else {
                    return;
                };
                let message = record.args().to_string();
                let out = HostfsLogRecord {
                    level: hostfs_level(record.level()),
                    target: string_view(record.target()),
                    message: string_view(&message),
                    file: string_view(record.file().unwrap_or("")),
                    line: record.line().unwrap_or(0),
                };
                callback(&out, target.user_data as *mut c_void);
            }
            Sink::Disabled => {}
        }
    }
}

impl Log for HostfsLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let Some(level) = self.level() else {
            return false;
        };
        metadata.level() <= level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Records raised while a sink runs on this thread are dropped.
        if EMITTING.with(|flag| flag.replace(true)) {
            return;
        }
        self.emit(record);
        EMITTING.with(|flag| flag.set(false));
    }

    fn flush(&self) {}
}

/// `[hostfs:<pid>][LEVEL] target: message`. The pid is taken per record since
/// forked children keep the layer loaded.
fn write_line(out: &mut impl Write, pid: u32, record: &Record) -> io::Result<()> {
    writeln!(out, "[hostfs:{pid}][{}] {}: {}", record.level(), record.target(), record.args())
}

static LOGGER: HostfsLogger = HostfsLogger::new();
static LOGGER_STATE: OnceLock<LoggerInstall> = OnceLock::new();

#[derive(Copy, Clone)]
enum LoggerInstall {
    Installed,
    /// The host process installed its own `log` backend first.
    External,
}

fn init_logger() -> LoggerInstall {
    *LOGGER_STATE.get_or_init(|| match log::set_logger(&LOGGER) {
        Ok(()) => {
            log::set_max_level(LevelFilter::Off);
            LoggerInstall::Installed
        }
        Err(_) => LoggerInstall::External,
    })
}

fn level_filter(level: HostfsLogLevel) -> LevelFilter {
    match level {
        HostfsLogLevel::Off => LevelFilter::Off,
        HostfsLogLevel::Error => LevelFilter::Error,
        HostfsLogLevel::Warn => LevelFilter::Warn,
        HostfsLogLevel::Info => LevelFilter::Info,
        HostfsLogLevel::Debug => LevelFilter::Debug,
        HostfsLogLevel::Trace => LevelFilter::Trace,
    }
}

fn level_from_u8(level: u8) -> Option<Level> {
    match level {
        x if x == HostfsLogLevel::Error as u8 => Some(Level::Error),
        x if x == HostfsLogLevel::Warn as u8 => Some(Level::Warn),
        x if x == HostfsLogLevel::Info as u8 => Some(Level::Info),
        x if x == HostfsLogLevel::Debug as u8 => Some(Level::Debug),
        x if x == HostfsLogLevel::Trace as u8 => Some(Level::Trace),
        _ => None,
    }
}

fn hostfs_level(level: Level) -> HostfsLogLevel {
    match level {
        Level::Error => HostfsLogLevel::Error,
        Level::Warn => HostfsLogLevel::Warn,
        Level::Info => HostfsLogLevel::Info,
        Level::Debug => HostfsLogLevel::Debug,
        Level::Trace => HostfsLogLevel::Trace,
    }
}

fn string_view(value: &str) -> HostfsStringView {
    HostfsStringView {
        ptr: value.as_ptr() as *const c_char,
        len: value.len(),
    }
}

pub fn log_set_stderr(level: HostfsLogLevel) -> HostfsStatus {
    if matches!(init_logger(), LoggerInstall::External) {
        return HostfsStatus::LoggerUnavailable;
    }
    LOGGER.set_sink(Sink::Stderr);
    LOGGER.set_level(level);
    HostfsStatus::Ok
}

/// Routes records to `callback`. The record and its strings are only valid
/// for the duration of the call.
pub fn log_set_callback(
    callback: HostfsLogCallback,
    user_data: *mut c_void,
    level: HostfsLogLevel,
) -> HostfsStatus {
    if callback.is_none() {
        return log_disable();
    }
    if matches!(init_logger(), LoggerInstall::External) {
        return HostfsStatus::LoggerUnavailable;
    }
    LOGGER.set_callback(callback, user_data);
    LOGGER.set_sink(Sink::Callback);
    LOGGER.set_level(level);
    HostfsStatus::Ok
}

pub fn log_set_level(level: HostfsLogLevel) -> HostfsStatus {
    match init_logger() {
        LoggerInstall::Installed => LOGGER.set_level(level),
        LoggerInstall::External => log::set_max_level(level_filter(level)),
    }
    HostfsStatus::Ok
}

pub fn log_disable() -> HostfsStatus {
    match init_logger() {
        LoggerInstall::Installed => {
            LOGGER.set_sink(Sink::Disabled);
            LOGGER.set_level(HostfsLogLevel::Off);
        }
        LoggerInstall::External => log::set_max_level(LevelFilter::Off),
    }
    HostfsStatus::Ok
}
