use core::ffi::c_char;
use std::path::PathBuf;

#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HostfsStatus {
    Ok = 0,
    InvalidArgument = 1,
    LoggerUnavailable = 2,
    NotInitialized = 3,
}

#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum HostfsLogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl HostfsLogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(Self::Off),
            "error" | "1" => Some(Self::Error),
            "warn" | "warning" | "2" => Some(Self::Warn),
            "info" | "3" => Some(Self::Info),
            "debug" | "4" => Some(Self::Debug),
            "trace" | "5" => Some(Self::Trace),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct HostfsStringView {
    pub ptr: *const c_char,
    pub len: usize,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct HostfsLogRecord {
    pub level: HostfsLogLevel,
    pub target: HostfsStringView,
    pub message: HostfsStringView,
    pub file: HostfsStringView,
    pub line: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HostfsMetrics {
    pub size: u32,
    pub fetches: u64,
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    pub waits: u64,
    pub entries: u64,
}

/// How a literal path is routed. Recomputed on every call from the path alone.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResolutionPolicy {
    Passthrough,
    RemoteForced,
    LocalFirstFallback,
}

/// Why remote resolution could not produce a file. Both surface as `EIO`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Transport,
    Materialization,
}

impl FailureKind {
    pub fn errno(self) -> i32 {
        libc::EIO
    }
}

/// Outcome of resolving one path-taking call.
///
/// `Native` carries the result of the real call made on the original path,
/// which is returned verbatim. `Redirect` names the materialized copy the real
/// call must be repeated on.
#[derive(Debug, Eq, PartialEq)]
pub enum Resolution<T> {
    Native(T),
    Redirect(PathBuf),
    NotFound,
    Failed(FailureKind),
}

/// Result of the real call on the original path, as seen by the resolver.
#[derive(Debug, Eq, PartialEq)]
pub enum LocalAttempt<T> {
    /// Success, or any failure other than absence.
    Hit(T),
    /// The native call failed because the entry does not exist; carries the
    /// native result so passthrough paths can still return it untouched.
    Absent(T),
}
