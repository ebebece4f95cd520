use std::ffi::{c_void, CStr};
use std::sync::Mutex;

use hostfs::linux_preload::RealSymbols;
use hostfs::{
    hostfs_log_disable, hostfs_log_set_callback, hostfs_log_set_level, HostfsLogLevel, HostfsLogRecord,
    HostfsStatus,
};

use super::support::*;

#[derive(Debug, Clone)]
struct Captured {
    level: HostfsLogLevel,
    target: String,
    message: String,
}

static CAPTURED: Mutex<Vec<Captured>> = Mutex::new(Vec::new());
static LOG_MUTEX: Mutex<()> = Mutex::new(());

fn view(ptr: *const std::ffi::c_char, len: usize) -> String {
    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) };
    String::from_utf8_lossy(bytes).into_owned()
}

extern "C" fn collect(record: *const HostfsLogRecord, user_data: *mut c_void) {
    let (Some(rec), Some(sink)) = (unsafe { record.as_ref() }, unsafe {
        (user_data as *const Mutex<Vec<Captured>>).as_ref()
    }) else {
        return;
    };
    let captured = Captured {
        level: rec.level,
        target: view(rec.target.ptr, rec.target.len),
        message: view(rec.message.ptr, rec.message.len),
    };
    if let Ok(mut all) = sink.lock() {
        all.push(captured);
    }
}

fn capture_at(level: HostfsLogLevel) {
    hostfs_log_disable();
    CAPTURED.lock().unwrap().clear();
    let sink = &CAPTURED as *const Mutex<Vec<Captured>> as *mut c_void;
    assert_eq!(hostfs_log_set_callback(Some(collect), sink, level), HostfsStatus::Ok);
}

fn captured_mentioning(needle: &str) -> Vec<Captured> {
    CAPTURED
        .lock()
        .unwrap()
        .iter()
        .filter(|record| record.message.contains(needle))
        .cloned()
        .collect()
}

/// Opens a forced-namespace path the server does not have.
fn open_missing(path: &CStr) {
    let tmp = tempfile::tempdir().unwrap();
    let server = FileServer::start(&[]);
    let state = state_for(&server, tmp.path());
    let real = RealSymbols::linked();
    let layer = state.interceptor(&real);
    unsafe {
        assert_eq!(layer.open(path.as_ptr(), libc::O_RDONLY, 0), -1);
    }
    assert_eq!(last_errno(), libc::ENOENT);
    assert_eq!(server.fetches(), 1);
}

#[test]
fn hooked_open_reports_remote_absence_at_debug() {
    let _guard = LOG_MUTEX.lock().unwrap();
    capture_at(HostfsLogLevel::Debug);

    open_missing(c"/host/logging/debug-absent.txt");

    let records = captured_mentioning("logging/debug-absent.txt");
    hostfs_log_disable();
    assert!(
        records.iter().any(|record| record.level == HostfsLogLevel::Debug
            && record.target == "hostfs::cache"
            && record.message.contains("does not exist")),
        "{records:?}"
    );
    assert!(records.iter().all(|record| record.target.starts_with("hostfs::")));
}

#[test]
fn info_level_hides_per_lookup_detail() {
    let _guard = LOG_MUTEX.lock().unwrap();
    capture_at(HostfsLogLevel::Info);

    open_missing(c"/host/logging/info-absent.txt");

    let records = captured_mentioning("logging/info-absent.txt");
    hostfs_log_disable();
    assert!(records.is_empty(), "{records:?}");
}

#[test]
fn level_off_silences_the_callback() {
    let _guard = LOG_MUTEX.lock().unwrap();
    capture_at(HostfsLogLevel::Trace);
    assert_eq!(hostfs_log_set_level(HostfsLogLevel::Off), HostfsStatus::Ok);

    open_missing(c"/host/logging/silent-absent.txt");

    let records = captured_mentioning("logging/silent-absent.txt");
    hostfs_log_disable();
    assert!(records.is_empty(), "{records:?}");
}
