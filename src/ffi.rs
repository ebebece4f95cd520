use core::ffi::c_void;

use crate::common::types::*;
use crate::logging::{self, HostfsLogCallback};

#[no_mangle]
pub extern "C" fn hostfs_log_set_stderr(level: HostfsLogLevel) -> HostfsStatus {
    logging::log_set_stderr(level)
}

#[no_mangle]
pub extern "C" fn hostfs_log_set_callback(
    callback: HostfsLogCallback,
    user_data: *mut c_void,
    level: HostfsLogLevel,
) -> HostfsStatus {
    logging::log_set_callback(callback, user_data, level)
}

#[no_mangle]
pub extern "C" fn hostfs_log_set_level(level: HostfsLogLevel) -> HostfsStatus {
    logging::log_set_level(level)
}

#[no_mangle]
pub extern "C" fn hostfs_log_disable() -> HostfsStatus {
    logging::log_disable()
}

/// Snapshot of the process-wide cache counters. Fails with `NotInitialized`
/// until the first hooked call (or the load-time constructor) has set the
/// layer up.
#[no_mangle]
pub extern "C" fn hostfs_get_metrics(out_metrics: *mut HostfsMetrics) -> HostfsStatus {
    let out_metrics = unsafe { out_metrics.as_mut() };
    let Some(out) = out_metrics else {
        return HostfsStatus::InvalidArgument;
    };
    match crate::linux_preload::installed() {
        Some(state) => {
            *out = state.cache().metrics();
            HostfsStatus::Ok
        }
        None => HostfsStatus::NotInitialized,
    }
}
