pub mod cache;
pub mod common;
pub mod config;
mod ffi;
pub mod logging;
pub mod remote;
pub mod resolver;

#[cfg(target_os = "linux")]
pub mod linux_preload;

#[cfg(not(target_os = "linux"))]
compile_error!("hostfs only supports Linux targets.");

pub use crate::common::types::*;
pub use crate::ffi::*;
