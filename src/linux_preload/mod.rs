//! Linux LD_PRELOAD boundary.
//!
//! [`PreloadState`] is the object built once per process: configuration plus
//! the materialization cache. Hooks borrow a [`PathResolver`] from it and pair
//! it with the real symbol table to form an [`Interceptor`].

mod dl;
mod guard;
mod hooks;
mod symbols;

#[cfg(all(feature = "preload", not(test)))]
mod exports;

use std::sync::OnceLock;

pub use guard::LayerGuard;
pub use hooks::Interceptor;
pub use symbols::RealSymbols;

use crate::cache::{CacheError, MaterializationCache};
use crate::common::types::HostfsLogLevel;
use crate::config::PreloadConfig;
use crate::remote::{NoRemote, RemoteSource, TcpRemoteClient};
use crate::resolver::PathResolver;

pub struct PreloadState {
    config: PreloadConfig,
    cache: MaterializationCache,
}

impl PreloadState {
    /// Connects the remote tier named by `config`, or none at all when no
    /// server is configured.
    pub fn from_config(config: PreloadConfig) -> Result<Self, CacheError> {
        let source: Box<dyn RemoteSource> = match &config.server {
            Some(addr) => Box::new(TcpRemoteClient::new(addr.clone(), config.timeout)),
            None => {
                log::info!("no file server configured; remote lookups report absence");
                Box::new(NoRemote)
            }
        };
        Self::with_source(config, source)
    }

    pub fn with_source(config: PreloadConfig, source: Box<dyn RemoteSource>) -> Result<Self, CacheError> {
        let cache = MaterializationCache::new(config.cache_dir(), source)?;
        Ok(Self { config, cache })
    }

    pub fn config(&self) -> &PreloadConfig {
        &self.config
    }

    pub fn cache(&self) -> &MaterializationCache {
        &self.cache
    }

    pub fn resolver(&self) -> PathResolver<'_> {
        PathResolver::new(&self.config.remote_prefix, &self.cache)
    }

    pub fn interceptor<'a>(&'a self, real: &'a RealSymbols) -> Interceptor<'a> {
        Interceptor::new(real, self.resolver())
    }
}

static STATE: OnceLock<Option<PreloadState>> = OnceLock::new();

/// Process-wide state, built from the environment on first use.
///
/// `None` when the cache directory could not be created; hooks then forward
/// every call untouched. Callers must hold a [`LayerGuard`] so the setup's
/// own file system calls are not routed back here.
pub fn global() -> Option<&'static PreloadState> {
    STATE
        .get_or_init(|| {
            let (config, warnings) = PreloadConfig::from_env();
            if config.log_level != HostfsLogLevel::Off {
                crate::logging::log_set_stderr(config.log_level);
            }
            for warning in warnings {
                log::warn!("{warning}");
            }

            match PreloadState::from_config(config) {
                Ok(state) => {
                    log::info!(
                        "hostfs active: namespace {}, server {}",
                        state.config.remote_prefix,
                        state.config.server.as_deref().unwrap_or("<none>")
                    );
                    Some(state)
                }
                Err(err) => {
                    log::error!("{err}; interception disabled");
                    None
                }
            }
        })
        .as_ref()
}

/// The process-wide state if it has already been built.
pub fn installed() -> Option<&'static PreloadState> {
    STATE.get().and_then(Option::as_ref)
}
