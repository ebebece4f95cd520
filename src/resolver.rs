//! Path resolution policy shared by every path-taking hook.

use std::path::Path;

use crate::cache::{MaterializationCache, Materialized};
use crate::common::keys::canonical_key;
use crate::common::types::{LocalAttempt, Resolution, ResolutionPolicy};

/// Routes literal paths between the local filesystem and the remote tier.
///
/// Holds only borrows: the namespace prefix and the cache are owned by
/// whoever built the interception boundary.
#[derive(Clone, Copy)]
pub struct PathResolver<'a> {
    prefix: &'a str,
    cache: &'a MaterializationCache,
}

impl<'a> PathResolver<'a> {
    /// `prefix` must be in `/name/` form (see `keys::normalize_prefix`).
    pub fn new(prefix: &'a str, cache: &'a MaterializationCache) -> Self {
        Self { prefix, cache }
    }

    pub fn prefix(&self) -> &str {
        self.prefix
    }

    pub fn policy(&self, path: &[u8]) -> ResolutionPolicy {
        if path.is_empty() {
            return ResolutionPolicy::Passthrough;
        }
        let Ok(path) = std::str::from_utf8(path) else {
            return ResolutionPolicy::Passthrough;
        };
        if self.is_cache_artifact(path) {
            return ResolutionPolicy::Passthrough;
        }
        if path.starts_with(self.prefix) {
            return ResolutionPolicy::RemoteForced;
        }
        ResolutionPolicy::LocalFirstFallback
    }

    /// Decides where a path-taking call should land.
    ///
    /// `local` performs the real call on the original path; it runs for
    /// passthrough and fallback paths and never for the remote-forced
    /// namespace. Only `LocalAttempt::Absent` lets the remote tier be
    /// consulted.
    pub fn resolve<T, F>(&self, path: &[u8], local: F) -> Resolution<T>
    where
        F: FnOnce() -> LocalAttempt<T>,
    {
        match self.policy(path) {
            ResolutionPolicy::Passthrough => match local() {
                LocalAttempt::Hit(value) | LocalAttempt::Absent(value) => Resolution::Native(value),
            },
            ResolutionPolicy::RemoteForced => {
                // policy() only returns RemoteForced for valid UTF-8.
                let path = std::str::from_utf8(path).unwrap_or_default();
                let stripped = &path[self.prefix.len()..];
                match canonical_key(stripped) {
                    Ok(key) => {
                        log::trace!("{path}: remote-forced, key {key}");
                        self.from_remote(&key)
                    }
                    Err(err) => {
                        log::debug!("{path}: unusable remote key ({err:?})");
                        Resolution::NotFound
                    }
                }
            }
            ResolutionPolicy::LocalFirstFallback => match local() {
                LocalAttempt::Hit(value) => Resolution::Native(value),
                LocalAttempt::Absent(_) => {
                    let key = std::str::from_utf8(path).unwrap_or_default();
                    log::trace!("{key}: absent locally, trying remote");
                    self.from_remote(key)
                }
            },
        }
    }

    fn from_remote<T>(&self, key: &str) -> Resolution<T> {
        match self.cache.materialize(key) {
            Materialized::Ready(path) => Resolution::Redirect(path),
            Materialized::Missing => Resolution::NotFound,
            Materialized::Failed(kind) => Resolution::Failed(kind),
        }
    }

    fn is_cache_artifact(&self, path: &str) -> bool {
        Path::new(path).starts_with(self.cache.dir())
    }
}
