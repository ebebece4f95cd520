//! Remote tier: whole-file lookups against the external file server.

pub mod client;
pub mod protocol;

use std::io;

pub use client::TcpRemoteClient;

/// Content of a remote file. `size` is the server's echo of the length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub size: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(RemoteFile),
    NotFound,
}

/// Anything that is neither content nor a definitive absence.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("cannot connect to file server {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("file server did not answer within the timeout")]
    Timeout,
    #[error("file server i/o failed: {0}")]
    Io(io::Error),
    #[error("malformed exchange with file server: {0}")]
    Protocol(String),
    #[error("file server reported errno {0}")]
    Remote(i32),
}

impl From<io::Error> for FetchError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FetchError::Timeout,
            _ => FetchError::Io(err),
        }
    }
}

impl From<protocol::FrameError> for FetchError {
    fn from(err: protocol::FrameError) -> Self {
        match err {
            protocol::FrameError::Io(err) => err.into(),
            other => FetchError::Protocol(other.to_string()),
        }
    }
}

/// Existence-and-content query for one remote key.
pub trait RemoteSource: Send + Sync {
    fn fetch(&self, key: &str) -> Result<FetchOutcome, FetchError>;
}

/// Remote tier used when no server is configured: everything is absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemote;

impl RemoteSource for NoRemote {
    fn fetch(&self, _key: &str) -> Result<FetchOutcome, FetchError> {
        Ok(FetchOutcome::NotFound)
    }
}
