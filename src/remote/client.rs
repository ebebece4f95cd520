use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::protocol::{read_frame, write_frame, Reply, Request};
use super::{FetchError, FetchOutcome, RemoteFile, RemoteSource};

/// File server client. Each fetch is a fresh connection, and `timeout`
/// bounds the whole exchange from connect to the last reply byte.
#[derive(Debug, Clone)]
pub struct TcpRemoteClient {
    addr: String,
    timeout: Duration,
}

impl TcpRemoteClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn connect(&self, deadline: Instant) -> Result<TcpStream, FetchError> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|source| FetchError::Connect {
                addr: self.addr.clone(),
                source,
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            let remaining = remaining(deadline).ok_or(FetchError::Timeout)?;
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    return Err(FetchError::Timeout);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(FetchError::Connect {
            addr: self.addr.clone(),
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")),
        })
    }
}

impl RemoteSource for TcpRemoteClient {
    fn fetch(&self, key: &str) -> Result<FetchOutcome, FetchError> {
        let deadline = Instant::now() + self.timeout;
        let stream = self.connect(deadline)?;
        let mut stream = DeadlineStream {
            stream: &stream,
            deadline,
        };

        write_frame(&mut stream, &Request::Fetch { key: key.to_string() })?;
        match read_frame::<_, Reply>(&mut stream)? {
            Reply::Found { size, data } => {
                if data.len() as u64 != size {
                    return Err(FetchError::Protocol(format!(
                        "size echo {size} does not match {} received bytes",
                        data.len()
                    )));
                }
                Ok(FetchOutcome::Found(RemoteFile { size, data }))
            }
            Reply::NotFound => Ok(FetchOutcome::NotFound),
            Reply::Error { errno } => Err(FetchError::Remote(errno)),
        }
    }
}

fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}

/// Socket view that shrinks its timeout on every call so a slow trickle of
/// bytes cannot outlive the deadline.
struct DeadlineStream<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl DeadlineStream<'_> {
    fn left(&self) -> io::Result<Duration> {
        remaining(self.deadline).ok_or_else(|| io::Error::from(io::ErrorKind::TimedOut))
    }
}

impl Read for DeadlineStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_read_timeout(Some(self.left()?))?;
        self.stream.read(buf)
    }
}

impl Write for DeadlineStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.set_write_timeout(Some(self.left()?))?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
