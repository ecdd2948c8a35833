#![cfg_attr(doc, doc = include_str!("../README.md"))]
//!
//! Pipe names map to sockets under `/tmp/.pipe`, the directory created
//! world-accessible on first use. Overlapped-style asynchronous operations
//! are deliberately not offered; callers that need readiness notifications
//! put the descriptors in non-blocking mode and use their own poller.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt as _;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

/// The directory holding every named pipe socket.
pub const PIPE_DIRECTORY: &str = "/tmp/.pipe";

/// The polling interval of [`wait_named_pipe`].
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The filesystem path backing a pipe name.
pub fn pipe_path(name: &str) -> PathBuf {
    Path::new(PIPE_DIRECTORY).join(name)
}

fn ensure_pipe_directory() -> io::Result<()> {
    let dir = Path::new(PIPE_DIRECTORY);

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        // every local user may create and connect pipes
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777))?;
    }

    Ok(())
}

struct RegistryEntry {
    listener: UnixListener,
    references: usize,
}

/// The process-wide table sharing one listening socket between same-named
/// pipe server instances.
///
/// An injected dependency rather than a hidden global: every consumer holds
/// an `Arc<PipeSocketRegistry>` and the table dies with the last holder.
#[derive(Default)]
pub struct PipeSocketRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl PipeSocketRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns a duplicated descriptor of the shared listening socket for
    /// `name`, binding it on first use.
    fn acquire(&self, name: &str) -> io::Result<UnixListener> {
        let mut entries = self.entries.lock().expect("registry lock");

        if let Some(entry) = entries.get_mut(name) {
            entry.references += 1;
            trace!(name, references = entry.references, "Shared pipe listener reused");
            return entry.listener.try_clone();
        }

        ensure_pipe_directory()?;

        let path = pipe_path(name);
        // a previous unclean shutdown may have left the socket file behind
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        let duplicate = listener.try_clone()?;

        debug!(name, "Bound shared pipe listener");

        entries.insert(
            name.to_owned(),
            RegistryEntry {
                listener,
                references: 1,
            },
        );

        Ok(duplicate)
    }

    /// Drops one reference; the last release closes the base socket and
    /// removes the socket file.
    fn release(&self, name: &str) {
        let mut entries = self.entries.lock().expect("registry lock");

        let Some(entry) = entries.get_mut(name) else {
            return;
        };

        debug_assert!(entry.references > 0);
        entry.references -= 1;

        if entry.references == 0 {
            entries.remove(name);
            let _ = std::fs::remove_file(pipe_path(name));
            debug!(name, "Closed shared pipe listener");
        }
    }

    /// The number of live instances sharing `name`, zero when unknown.
    pub fn reference_count(&self, name: &str) -> usize {
        self.entries
            .lock()
            .expect("registry lock")
            .get(name)
            .map(|entry| entry.references)
            .unwrap_or(0)
    }

    /// The number of distinct base sockets currently registered.
    pub fn socket_count(&self) -> usize {
        self.entries.lock().expect("registry lock").len()
    }
}

/// One server instance of a named pipe.
///
/// Several instances may share a name; each accepted connection is served by
/// exactly one of them, whichever duplicated descriptor draws it.
pub struct NamedPipeServer {
    name: String,
    listener: UnixListener,
    registry: Arc<PipeSocketRegistry>,
}

impl NamedPipeServer {
    pub fn create(registry: &Arc<PipeSocketRegistry>, name: &str) -> io::Result<Self> {
        let listener = registry.acquire(name)?;

        Ok(Self {
            name: name.to_owned(),
            listener,
            registry: Arc::clone(registry),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.listener.set_nonblocking(nonblocking)
    }

    /// Accepts one client connection on this instance's descriptor.
    pub fn accept(&self) -> io::Result<NamedPipeStream> {
        let (stream, _) = self.listener.accept()?;
        Ok(NamedPipeStream { inner: stream })
    }
}

impl Drop for NamedPipeServer {
    fn drop(&mut self) {
        self.registry.release(&self.name);
    }
}

/// One end of a connected named pipe.
pub struct NamedPipeStream {
    inner: UnixStream,
}

impl NamedPipeStream {
    /// Connects to a named pipe server.
    pub fn connect(name: &str) -> io::Result<Self> {
        let stream = UnixStream::connect(pipe_path(name))?;
        Ok(Self { inner: stream })
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.inner.set_nonblocking(nonblocking)
    }

    /// Reads available bytes.
    ///
    /// With a non-blocking descriptor and nothing buffered, the would-block
    /// condition is reported as an error so callers can tell "no data yet"
    /// apart from end-of-stream.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    /// Writes as much as the socket accepts.
    ///
    /// A non-blocking descriptor with a full send buffer reports a zero-byte
    /// success; the caller retries once the peer drains.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.write(buf) {
            Ok(n) => Ok(n),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(error) => Err(error),
        }
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.inner.shutdown(std::net::Shutdown::Both)
    }
}

/// Waits until a server instance of `name` is accepting connections, polling
/// every 10 ms up to `timeout`.
pub fn wait_named_pipe(name: &str, timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    let path = pipe_path(name);

    loop {
        match UnixStream::connect(&path) {
            Ok(probe) => {
                drop(probe);
                return Ok(());
            }
            Err(error) => {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, error));
                }
            }
        }

        std::thread::sleep(WAIT_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        // the test binary's pid keeps parallel runs apart
        format!("rdpeer-test-{tag}-{}", std::process::id())
    }

    #[test]
    fn same_named_instances_share_one_socket() {
        let registry = PipeSocketRegistry::new();
        let name = unique_name("shared");

        let first = NamedPipeServer::create(&registry, &name).unwrap();
        let second = NamedPipeServer::create(&registry, &name).unwrap();

        assert_eq!(registry.socket_count(), 1);
        assert_eq!(registry.reference_count(&name), 2);

        drop(first);
        assert_eq!(registry.reference_count(&name), 1);
        assert!(pipe_path(&name).exists());

        drop(second);
        assert_eq!(registry.reference_count(&name), 0);
        assert_eq!(registry.socket_count(), 0);
        assert!(!pipe_path(&name).exists());
    }

    #[test]
    fn connection_is_served_by_a_single_instance() {
        let registry = PipeSocketRegistry::new();
        let name = unique_name("accept");

        let server = NamedPipeServer::create(&registry, &name).unwrap();

        let client_name = name.clone();
        let client = std::thread::spawn(move || {
            wait_named_pipe(&client_name, Duration::from_secs(2)).unwrap();
            let mut stream = NamedPipeStream::connect(&client_name).unwrap();
            stream.write(b"ping").unwrap();
        });

        let mut stream = server.accept().unwrap();
        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        client.join().unwrap();
    }

    #[test]
    fn nonblocking_read_reports_would_block() {
        let registry = PipeSocketRegistry::new();
        let name = unique_name("nonblock");

        let server = NamedPipeServer::create(&registry, &name).unwrap();

        let client = NamedPipeStream::connect(&name).unwrap();

        let mut accepted = server.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let mut buf = [0u8; 16];
        let error = accepted.read(&mut buf).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::WouldBlock);

        drop(client);
    }

    #[test]
    fn wait_named_pipe_times_out() {
        let name = unique_name("missing");
        let error = wait_named_pipe(&name, Duration::from_millis(50)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::TimedOut);
    }
}
