//! Worker process launch with socket descriptor handoff.
//!
//! The listener never serves a device itself. Once a device has identified
//! itself, the accepted socket is handed to a freshly spawned proxy process
//! that opens the management session over it. The descriptor is passed by
//! number on the command line and survives `exec` because its close-on-exec
//! flag is cleared in the child.

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::info;

use crate::error::ListenerError;

/// Argument carrying the device identifier
pub const PROXYID_ARG: &str = "--proxyid";
/// Argument carrying the inherited socket descriptor number
pub const SOCKFD_ARG: &str = "--sockfd";
/// Flag disabling keepalive restarts in the worker
pub const DISABLE_KEEPALIVE_ARG: &str = "--disable-keepalive";

/// Launches a worker for an identified device.
///
/// `spawn` takes ownership of the socket. Implementations must either pass
/// it on to the worker or drop it; the caller never touches it again.
pub trait WorkerSpawner: Send + Sync {
    /// Start a worker serving `device_id` over `socket`
    fn spawn(&self, device_id: &str, socket: OwnedFd) -> Result<(), ListenerError>;
}

/// Spawns worker processes of a proxy executable
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    extra_args: Vec<OsString>,
}

impl ProcessSpawner {
    /// Spawn workers running `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// Spawn workers running the current executable
    pub fn current_exe() -> Result<Self, ListenerError> {
        let program = std::env::current_exe().map_err(ListenerError::Executable)?;
        Ok(Self::new(program))
    }

    /// Append arguments passed to every worker after the handoff arguments
    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Executable launched for each worker
    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Full argument list for a worker
    pub fn worker_args(&self, device_id: &str, fd: RawFd) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            PROXYID_ARG.into(),
            device_id.into(),
            SOCKFD_ARG.into(),
            fd.to_string().into(),
            DISABLE_KEEPALIVE_ARG.into(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, device_id: &str, socket: OwnedFd) -> Result<(), ListenerError> {
        let fd = socket.as_raw_fd();

        let mut command = Command::new(&self.program);
        command.args(self.worker_args(device_id, fd));

        // SAFETY: the closure only issues fcntl(2), which is async-signal-safe.
        unsafe {
            command.pre_exec(move || clear_cloexec(fd));
        }

        let child = command.spawn().map_err(|source| ListenerError::Spawn {
            device_id: device_id.to_string(),
            source,
        })?;

        info!(
            "Launched worker for {} (pid {:?}, sockfd {})",
            device_id,
            child.id(),
            fd
        );

        // The child owns its duplicate now; release the listener's copy.
        // Dropping the tokio child handle leaves the process running and
        // lets the runtime reap it when it exits.
        drop(socket);
        Ok(())
    }
}

fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl calls on a descriptor owned by this process.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn test_worker_args() {
        let spawner = ProcessSpawner::new("/usr/bin/junos-proxy")
            .with_extra_args(["--config", "/etc/junos-proxy/proxy.yaml"]);

        let args = spawner.worker_args("vmx1", 7);

        assert_eq!(
            args,
            vec![
                OsString::from("--proxyid"),
                OsString::from("vmx1"),
                OsString::from("--sockfd"),
                OsString::from("7"),
                OsString::from("--disable-keepalive"),
                OsString::from("--config"),
                OsString::from("/etc/junos-proxy/proxy.yaml"),
            ]
        );
    }

    #[test]
    fn test_clear_cloexec() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let fd = stream.as_raw_fd();

        // std opens sockets close-on-exec
        let before = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_ne!(before & libc::FD_CLOEXEC, 0);

        clear_cloexec(fd).unwrap();

        let after = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_eq!(after & libc::FD_CLOEXEC, 0);
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let spawner = ProcessSpawner::new("/nonexistent/junos-proxy");
        let err = spawner.spawn("vmx1", OwnedFd::from(stream)).unwrap_err();

        assert!(matches!(err, ListenerError::Spawn { ref device_id, .. } if device_id == "vmx1"));
    }
}
