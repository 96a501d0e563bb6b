use std::io::ErrorKind;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use framecall_frame::{Envelope, EnvelopeReader, EnvelopeWriter, FrameConfig, FrameError};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// Unix domain socket listener for hosts.
///
/// Provides bind/accept/connect over filesystem-path UDS on Linux and macOS,
/// with automatic cleanup of the socket file via `Drop`.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
    frame_config: FrameConfig,
}

impl UnixDomainSocket {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// If the path already exists and is a socket, it is removed first (stale
    /// socket cleanup). Any other existing file is left alone and binding fails.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;
            if metadata.file_type().is_socket() {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(|e| bind_error(&path, e))?;
            } else {
                return Err(bind_error(
                    &path,
                    std::io::Error::new(
                        ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_error(&path, e))?;

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_error(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_error(&path, e))?;

        info!(?path, "host listening on unix domain socket");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
            frame_config: FrameConfig::default(),
        })
    }

    /// Override the frame configuration applied to accepted connections.
    pub fn with_frame_config(mut self, config: FrameConfig) -> Self {
        self.frame_config = config;
        self
    }

    /// Accept an incoming embedded-context connection (blocking).
    pub fn accept(&self) -> Result<StreamTransport> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted connection");
        StreamTransport::with_config(stream, self.frame_config.clone())
    }

    /// Connect to a listening host (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<StreamTransport> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected to unix domain socket");
        StreamTransport::new(stream)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

fn bind_error(path: &Path, source: std::io::Error) -> TransportError {
    TransportError::Bind {
        path: path.to_path_buf(),
        source,
    }
}

/// Framed envelopes over a connected Unix stream.
pub struct StreamTransport {
    reader: EnvelopeReader<UnixStream>,
    writer: EnvelopeWriter<UnixStream>,
    closed: bool,
}

impl StreamTransport {
    /// Wrap a connected stream with default frame configuration.
    pub fn new(stream: UnixStream) -> Result<Self> {
        Self::with_config(stream, FrameConfig::default())
    }

    /// Wrap a connected stream with explicit frame configuration.
    pub fn with_config(stream: UnixStream, config: FrameConfig) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        Ok(Self {
            reader: EnvelopeReader::with_config_unix(reader_stream, config.clone())?,
            writer: EnvelopeWriter::with_config_unix(stream, config)?,
            closed: false,
        })
    }

    /// Connected pair, handy for tests and in-process hosts.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::new(left)?, Self::new(right)?))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Shutdown);
        }
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<Envelope>> {
        loop {
            match self.reader.read_envelope() {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(FrameError::Json(err)) => {
                    warn!(error = %err, "discarding undecodable envelope");
                }
                Err(FrameError::Io(err))
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(None);
                }
                Err(FrameError::ConnectionClosed) => return Err(TransportError::Disconnected),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Transport for StreamTransport {
    fn send(&mut self, envelope: &Envelope) -> Result<()> {
        self.ensure_open()?;
        match self.writer.write_envelope(envelope) {
            Ok(()) => Ok(()),
            Err(FrameError::ConnectionClosed) => Err(TransportError::Disconnected),
            Err(FrameError::Io(err)) if err.kind() == ErrorKind::BrokenPipe => {
                Err(TransportError::Disconnected)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn try_recv(&mut self) -> Result<Option<Envelope>> {
        self.ensure_open()?;
        self.reader.get_ref().set_nonblocking(true)?;
        let result = self.read_next();
        self.reader.get_ref().set_nonblocking(false)?;
        result
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Envelope>> {
        if timeout.is_zero() {
            return self.try_recv();
        }
        self.ensure_open()?;
        self.reader.get_ref().set_read_timeout(Some(timeout))?;
        self.read_next()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("closing stream transport");
        match self.writer.get_ref().shutdown(std::net::Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn transport_name(&self) -> &'static str {
        "unix-domain-socket"
    }
}
