//! Pipe server
//!
//! Serves one client at a time. Each connection is a loop of
//! read-header / dispatch / respond until the client terminates the session,
//! disconnects, or sends something that desynchronizes the stream. The
//! listener then goes back to waiting for the next client. Session state
//! outlives connections.

use crate::backend::ProcessBackend;
use crate::config::HostConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use fulltrust_common::codec::{read_header, skip_payload};
use fulltrust_common::{pipe_path, MessageKind};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Consecutive accept failures after which the endpoint is considered lost
const MAX_ACCEPT_FAILURES: u32 = 50;

/// Run of consecutive accept failures, reset by every accepted client
#[derive(Debug, Default)]
struct AcceptFailures {
    count: u32,
}

impl AcceptFailures {
    fn reset(&mut self) {
        self.count = 0;
    }

    /// Record one failure; fatal once the run reaches [`MAX_ACCEPT_FAILURES`]
    fn record(&mut self, path: &str, source: std::io::Error) -> Result<(), ServerError> {
        self.count += 1;
        if self.count >= MAX_ACCEPT_FAILURES {
            return Err(ServerError::Accept {
                name: path.to_string(),
                attempts: self.count,
                source,
            });
        }
        error!(
            target: "fulltrust_host::server",
            path,
            attempt = self.count,
            error = %source,
            "Accept failed"
        );
        Ok(())
    }
}

/// Resolve once `shutdown` carries `true`
///
/// A dropped sender never resolves: nobody is left to request a shutdown.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let fired = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !fired {
        std::future::pending::<()>().await;
    }
}

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// Client sent `SessionTermination`
    Terminated,
    /// Stream closed by the peer
    Disconnected,
    /// Stream could no longer be trusted
    Fault,
    /// Host is shutting down
    Shutdown,
}

#[cfg(windows)]
mod transport {
    use crate::error::ServerError;
    use std::io;
    use tokio::net::windows::named_pipe::{NamedPipeServer, PipeMode, ServerOptions};
    use tracing::debug;

    pub type PipeStream = NamedPipeServer;

    /// Named pipe endpoint allowing a single instance at a time
    pub struct PipeListener {
        path: String,
        pending: Option<NamedPipeServer>,
    }

    impl PipeListener {
        /// Create the first pipe instance
        ///
        /// Fails if another process already owns the name.
        pub fn bind(path: &str) -> Result<Self, ServerError> {
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .max_instances(1)
                .pipe_mode(PipeMode::Byte)
                .create(path)
                .map_err(|e| match e.kind() {
                    io::ErrorKind::PermissionDenied => ServerError::AlreadyInUse(path.to_string()),
                    _ => ServerError::Bind {
                        name: path.to_string(),
                        source: e,
                    },
                })?;

            Ok(Self {
                path: path.to_string(),
                pending: Some(first),
            })
        }

        pub fn path(&self) -> &str {
            &self.path
        }

        /// Wait for a client on a fresh instance
        ///
        /// The previous connection must have been dropped, since only one
        /// instance may exist.
        pub async fn accept(&mut self) -> io::Result<PipeStream> {
            let server = match self.pending.take() {
                Some(server) => server,
                None => ServerOptions::new()
                    .max_instances(1)
                    .pipe_mode(PipeMode::Byte)
                    .create(&self.path)?,
            };

            debug!(target: "fulltrust_host::server", path = %self.path, "Waiting for client");
            server.connect().await?;
            Ok(server)
        }
    }
}

#[cfg(unix)]
mod transport {
    use crate::error::ServerError;
    use std::io;
    use std::path::PathBuf;
    use tokio::net::{UnixListener, UnixStream};
    use tracing::{debug, warn};

    pub type PipeStream = UnixStream;

    /// Unix domain socket standing in for the named pipe
    pub struct PipeListener {
        path: PathBuf,
        listener: UnixListener,
    }

    impl PipeListener {
        /// Bind the socket, clearing a stale file left by a dead host
        pub fn bind(path: &str) -> Result<Self, ServerError> {
            let socket_path = PathBuf::from(path);
            if socket_path.exists() {
                if std::os::unix::net::UnixStream::connect(&socket_path).is_ok() {
                    return Err(ServerError::AlreadyInUse(path.to_string()));
                }
                warn!(target: "fulltrust_host::server", path, "Removing stale socket");
                let _ = std::fs::remove_file(&socket_path);
            }

            let listener = UnixListener::bind(&socket_path).map_err(|e| ServerError::Bind {
                name: path.to_string(),
                source: e,
            })?;

            Ok(Self {
                path: socket_path,
                listener,
            })
        }

        pub fn path(&self) -> &str {
            self.path.to_str().unwrap_or_default()
        }

        pub async fn accept(&mut self) -> io::Result<PipeStream> {
            debug!(target: "fulltrust_host::server", path = %self.path.display(), "Waiting for client");
            let (stream, _) = self.listener.accept().await?;
            Ok(stream)
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

pub use transport::{PipeListener, PipeStream};

/// Accept loop bound to one session
pub struct PipeServer<B: ProcessBackend> {
    pipe_name: String,
    protocol_version: u8,
    dispatcher: Dispatcher<B>,
}

impl<B: ProcessBackend> PipeServer<B> {
    pub fn new(config: &HostConfig, dispatcher: Dispatcher<B>) -> Self {
        Self {
            pipe_name: config.pipe_name.clone(),
            protocol_version: config.protocol_version,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<B> {
        &self.dispatcher
    }

    /// Create the endpoint for the configured pipe name
    ///
    /// Must be called from within the runtime.
    pub fn bind(&self) -> Result<PipeListener, ServerError> {
        let path = pipe_path(&self.pipe_name);
        let listener = PipeListener::bind(&path)?;
        info!(target: "fulltrust_host::server", path = %path, "Pipe created");
        Ok(listener)
    }

    /// Bind and serve until `shutdown` fires
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let listener = self.bind()?;
        self.serve(listener, shutdown).await
    }

    /// Serve clients from `listener` one after another until `shutdown` fires
    ///
    /// Fails when accepting keeps failing, e.g. because the pipe instance can
    /// no longer be recreated.
    pub async fn serve(
        &self,
        mut listener: PipeListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ServerError> {
        let mut failures = AcceptFailures::default();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok(stream) => {
                    failures.reset();
                    let end = self.serve_connection(stream, &mut shutdown).await;
                    if end == ConnectionEnd::Shutdown {
                        break;
                    }
                }
                Err(e) => {
                    failures.record(listener.path(), e)?;
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }

        info!(target: "fulltrust_host::server", "Server stopped");
        Ok(())
    }

    /// Serve requests on one connected stream
    ///
    /// Shutdown is observed while waiting for a header or a payload. A request
    /// whose payload has been read is always executed and answered.
    pub async fn serve_connection<S>(
        &self,
        mut stream: S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ConnectionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        info!(target: "fulltrust_host::server", "Client connected");

        let end = loop {
            let header = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => break ConnectionEnd::Shutdown,
                header = read_header(&mut stream) => header,
            };

            let header = match header {
                Ok(header) => header,
                Err(e) if e.is_disconnect() => break ConnectionEnd::Disconnected,
                Err(e) => {
                    warn!(target: "fulltrust_host::server", error = %e, "Failed to read header");
                    break ConnectionEnd::Fault;
                }
            };

            if header.version != self.protocol_version {
                debug!(
                    target: "fulltrust_host::server",
                    version = header.version,
                    expected = self.protocol_version,
                    "Protocol version mismatch"
                );
            }

            let outcome = match header.kind {
                MessageKind::Request => {
                    // Reading the payload waits on the client, so it yields to
                    // shutdown; executing a request that was fully read does not.
                    let request = tokio::select! {
                        biased;
                        _ = shutdown_requested(shutdown) => break ConnectionEnd::Shutdown,
                        request = self.dispatcher.read_request(&header, &mut stream) => request,
                    };
                    match request {
                        Ok(request) => self.dispatcher.execute(&header, request, &mut stream).await,
                        Err(e) => Err(e),
                    }
                }
                MessageKind::SessionTermination => break ConnectionEnd::Terminated,
                other => {
                    warn!(
                        target: "fulltrust_host::server",
                        kind = ?other,
                        command = %header.command,
                        "Ignoring non-request packet"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(shutdown) => break ConnectionEnd::Shutdown,
                        skipped = skip_payload(&mut stream, &header) => skipped,
                    }
                }
            };

            if let Err(e) = outcome {
                if e.is_disconnect() {
                    break ConnectionEnd::Disconnected;
                }
                warn!(
                    target: "fulltrust_host::server",
                    command = %header.command,
                    error = %e,
                    "Dropping connection"
                );
                break ConnectionEnd::Fault;
            }
        };

        let _ = stream.shutdown().await;
        info!(target: "fulltrust_host::server", reason = ?end, "Client connection closed");
        end
    }
}
