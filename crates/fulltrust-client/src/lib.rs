//! FullTrust Client
//!
//! Typed request/response calls over the FullTrust pipe protocol, plus a
//! `connect` helper that retries while the host is starting or busy with
//! another client.

use fulltrust_common::codec::{
    read_header, read_json_payload, skip_payload, write_header, write_json_packet,
};
use fulltrust_common::{
    Error, GenericResult, LoadLibraryRequest, MessageKind, PacketCommand, PacketHeader,
    ProcessStartInfoRequest, Result, StartProcessResult,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Retry policy for [`connect`]
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff_ms: 50,
            max_backoff_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Client side of one pipe connection
pub struct FullTrustClient<S> {
    stream: S,
}

impl<S> FullTrustClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Store the launch request on the host
    pub async fn create(&mut self, request: &ProcessStartInfoRequest) -> Result<()> {
        write_json_packet(
            &mut self.stream,
            PacketHeader::request(PacketCommand::Create),
            request,
        )
        .await?;

        let header = self.expect_response(PacketCommand::Create).await?;
        skip_payload(&mut self.stream, &header).await
    }

    pub async fn start_process(&mut self) -> Result<StartProcessResult> {
        self.call(PacketCommand::StartProcess).await
    }

    pub async fn load_library(&mut self, request: &LoadLibraryRequest) -> Result<GenericResult> {
        write_json_packet(
            &mut self.stream,
            PacketHeader::request(PacketCommand::LoadLibrary),
            request,
        )
        .await?;

        let header = self.expect_response(PacketCommand::LoadLibrary).await?;
        self.read_result(&header).await
    }

    pub async fn resume_main_thread(&mut self) -> Result<GenericResult> {
        self.call(PacketCommand::ResumeMainThread).await
    }

    /// Tell the host this client is done; the host then closes the connection
    pub async fn terminate_session(&mut self) -> Result<()> {
        write_header(&mut self.stream, &PacketHeader::session_termination()).await
    }

    /// Send a header-only request and read its JSON result
    async fn call<T: DeserializeOwned>(&mut self, command: PacketCommand) -> Result<T> {
        write_header(&mut self.stream, &PacketHeader::request(command)).await?;
        let header = self.expect_response(command).await?;
        self.read_result(&header).await
    }

    async fn expect_response(&mut self, command: PacketCommand) -> Result<PacketHeader> {
        let header = read_header(&mut self.stream).await?;
        if header.kind != MessageKind::Response || header.command != command {
            return Err(Error::UnexpectedPacket(format!(
                "expected {} response, got {:?} {}",
                command, header.kind, header.command
            )));
        }
        debug!(
            target: "fulltrust_client",
            command = %command,
            length = header.content_length,
            "Received response"
        );
        Ok(header)
    }

    async fn read_result<T: DeserializeOwned>(&mut self, header: &PacketHeader) -> Result<T> {
        read_json_payload(&mut self.stream, header)
            .await?
            .ok_or_else(|| {
                Error::UnexpectedContent(format!("{} response has no payload", header.command))
            })
    }
}

/// Connected pipe stream type on this platform
#[cfg(windows)]
pub type ClientStream = tokio::net::windows::named_pipe::NamedPipeClient;

/// Connected pipe stream type on this platform
#[cfg(unix)]
pub type ClientStream = tokio::net::UnixStream;

#[cfg(windows)]
async fn open(path: &str) -> std::io::Result<ClientStream> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(path)
}

#[cfg(unix)]
async fn open(path: &str) -> std::io::Result<ClientStream> {
    tokio::net::UnixStream::connect(path).await
}

/// Whether `error` means the host may accept us shortly
fn is_transient(error: &std::io::Error) -> bool {
    #[cfg(windows)]
    {
        let busy = windows::Win32::Foundation::ERROR_PIPE_BUSY.0 as i32;
        if error.raw_os_error() == Some(busy) {
            return true;
        }
    }
    matches!(
        error.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    )
}

/// Connect to the host's pipe, retrying with exponential backoff
pub async fn connect(
    pipe_name: &str,
    retry: &RetryConfig,
) -> Result<FullTrustClient<ClientStream>> {
    let path = fulltrust_common::pipe_path(pipe_name);
    let mut attempts = 0;
    let mut backoff_ms = retry.initial_backoff_ms;

    loop {
        attempts += 1;
        match open(&path).await {
            Ok(stream) => {
                debug!(target: "fulltrust_client", path = %path, attempts, "Connected");
                return Ok(FullTrustClient::new(stream));
            }
            Err(e) if is_transient(&e) && attempts <= retry.max_retries => {
                warn!(
                    target: "fulltrust_client",
                    attempt = attempts,
                    error = %e,
                    backoff_ms,
                    "Pipe not available, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = ((backoff_ms as f64 * retry.backoff_multiplier) as u64)
                    .min(retry.max_backoff_ms);
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}
