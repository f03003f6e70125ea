//! Request dispatch
//!
//! A request is handled in two phases. [`Dispatcher::read_request`] consumes
//! the payload announced by the header and may be abandoned at any await.
//! [`Dispatcher::execute`] runs the session operation and writes exactly one
//! response, except for unknown commands which get none; once started it
//! should be driven to completion. An `Err` from either phase means the
//! stream can no longer be trusted and the connection must be dropped.

use crate::backend::ProcessBackend;
use crate::error::InjectorError;
use crate::session::SessionManager;
use fulltrust_common::codec::{
    read_json_payload, skip_payload, write_header, write_json_packet,
};
use fulltrust_common::{
    Error, GenericResult, LoadLibraryRequest, PacketCommand, PacketHeader,
    ProcessStartInfoRequest, Result, StartProcessResult,
};
use std::any::Any;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// A request whose payload has been read off the stream
#[derive(Debug)]
pub enum Request {
    Create(ProcessStartInfoRequest),
    StartProcess,
    /// Payload problems that leave the stream aligned become a failure result
    LoadLibrary(std::result::Result<LoadLibraryRequest, InjectorError>),
    ResumeMainThread,
    /// Unknown or `None` command, payload already drained
    Ignored,
}

pub struct Dispatcher<B: ProcessBackend> {
    session: Arc<SessionManager<B>>,
}

impl<B: ProcessBackend> Clone for Dispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
        }
    }
}

impl<B: ProcessBackend> Dispatcher<B> {
    pub fn new(session: Arc<SessionManager<B>>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager<B>> {
        &self.session
    }

    /// Read and execute the request described by `header`
    ///
    /// The payload, if any, is still unread on `stream`.
    pub async fn dispatch<S>(&self, header: &PacketHeader, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        let request = self.read_request(header, stream).await?;
        self.execute(header, request, stream).await
    }

    /// Consume the payload announced by `header`
    pub async fn read_request<S>(&self, header: &PacketHeader, stream: &mut S) -> Result<Request>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        debug!(
            target: "fulltrust_host::dispatcher",
            command = %header.command,
            length = header.content_length,
            "Reading request"
        );

        match header.command {
            PacketCommand::Create => {
                let request: ProcessStartInfoRequest = read_json_payload(stream, header)
                    .await?
                    .ok_or_else(|| {
                        Error::UnexpectedContent("Create request without payload".into())
                    })?;
                Ok(Request::Create(request))
            }
            PacketCommand::StartProcess => {
                skip_payload(stream, header).await?;
                Ok(Request::StartProcess)
            }
            PacketCommand::LoadLibrary => {
                let request = match read_json_payload::<_, LoadLibraryRequest>(stream, header).await
                {
                    Ok(Some(request)) => Ok(request),
                    Ok(None) => Err(InjectorError::InvalidRequest(
                        "LoadLibrary request without payload".into(),
                    )),
                    // The payload was consumed, so the stream is still aligned.
                    Err(e) if !e.is_connection_fault() => {
                        Err(InjectorError::InvalidRequest(e.to_string()))
                    }
                    Err(e) => return Err(e),
                };
                Ok(Request::LoadLibrary(request))
            }
            PacketCommand::ResumeMainThread => {
                skip_payload(stream, header).await?;
                Ok(Request::ResumeMainThread)
            }
            PacketCommand::None | PacketCommand::Unknown(_) => {
                warn!(
                    target: "fulltrust_host::dispatcher",
                    command = %header.command,
                    "Ignoring request with unknown command"
                );
                skip_payload(stream, header).await?;
                Ok(Request::Ignored)
            }
        }
    }

    /// Run `request` against the session and answer it
    pub async fn execute<W>(
        &self,
        header: &PacketHeader,
        request: Request,
        stream: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let response = PacketHeader::response_to(header);

        match request {
            Request::Create(request) => {
                info!(
                    target: "fulltrust_host::dispatcher",
                    application = %request.application_name,
                    arguments = %request.command_line,
                    "Create"
                );
                self.session.store_request(request);
                write_header(stream, &response).await
            }
            Request::StartProcess => {
                let result = match self.run_blocking(|session| session.start_process()).await {
                    Ok(pid) => StartProcessResult::success(pid),
                    Err(e) => {
                        warn!(target: "fulltrust_host::dispatcher", error = %e, "StartProcess failed");
                        StartProcessResult::failure(e.to_string())
                    }
                };
                write_json_packet(stream, response, &result).await
            }
            Request::LoadLibrary(request) => {
                let result = match self.load_library(request).await {
                    Ok(base) => {
                        debug!(
                            target: "fulltrust_host::dispatcher",
                            base = format!("{:#x}", base),
                            "LoadLibrary succeeded"
                        );
                        GenericResult::success()
                    }
                    Err(e) => {
                        warn!(target: "fulltrust_host::dispatcher", error = %e, "LoadLibrary failed");
                        GenericResult::failure(e.to_string())
                    }
                };
                write_json_packet(stream, response, &result).await
            }
            Request::ResumeMainThread => {
                let result = match self.run_blocking(|session| session.resume_main_thread()).await {
                    Ok(_) => GenericResult::success(),
                    Err(e) => {
                        warn!(target: "fulltrust_host::dispatcher", error = %e, "ResumeMainThread failed");
                        GenericResult::failure(e.to_string())
                    }
                };
                write_json_packet(stream, response, &result).await
            }
            Request::Ignored => Ok(()),
        }
    }

    async fn load_library(
        &self,
        request: std::result::Result<LoadLibraryRequest, InjectorError>,
    ) -> std::result::Result<usize, InjectorError> {
        let request = request?;
        info!(
            target: "fulltrust_host::dispatcher",
            library = %request.library_name,
            path = %request.library_path,
            "LoadLibrary"
        );
        self.run_blocking(move |session| session.load_library(&request))
            .await
    }

    /// Run a session operation on the blocking pool
    ///
    /// A panic inside `op` is reported as [`InjectorError::Panicked`].
    async fn run_blocking<T, F>(&self, op: F) -> std::result::Result<T, InjectorError>
    where
        F: FnOnce(&SessionManager<B>) -> std::result::Result<T, InjectorError> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        match tokio::task::spawn_blocking(move || op(session.as_ref())).await {
            Ok(result) => result,
            Err(e) => Err(InjectorError::Panicked(join_error_message(e))),
        }
    }
}

fn join_error_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload: Box<dyn Any + Send> = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SpawnedProcess, TrackedProcess};
    use fulltrust_common::codec::{read_header, read_payload, write_payload};
    use fulltrust_common::{ContentKind, MessageKind};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    #[derive(Default)]
    struct StubBackend {
        panic_on_inject: bool,
    }

    impl ProcessBackend for StubBackend {
        type Process = ();
        type Thread = ();

        fn spawn_suspended(
            &self,
            request: &ProcessStartInfoRequest,
        ) -> std::result::Result<SpawnedProcess<(), ()>, InjectorError> {
            if request.application_name == "missing.exe" {
                return Err(InjectorError::CreateProcess { code: 2 });
            }
            Ok(SpawnedProcess {
                pid: 4242,
                process: (),
                main_thread: (),
            })
        }

        fn inject_library(
            &self,
            _target: &TrackedProcess<()>,
            _library_path: &str,
            _timeout: Duration,
        ) -> std::result::Result<usize, InjectorError> {
            if self.panic_on_inject {
                panic!("injector exploded");
            }
            Ok(0x7FF0_0000)
        }

        fn resume_thread(&self, _thread: &()) -> std::result::Result<u32, InjectorError> {
            Ok(1)
        }
    }

    fn dispatcher(backend: StubBackend) -> Dispatcher<StubBackend> {
        Dispatcher::new(Arc::new(SessionManager::new(
            backend,
            Duration::from_secs(1),
        )))
    }

    /// Write `header` + optional JSON body to the client end, then dispatch it
    async fn roundtrip<T: serde::Serialize>(
        dispatcher: &Dispatcher<StubBackend>,
        command: PacketCommand,
        body: Option<&T>,
    ) -> (PacketHeader, Vec<u8>, DuplexStream) {
        let (mut client, mut server) = duplex(64 * 1024);
        let header = PacketHeader::request(command);
        match body {
            Some(body) => write_json_packet(&mut client, header, body).await.unwrap(),
            None => write_header(&mut client, &header).await.unwrap(),
        }

        let request = read_header(&mut server).await.unwrap();
        dispatcher.dispatch(&request, &mut server).await.unwrap();

        let response = read_header(&mut client).await.unwrap();
        let payload = read_payload(&mut client, &response).await.unwrap();
        (response, payload, client)
    }

    #[tokio::test]
    async fn test_create_stores_request_and_answers_empty() {
        let dispatcher = dispatcher(StubBackend::default());
        let request = ProcessStartInfoRequest::new("notepad.exe");
        let (response, payload, _) =
            roundtrip(&dispatcher, PacketCommand::Create, Some(&request)).await;

        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.command, PacketCommand::Create);
        assert_eq!(response.content_kind, ContentKind::None);
        assert_eq!(response.checksum, 0);
        assert!(payload.is_empty());
        assert!(dispatcher.session().snapshot().has_request);
    }

    #[tokio::test]
    async fn test_start_process_without_create_fails() {
        let dispatcher = dispatcher(StubBackend::default());
        let (response, payload, _) =
            roundtrip::<()>(&dispatcher, PacketCommand::StartProcess, None).await;

        assert_eq!(response.command, PacketCommand::StartProcess);
        assert_eq!(response.content_kind, ContentKind::Json);
        let result: StartProcessResult = serde_json::from_slice(&payload).unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.process_id, None);
        assert_eq!(
            result.error_message.as_deref(),
            Some("No stored process request")
        );
    }

    #[tokio::test]
    async fn test_start_process_reports_pid() {
        let dispatcher = dispatcher(StubBackend::default());
        let request = ProcessStartInfoRequest::new("notepad.exe");
        roundtrip(&dispatcher, PacketCommand::Create, Some(&request)).await;

        let (_, payload, _) =
            roundtrip::<()>(&dispatcher, PacketCommand::StartProcess, None).await;
        let result: StartProcessResult = serde_json::from_slice(&payload).unwrap();
        assert!(result.succeeded);
        assert_eq!(result.process_id, Some(4242));
    }

    #[tokio::test]
    async fn test_start_process_failure_carries_os_code() {
        let dispatcher = dispatcher(StubBackend::default());
        let request = ProcessStartInfoRequest::new("missing.exe");
        roundtrip(&dispatcher, PacketCommand::Create, Some(&request)).await;

        let (_, payload, _) =
            roundtrip::<()>(&dispatcher, PacketCommand::StartProcess, None).await;
        let result: StartProcessResult = serde_json::from_slice(&payload).unwrap();
        assert!(!result.succeeded);
        assert!(result.error_message.unwrap().contains("Error code: 2"));
    }

    #[tokio::test]
    async fn test_load_library_without_process_fails() {
        let dispatcher = dispatcher(StubBackend::default());
        let request = LoadLibraryRequest::new("hook", r"C:\hook.dll");
        let (response, payload, _) =
            roundtrip(&dispatcher, PacketCommand::LoadLibrary, Some(&request)).await;

        assert_eq!(response.command, PacketCommand::LoadLibrary);
        let result: GenericResult = serde_json::from_slice(&payload).unwrap();
        assert_eq!(result, GenericResult::failure("No process running"));
    }

    #[tokio::test]
    async fn test_load_library_with_bad_json_is_a_failure_result() {
        let dispatcher = dispatcher(StubBackend::default());
        let (mut client, mut server) = duplex(4096);

        let mut header = PacketHeader::request(PacketCommand::LoadLibrary);
        write_payload(&mut client, &mut header, ContentKind::Json, b"{\"nope\":1}")
            .await
            .unwrap();

        let request = read_header(&mut server).await.unwrap();
        dispatcher.dispatch(&request, &mut server).await.unwrap();

        let response = read_header(&mut client).await.unwrap();
        let result: GenericResult =
            serde_json::from_slice(&read_payload(&mut client, &response).await.unwrap()).unwrap();
        assert!(!result.succeeded);
        assert!(result.error_message.unwrap().starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn test_panic_in_operation_becomes_failure() {
        let dispatcher = dispatcher(StubBackend {
            panic_on_inject: true,
        });
        roundtrip(
            &dispatcher,
            PacketCommand::Create,
            Some(&ProcessStartInfoRequest::new("game.exe")),
        )
        .await;
        roundtrip::<()>(&dispatcher, PacketCommand::StartProcess, None).await;

        let request = LoadLibraryRequest::new("hook", r"C:\hook.dll");
        let (_, payload, _) =
            roundtrip(&dispatcher, PacketCommand::LoadLibrary, Some(&request)).await;
        let result: GenericResult = serde_json::from_slice(&payload).unwrap();
        assert!(!result.succeeded);
        assert!(result.error_message.unwrap().contains("injector exploded"));

        // The session lock is a parking_lot mutex, so it is not poisoned.
        let (_, payload, _) =
            roundtrip::<()>(&dispatcher, PacketCommand::ResumeMainThread, None).await;
        let result: GenericResult = serde_json::from_slice(&payload).unwrap();
        assert!(result.succeeded);
    }

    #[tokio::test]
    async fn test_resume_twice() {
        let dispatcher = dispatcher(StubBackend::default());
        roundtrip(
            &dispatcher,
            PacketCommand::Create,
            Some(&ProcessStartInfoRequest::new("game.exe")),
        )
        .await;
        roundtrip::<()>(&dispatcher, PacketCommand::StartProcess, None).await;

        let (_, first, _) =
            roundtrip::<()>(&dispatcher, PacketCommand::ResumeMainThread, None).await;
        let (_, second, _) =
            roundtrip::<()>(&dispatcher, PacketCommand::ResumeMainThread, None).await;

        let first: GenericResult = serde_json::from_slice(&first).unwrap();
        let second: GenericResult = serde_json::from_slice(&second).unwrap();
        assert!(first.succeeded);
        assert_eq!(
            second.error_message.as_deref(),
            Some("Main thread handle not available")
        );
    }

    #[tokio::test]
    async fn test_unknown_command_gets_no_response_and_payload_is_drained() {
        let dispatcher = dispatcher(StubBackend::default());
        let (mut client, mut server) = duplex(4096);

        let mut header = PacketHeader::request(PacketCommand::Unknown(9));
        write_payload(&mut client, &mut header, ContentKind::Json, b"{}")
            .await
            .unwrap();
        write_header(&mut client, &PacketHeader::request(PacketCommand::StartProcess))
            .await
            .unwrap();

        let unknown = read_header(&mut server).await.unwrap();
        dispatcher.dispatch(&unknown, &mut server).await.unwrap();

        // The next header is read cleanly, so the unknown payload was skipped.
        let next = read_header(&mut server).await.unwrap();
        assert_eq!(next.command, PacketCommand::StartProcess);
        dispatcher.dispatch(&next, &mut server).await.unwrap();

        let response = read_header(&mut client).await.unwrap();
        assert_eq!(response.command, PacketCommand::StartProcess);
    }

    #[tokio::test]
    async fn test_create_with_corrupt_payload_is_a_protocol_fault() {
        let dispatcher = dispatcher(StubBackend::default());
        let (mut client, mut server) = duplex(4096);

        let body = br#"{"applicationName":"a.exe","commandLine":"","currentDirectory":""}"#;
        let mut header = PacketHeader::request(PacketCommand::Create);
        header.seal(ContentKind::Json, body);
        header.checksum ^= 1;
        client.write_all(&header.to_bytes()).await.unwrap();
        client.write_all(body).await.unwrap();

        let request = read_header(&mut server).await.unwrap();
        let err = dispatcher.dispatch(&request, &mut server).await.unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert!(!dispatcher.session().snapshot().has_request);
    }

    #[tokio::test]
    async fn test_create_without_payload_is_a_protocol_fault() {
        let dispatcher = dispatcher(StubBackend::default());
        let (mut client, mut server) = duplex(4096);
        write_header(&mut client, &PacketHeader::request(PacketCommand::Create))
            .await
            .unwrap();

        let request = read_header(&mut server).await.unwrap();
        assert!(dispatcher.dispatch(&request, &mut server).await.is_err());
    }
}
