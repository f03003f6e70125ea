//! Launch session state
//!
//! One [`SessionManager`] exists per host process. It holds the stored launch
//! request and the handles of the process it started, behind a single lock
//! that is held for the whole of every operation, including a full
//! injection. Handles are owned values: replacing or clearing them closes
//! them.

use crate::backend::{ProcessBackend, TrackedProcess};
use crate::error::InjectorError;
use fulltrust_common::{LoadLibraryRequest, ProcessStartInfoRequest};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Mutable session fields
struct Session<B: ProcessBackend> {
    request: Option<ProcessStartInfoRequest>,
    process: Option<TrackedProcess<B::Process>>,
    main_thread: Option<B::Thread>,
}

impl<B: ProcessBackend> Default for Session<B> {
    fn default() -> Self {
        Self {
            request: None,
            process: None,
            main_thread: None,
        }
    }
}

/// Point-in-time view of the session, for logging and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub has_request: bool,
    pub process_id: Option<u32>,
    pub has_main_thread: bool,
}

/// Owner of the session and the backend that acts on it
pub struct SessionManager<B: ProcessBackend> {
    backend: B,
    inject_timeout: Duration,
    state: Mutex<Session<B>>,
}

impl<B: ProcessBackend> SessionManager<B> {
    pub fn new(backend: B, inject_timeout: Duration) -> Self {
        Self {
            backend,
            inject_timeout,
            state: Mutex::new(Session::default()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Store the launch request, replacing any previous one
    pub fn store_request(&self, request: ProcessStartInfoRequest) {
        debug!(
            target: "fulltrust_host::session",
            application = %request.application_name,
            "Stored launch request"
        );
        self.state.lock().request = Some(request);
    }

    /// Launch the stored request suspended and take its handles
    ///
    /// Handles from an earlier launch are released only once the new process
    /// exists; a failed launch leaves the session as it was.
    pub fn start_process(&self) -> Result<u32, InjectorError> {
        let mut state = self.state.lock();

        let request = state.request.as_ref().ok_or(InjectorError::NoStoredRequest)?;
        let spawned = self.backend.spawn_suspended(request)?;

        if let Some(previous) = state.process.as_ref() {
            info!(
                target: "fulltrust_host::session",
                previous_pid = previous.pid,
                pid = spawned.pid,
                "Replacing tracked process"
            );
        }

        state.process = Some(TrackedProcess {
            pid: spawned.pid,
            handle: spawned.process,
        });
        state.main_thread = Some(spawned.main_thread);

        Ok(spawned.pid)
    }

    /// Inject a library into the tracked process
    pub fn load_library(&self, request: &LoadLibraryRequest) -> Result<usize, InjectorError> {
        if request.library_path.is_empty() {
            return Err(InjectorError::InvalidRequest(
                "LibraryPath must not be empty".into(),
            ));
        }

        let state = self.state.lock();
        let target = state.process.as_ref().ok_or(InjectorError::NoProcess)?;

        if let Some(function) = request.function_name.as_deref() {
            debug!(
                target: "fulltrust_host::session",
                library = %request.library_name,
                function,
                "Entry symbol is recorded but not invoked"
            );
        }

        self.backend
            .inject_library(target, &request.library_path, self.inject_timeout)
    }

    /// Resume the main thread of the tracked process and release its handle
    pub fn resume_main_thread(&self) -> Result<u32, InjectorError> {
        let mut state = self.state.lock();

        let thread = state.main_thread.as_ref().ok_or(InjectorError::NoThreadHandle)?;
        let previous = self.backend.resume_thread(thread)?;
        state.main_thread = None;

        Ok(previous)
    }

    /// Release every held handle and forget the stored request
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        if let Some(process) = state.process.as_ref() {
            if state.main_thread.is_some() {
                warn!(
                    target: "fulltrust_host::session",
                    pid = process.pid,
                    "Releasing a process whose main thread was never resumed"
                );
            }
        }
        *state = Session::default();
        debug!(target: "fulltrust_host::session", "Session cleared");
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            has_request: state.request.is_some(),
            process_id: state.process.as_ref().map(|p| p.pid),
            has_main_thread: state.main_thread.is_some(),
        }
    }
}
