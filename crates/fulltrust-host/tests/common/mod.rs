//! Shared fixtures for host integration tests

#![allow(dead_code)]

use fulltrust_common::ProcessStartInfoRequest;
use fulltrust_host::{
    Dispatcher, HostConfig, InjectorError, PipeServer, ProcessBackend, SessionManager,
    SpawnedProcess, TrackedProcess,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Operations observed by [`FakeBackend`], in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Spawn(String),
    Inject { pid: u32, path: String },
    Resume,
}

/// In-memory backend that hands out increasing pids
#[derive(Default)]
pub struct FakeBackend {
    next_pid: AtomicU32,
    pub calls: Mutex<Vec<Call>>,
}

impl FakeBackend {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

impl ProcessBackend for FakeBackend {
    type Process = ();
    type Thread = ();

    fn spawn_suspended(
        &self,
        request: &ProcessStartInfoRequest,
    ) -> Result<SpawnedProcess<(), ()>, InjectorError> {
        self.calls
            .lock()
            .push(Call::Spawn(request.application_name.clone()));
        Ok(SpawnedProcess {
            pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            process: (),
            main_thread: (),
        })
    }

    fn inject_library(
        &self,
        target: &TrackedProcess<()>,
        library_path: &str,
        _timeout: Duration,
    ) -> Result<usize, InjectorError> {
        self.calls.lock().push(Call::Inject {
            pid: target.pid,
            path: library_path.to_string(),
        });
        if library_path.ends_with("missing.dll") {
            return Err(InjectorError::LibraryNotLoaded);
        }
        Ok(0x7FFA_0000)
    }

    fn resume_thread(&self, _thread: &()) -> Result<u32, InjectorError> {
        self.calls.lock().push(Call::Resume);
        Ok(1)
    }
}

pub fn fake_server(config: &HostConfig) -> PipeServer<FakeBackend> {
    let session = Arc::new(SessionManager::new(
        FakeBackend::default(),
        config.inject_timeout(),
    ));
    PipeServer::new(config, Dispatcher::new(session))
}

/// Pipe name unique to this test process and `tag`
pub fn unique_pipe_name(tag: &str) -> String {
    format!("fulltrust-test-{}-{}", std::process::id(), tag)
}
