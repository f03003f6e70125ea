//! Process backend abstraction
//!
//! The session logic never touches the OS directly. It drives a
//! [`ProcessBackend`], which owns the handle types it hands out; dropping a
//! handle releases it. Windows builds use [`Win32Backend`]; other targets get
//! [`UnsupportedBackend`] so the protocol side still builds and runs.

use crate::error::InjectorError;
use fulltrust_common::ProcessStartInfoRequest;
use std::time::Duration;

/// A freshly created, still suspended process
pub struct SpawnedProcess<P, T> {
    pub pid: u32,
    pub process: P,
    pub main_thread: T,
}

/// Process tracked by the session
pub struct TrackedProcess<P> {
    pub pid: u32,
    pub handle: P,
}

/// OS operations needed by the session
pub trait ProcessBackend: Send + Sync + 'static {
    /// Owned process handle; released on drop
    type Process: Send + 'static;
    /// Owned thread handle; released on drop
    type Thread: Send + 'static;

    /// Create the process described by `request` with its main thread suspended
    fn spawn_suspended(
        &self,
        request: &ProcessStartInfoRequest,
    ) -> Result<SpawnedProcess<Self::Process, Self::Thread>, InjectorError>;

    /// Load `library_path` inside `target` and return the module base
    ///
    /// Every resource acquired by the call is released before it returns.
    fn inject_library(
        &self,
        target: &TrackedProcess<Self::Process>,
        library_path: &str,
        timeout: Duration,
    ) -> Result<usize, InjectorError>;

    /// Resume `thread`, returning its previous suspend count
    fn resume_thread(&self, thread: &Self::Thread) -> Result<u32, InjectorError>;
}

/// Command line passed to `CreateProcessW`: quoted executable, then arguments
pub fn build_command_line(application_name: &str, arguments: &str) -> String {
    if arguments.is_empty() {
        format!("\"{}\"", application_name)
    } else {
        format!("\"{}\" {}", application_name, arguments)
    }
}

/// UTF-16LE bytes of `path` including the terminating NUL
pub fn encode_wide_path(path: &str) -> Vec<u8> {
    path.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Backend for targets without process injection support
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

impl ProcessBackend for UnsupportedBackend {
    type Process = ();
    type Thread = ();

    fn spawn_suspended(
        &self,
        _request: &ProcessStartInfoRequest,
    ) -> Result<SpawnedProcess<(), ()>, InjectorError> {
        Err(InjectorError::Unsupported("suspended process creation"))
    }

    fn inject_library(
        &self,
        _target: &TrackedProcess<()>,
        _library_path: &str,
        _timeout: Duration,
    ) -> Result<usize, InjectorError> {
        Err(InjectorError::Unsupported("library injection"))
    }

    fn resume_thread(&self, _thread: &()) -> Result<u32, InjectorError> {
        Err(InjectorError::Unsupported("thread resumption"))
    }
}

/// Win32 implementation: `CreateProcessW` + `CreateRemoteThread(LoadLibraryW)`
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Backend;

#[cfg(windows)]
impl ProcessBackend for Win32Backend {
    type Process = crate::handle::OwnedHandle;
    type Thread = crate::handle::OwnedHandle;

    fn spawn_suspended(
        &self,
        request: &ProcessStartInfoRequest,
    ) -> Result<SpawnedProcess<Self::Process, Self::Thread>, InjectorError> {
        crate::process::spawn_suspended(request)
    }

    fn inject_library(
        &self,
        target: &TrackedProcess<Self::Process>,
        library_path: &str,
        timeout: Duration,
    ) -> Result<usize, InjectorError> {
        crate::injector::inject_library(target.pid, library_path, timeout)
    }

    fn resume_thread(&self, thread: &Self::Thread) -> Result<u32, InjectorError> {
        crate::process::resume_thread(thread)
    }
}

/// Backend used by the host binary on this platform
#[cfg(windows)]
pub type PlatformBackend = Win32Backend;

/// Backend used by the host binary on this platform
#[cfg(not(windows))]
pub type PlatformBackend = UnsupportedBackend;
