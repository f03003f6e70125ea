//! Error types for the FullTrust host

use thiserror::Error;

/// Failure of a session or injection operation
///
/// Every variant is reported to the client as a failure result; none of
/// them ends the connection.
#[derive(Debug, Error)]
pub enum InjectorError {
    #[error("No stored process request")]
    NoStoredRequest,

    #[error("No process running")]
    NoProcess,

    #[error("Main thread handle not available")]
    NoThreadHandle,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to create process with CREATE_SUSPENDED flag. Error code: {code}")]
    CreateProcess { code: u32 },

    #[error("Failed to open process {pid} with required permissions. Error code: {code}")]
    OpenProcess { pid: u32, code: u32 },

    #[error("Failed to resolve LoadLibraryW: {0}")]
    ResolveLoader(String),

    #[error("Failed to allocate memory in target process. Error code: {code}")]
    AllocMemory { code: u32 },

    #[error("Failed to write to process memory ({written} of {expected} bytes). Error code: {code}")]
    WriteMemory {
        code: u32,
        written: usize,
        expected: usize,
    },

    #[error("Failed to create remote thread. Error code: {code}")]
    CreateThread { code: u32 },

    #[error("Timeout waiting for DLL load after {0}ms")]
    WaitTimeout(u64),

    #[error("Wait failed. Error code: {code}")]
    WaitFailed { code: u32 },

    #[error("Failed to get thread exit code. Error code: {code}")]
    ExitCode { code: u32 },

    #[error("LoadLibraryW returned NULL in target process")]
    LibraryNotLoaded,

    #[error("Failed to resume thread. Error code: {code}")]
    ResumeThread { code: u32 },

    #[error("Operation not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("Operation panicked: {0}")]
    Panicked(String),
}

/// Fatal server failure; ends the process
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to create pipe {name}: {source}")]
    Bind {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Another host owns the name, or the OS refused access to it
    #[error("Pipe {0} is already in use or access to it is denied")]
    AlreadyInUse(String),

    #[error("Accepting clients on {name} failed {attempts} times in a row: {source}")]
    Accept {
        name: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
}
