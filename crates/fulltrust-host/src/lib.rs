//! FullTrust Host
//!
//! Out-of-process helper that performs the privileged part of launching a
//! game for a sandboxed application:
//! - stores a launch request (`Create`)
//! - starts the process with its main thread suspended (`StartProcess`)
//! - injects libraries through a remote `LoadLibraryW` thread (`LoadLibrary`)
//! - lets the game run (`ResumeMainThread`)
//!
//! Requests arrive over a named pipe (a Unix socket on non-Windows builds)
//! using the packet format in [`fulltrust_common::ipc`].

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod server;
pub mod session;

#[cfg(windows)]
pub mod handle;
#[cfg(windows)]
pub mod injector;
#[cfg(windows)]
pub mod process;

pub use backend::{
    PlatformBackend, ProcessBackend, SpawnedProcess, TrackedProcess, UnsupportedBackend,
};
#[cfg(windows)]
pub use backend::Win32Backend;
pub use config::HostConfig;
pub use dispatcher::Dispatcher;
pub use error::{InjectorError, ServerError};
pub use server::{shutdown_requested, ConnectionEnd, PipeListener, PipeServer, PipeStream};
pub use session::{SessionManager, SessionSnapshot};

/// FullTrust host version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
