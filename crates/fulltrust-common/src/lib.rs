//! FullTrust Bridge Common Types
//!
//! Wire protocol, packet codec and payload records shared by the privileged
//! host (`fulltrust-host`) and its clients.

pub mod codec;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod types;

pub use error::{Error, Result};
pub use ipc::{
    content_checksum, pipe_path, ContentKind, MessageKind, PacketCommand, PacketHeader,
    DEFAULT_PIPE_NAME, HEADER_SIZE, MAX_CONTENT_LENGTH, PROTOCOL_VERSION,
};
pub use logging::{init_logging, LogConfig};
pub use types::*;

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
