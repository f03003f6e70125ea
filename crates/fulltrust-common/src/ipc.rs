//! Packet header and wire constants
//!
//! Every message on the pipe starts with a 16 byte header:
//!
//! | offset | size | field          | encoding                 |
//! |--------|------|----------------|--------------------------|
//! | 0      | 1    | version        | `u8`                     |
//! | 1      | 1    | message kind   | [`MessageKind`]          |
//! | 2      | 1    | command        | [`PacketCommand`]        |
//! | 3      | 1    | content kind   | [`ContentKind`]          |
//! | 4      | 4    | content length | `i32`, little-endian     |
//! | 8      | 8    | checksum       | `u64`, little-endian     |
//!
//! The checksum is XXH64 (seed 0) over the payload bytes that follow the
//! header. Header-only packets carry a zero length and a zero checksum.

use std::fmt;

/// Current protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Well-known pipe name the host listens on
pub const DEFAULT_PIPE_NAME: &str = "Snap.Hutao.Remastered.PrivateFullTrustNamedPipe";

/// Encoded header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Largest payload accepted from the wire (16 MiB)
pub const MAX_CONTENT_LENGTH: usize = 16 * 1024 * 1024;

/// Kind of message carried by a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    None,
    Request,
    Response,
    SessionTermination,
    Unknown(u8),
}

impl From<u8> for MessageKind {
    fn from(value: u8) -> Self {
        match value {
            0 => MessageKind::None,
            1 => MessageKind::Request,
            2 => MessageKind::Response,
            3 => MessageKind::SessionTermination,
            other => MessageKind::Unknown(other),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::None => 0,
            MessageKind::Request => 1,
            MessageKind::Response => 2,
            MessageKind::SessionTermination => 3,
            MessageKind::Unknown(other) => other,
        }
    }
}

/// Command code of a request and its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketCommand {
    None,
    Create,
    StartProcess,
    LoadLibrary,
    ResumeMainThread,
    Unknown(u8),
}

impl From<u8> for PacketCommand {
    fn from(value: u8) -> Self {
        match value {
            0 => PacketCommand::None,
            1 => PacketCommand::Create,
            2 => PacketCommand::StartProcess,
            3 => PacketCommand::LoadLibrary,
            4 => PacketCommand::ResumeMainThread,
            other => PacketCommand::Unknown(other),
        }
    }
}

impl From<PacketCommand> for u8 {
    fn from(command: PacketCommand) -> Self {
        match command {
            PacketCommand::None => 0,
            PacketCommand::Create => 1,
            PacketCommand::StartProcess => 2,
            PacketCommand::LoadLibrary => 3,
            PacketCommand::ResumeMainThread => 4,
            PacketCommand::Unknown(other) => other,
        }
    }
}

impl fmt::Display for PacketCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketCommand::None => f.write_str("None"),
            PacketCommand::Create => f.write_str("Create"),
            PacketCommand::StartProcess => f.write_str("StartProcess"),
            PacketCommand::LoadLibrary => f.write_str("LoadLibrary"),
            PacketCommand::ResumeMainThread => f.write_str("ResumeMainThread"),
            PacketCommand::Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}

/// Encoding of the payload following the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    None,
    Json,
    Unknown(u8),
}

impl From<u8> for ContentKind {
    fn from(value: u8) -> Self {
        match value {
            0 => ContentKind::None,
            1 => ContentKind::Json,
            other => ContentKind::Unknown(other),
        }
    }
}

impl From<ContentKind> for u8 {
    fn from(kind: ContentKind) -> Self {
        match kind {
            ContentKind::None => 0,
            ContentKind::Json => 1,
            ContentKind::Unknown(other) => other,
        }
    }
}

/// Fixed-size packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub kind: MessageKind,
    pub command: PacketCommand,
    pub content_kind: ContentKind,
    pub content_length: i32,
    pub checksum: u64,
}

impl PacketHeader {
    /// Header-only packet with no content
    pub fn new(version: u8, kind: MessageKind, command: PacketCommand) -> Self {
        Self {
            version,
            kind,
            command,
            content_kind: ContentKind::None,
            content_length: 0,
            checksum: 0,
        }
    }

    pub fn request(command: PacketCommand) -> Self {
        Self::new(PROTOCOL_VERSION, MessageKind::Request, command)
    }

    /// Response header mirroring a request's version and command
    pub fn response_to(request: &PacketHeader) -> Self {
        Self::new(request.version, MessageKind::Response, request.command)
    }

    pub fn session_termination() -> Self {
        Self::new(
            PROTOCOL_VERSION,
            MessageKind::SessionTermination,
            PacketCommand::None,
        )
    }

    /// Whether a payload follows this header on the wire
    pub fn has_content(&self) -> bool {
        self.content_length != 0 || self.content_kind != ContentKind::None
    }

    /// Bind the header to `content`: sets length and checksum
    pub fn seal(&mut self, content_kind: ContentKind, content: &[u8]) {
        self.content_kind = content_kind;
        self.content_length = content.len() as i32;
        self.checksum = content_checksum(content);
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0] = self.version;
        bytes[1] = self.kind.into();
        bytes[2] = self.command.into();
        bytes[3] = self.content_kind.into();
        bytes[4..8].copy_from_slice(&self.content_length.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut length = [0u8; 4];
        length.copy_from_slice(&bytes[4..8]);
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&bytes[8..16]);

        Self {
            version: bytes[0],
            kind: MessageKind::from(bytes[1]),
            command: PacketCommand::from(bytes[2]),
            content_kind: ContentKind::from(bytes[3]),
            content_length: i32::from_le_bytes(length),
            checksum: u64::from_le_bytes(checksum),
        }
    }
}

/// XXH64 (seed 0) over payload bytes
pub fn content_checksum(content: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(content, 0)
}

/// Platform path of the pipe endpoint for `name`
#[cfg(windows)]
pub fn pipe_path(name: &str) -> String {
    format!(r"\\.\pipe\{}", name)
}

/// Platform path of the pipe endpoint for `name`
///
/// Unix builds use a domain socket in the temp directory.
#[cfg(not(windows))]
pub fn pipe_path(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("{}.sock", name))
        .to_string_lossy()
        .to_string()
}
