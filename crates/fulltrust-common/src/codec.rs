//! Packet codec over any async byte stream
//!
//! Works on named pipes, Unix sockets and in-memory duplex streams alike.
//! Reads are exact: a stream that ends before a header or payload is complete
//! yields an [`Error::Io`] with `UnexpectedEof`, never a partial packet.

use crate::error::{Error, Result};
use crate::ipc::{content_checksum, ContentKind, PacketHeader, HEADER_SIZE, MAX_CONTENT_LENGTH};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Header followed by payload, as it appears on the wire
pub fn encode_packet(header: &PacketHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Write a header-only packet
pub async fn write_header<W>(writer: &mut W, header: &PacketHeader) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&header.to_bytes()).await?;
    writer.flush().await?;

    trace!(
        target: "fulltrust::codec",
        kind = ?header.kind,
        command = %header.command,
        "Wrote header"
    );
    Ok(())
}

/// Seal `header` against `payload` and write both in one buffer
pub async fn write_payload<W>(
    writer: &mut W,
    header: &mut PacketHeader,
    content_kind: ContentKind,
    payload: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_CONTENT_LENGTH {
        return Err(Error::InvalidContentLength(
            i32::try_from(payload.len()).unwrap_or(i32::MAX),
        ));
    }

    header.seal(content_kind, payload);
    writer.write_all(&encode_packet(header, payload)).await?;
    writer.flush().await?;

    trace!(
        target: "fulltrust::codec",
        kind = ?header.kind,
        command = %header.command,
        size = payload.len(),
        "Wrote packet"
    );
    Ok(())
}

/// Serialize `data` as JSON and write it as the payload of `header`
pub async fn write_json_packet<W, T>(writer: &mut W, mut header: PacketHeader, data: &T) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(data)?;
    write_payload(writer, &mut header, ContentKind::Json, &body).await
}

/// Read exactly one header
pub async fn read_header<R>(reader: &mut R) -> Result<PacketHeader>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf).await?;
    let header = PacketHeader::from_bytes(&buf);

    trace!(
        target: "fulltrust::codec",
        version = header.version,
        kind = ?header.kind,
        command = %header.command,
        length = header.content_length,
        "Read header"
    );
    Ok(header)
}

fn content_length(header: &PacketHeader) -> Result<usize> {
    usize::try_from(header.content_length)
        .ok()
        .filter(|len| *len <= MAX_CONTENT_LENGTH)
        .ok_or(Error::InvalidContentLength(header.content_length))
}

/// Read and verify the payload announced by `header`
///
/// Header-only packets yield an empty buffer without touching the stream.
pub async fn read_payload<R>(reader: &mut R, header: &PacketHeader) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if !header.has_content() {
        return Ok(Vec::new());
    }

    let len = content_length(header)?;
    let mut content = vec![0u8; len];
    reader.read_exact(&mut content).await?;

    let actual = content_checksum(&content);
    if actual != header.checksum {
        debug!(
            target: "fulltrust::codec",
            command = %header.command,
            expected = header.checksum,
            actual,
            "Payload checksum mismatch"
        );
        return Err(Error::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    Ok(content)
}

/// Read, verify and deserialize a JSON payload
///
/// Returns `Ok(None)` for header-only packets. Any other content kind is
/// consumed and reported as [`Error::UnexpectedContent`].
pub async fn read_json_payload<R, T>(reader: &mut R, header: &PacketHeader) -> Result<Option<T>>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    if !header.has_content() {
        return Ok(None);
    }

    let content = read_payload(reader, header).await?;
    match header.content_kind {
        ContentKind::Json => Ok(Some(serde_json::from_slice(&content)?)),
        other => Err(Error::UnexpectedContent(format!(
            "{:?} payload for {}",
            other, header.command
        ))),
    }
}

/// Consume a payload nobody will handle so the next header stays aligned
pub async fn skip_payload<R>(reader: &mut R, header: &PacketHeader) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let content = read_payload(reader, header).await?;
    if !content.is_empty() {
        debug!(
            target: "fulltrust::codec",
            command = %header.command,
            size = content.len(),
            "Discarded payload"
        );
    }
    Ok(())
}
