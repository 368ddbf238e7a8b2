//! Wire types and framing for the line-oriented transfer protocol.
//!
//! A connection carries one command line, answered by either a listing
//! (newline-joined names, then close) or a transfer header followed by
//! `parts` chunks. Each chunk is an 8-byte space-padded decimal length token
//! and exactly that many payload bytes.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 5001;

/// Largest payload carried by a single chunk (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Width of the chunk-length token.
pub const LENGTH_TOKEN_WIDTH: usize = 8;

/// Largest value an 8-digit decimal token can carry.
pub const MAX_TOKEN_VALUE: u32 = 99_999_999;

pub const COMMAND_LIMIT: usize = 1024;
pub const HEADER_LIMIT: usize = 1024;
pub const LISTING_LIMIT: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Get(String),
    /// Anything else; the raw text is kept for logging only.
    Invalid(String),
}

impl Command {
    /// Parse a received command line. The filename of a `GET` is everything
    /// after the 4-character prefix, trimmed.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line == "LIST" {
            Command::List
        } else if let Some(rest) = line.strip_prefix("GET ") {
            Command::Get(rest.trim().to_string())
        } else {
            Command::Invalid(line.to_string())
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            Command::List => "LIST\n".to_string(),
            Command::Get(name) => format!("GET {}\n", name),
            Command::Invalid(raw) => format!("{}\n", raw),
        }
    }
}

/// Sentinel values sent in place of a filename when a request is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    FileNotFound,
    InvalidPath,
    InvalidCommand,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::FileNotFound => "FILE_NOT_FOUND",
            Status::InvalidPath => "INVALID_PATH",
            Status::InvalidCommand => "INVALID_COMMAND",
        }
    }

    fn from_wire(s: &str) -> Option<Self> {
        match s {
            "FILE_NOT_FOUND" => Some(Status::FileNotFound),
            "INVALID_PATH" => Some(Status::InvalidPath),
            "INVALID_COMMAND" => Some(Status::InvalidCommand),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response to a `GET`, sent once before any chunk data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferHeader {
    Ready { name: String, parts: u32 },
    Rejected(Status),
}

impl TransferHeader {
    /// Encode as a newline-terminated header line.
    ///
    /// `INVALID_COMMAND` is sent bare while the other sentinels carry `|0`;
    /// existing clients depend on that asymmetry.
    pub fn encode(&self) -> String {
        match self {
            TransferHeader::Ready { name, parts } => format!("{}|{}\n", name, parts),
            TransferHeader::Rejected(Status::InvalidCommand) => "INVALID_COMMAND\n".to_string(),
            TransferHeader::Rejected(status) => format!("{}|0\n", status),
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let Some((left, right)) = raw.split_once('|') else {
            return Status::from_wire(raw)
                .map(TransferHeader::Rejected)
                .ok_or_else(|| Error::malformed(format!("no part count in header {:?}", raw)));
        };

        if let Some(status) = Status::from_wire(left) {
            return Ok(TransferHeader::Rejected(status));
        }

        let parts = right
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::malformed(format!("bad part count {:?}", right)))?;

        Ok(TransferHeader::Ready {
            name: left.to_string(),
            parts,
        })
    }
}

/// Number of chunks needed to carry `size` bytes.
pub fn part_count(size: u64, chunk_size: usize) -> Result<u32> {
    let parts = size.div_ceil(chunk_size as u64);
    u32::try_from(parts).map_err(|_| Error::malformed(format!("{} bytes need too many parts", size)))
}

pub fn encode_chunk_length(n: u32) -> Result<[u8; LENGTH_TOKEN_WIDTH]> {
    if n > MAX_TOKEN_VALUE {
        return Err(Error::ChunkTooLarge(n as u64));
    }
    let mut token = [0u8; LENGTH_TOKEN_WIDTH];
    token.copy_from_slice(format!("{:<8}", n).as_bytes());
    Ok(token)
}

pub fn decode_chunk_length(token: &[u8; LENGTH_TOKEN_WIDTH]) -> Result<u32> {
    let text = std::str::from_utf8(token)
        .map_err(|_| Error::malformed("chunk length is not ASCII"))?
        .trim();
    text.parse::<u32>()
        .map_err(|_| Error::malformed(format!("bad chunk length {:?}", text)))
}

/// Run `fut` under an optional deadline.
pub async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout)?,
        None => fut.await,
    }
}

/// Fill `buf` completely. EOF before the last byte is `ConnectionClosed`,
/// never a short success.
pub async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
        Err(e) => Err(e.into()),
    }
}

pub async fn read_exact<R>(reader: &mut R, n: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; n];
    fill(reader, &mut buf).await?;
    Ok(buf)
}

pub async fn read_chunk_length<R>(reader: &mut R, deadline: Option<Duration>) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    let mut token = [0u8; LENGTH_TOKEN_WIDTH];
    with_deadline(deadline, fill(reader, &mut token)).await?;
    decode_chunk_length(&token)
}

/// Send one chunk: length token, then the whole payload.
pub async fn write_chunk<W>(writer: &mut W, payload: &[u8], deadline: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| Error::ChunkTooLarge(payload.len() as u64))?;
    let token = encode_chunk_length(len)?;
    with_deadline(deadline, async {
        writer.write_all(&token).await?;
        writer.write_all(payload).await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Single write of an unframed text message (command, header or listing).
pub async fn write_text<W>(writer: &mut W, text: &str, deadline: Option<Duration>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    with_deadline(deadline, async {
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Read the transfer header up to its newline, or to EOF for peers that
/// close straight after a bare sentinel. Bytes past the newline stay in
/// `reader`'s buffer for the chunk reads that follow.
pub async fn read_header<R>(reader: &mut R, deadline: Option<Duration>) -> Result<TransferHeader>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let n = with_deadline(deadline, async {
        let n = (&mut *reader)
            .take(HEADER_LIMIT as u64)
            .read_until(b'\n', &mut raw)
            .await?;
        Ok::<_, Error>(n)
    })
    .await?;

    if n == 0 {
        return Err(Error::ConnectionClosed);
    }
    if n == HEADER_LIMIT && raw.last() != Some(&b'\n') {
        return Err(Error::malformed(format!(
            "header exceeds {} bytes",
            HEADER_LIMIT
        )));
    }
    TransferHeader::parse(&String::from_utf8_lossy(&raw))
}
