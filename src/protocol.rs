//! Gemini wire codec: status line parsing and bounded body reads.
//!
//! A response is a single UTF-8 header line, `<status><space><meta>\r\n`,
//! followed by raw body bytes until the server closes the stream. The
//! header is capped at 1000 bytes before its CRLF and the body at 10 MiB;
//! both caps are enforced while reading, not after buffering.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 8192;

/// Behavior bucket for a numeric status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// 10, 12-19: caller must collect input and re-request.
    Input,
    /// 11: like `Input`, but the input must not be echoed.
    SensitiveInput,
    /// 20-29: body follows.
    Success,
    /// 30-39: meta is the next request target.
    Redirect,
    /// 53: server refuses to serve this request.
    Refused,
    /// Everything else.
    Failure,
}

/// Classify a status code into its behavior bucket.
pub fn classify(code: u16) -> Status {
    match code {
        10 => Status::Input,
        11 => Status::SensitiveInput,
        12..=19 => Status::Input,
        20..=29 => Status::Success,
        30..=39 => Status::Redirect,
        53 => Status::Refused,
        _ => Status::Failure,
    }
}

/// Read the status line up to and including its CRLF, enforcing the size
/// cap while scanning. The header is always treated as UTF-8.
pub async fn read_header<R>(input: &mut R, max_bytes: usize) -> Result<(u16, String)>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut found_cr = false;

    loop {
        let byte = match input.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::invalid_response("unexpected end of stream in header"));
            }
            Err(e) => return Err(e.into()),
        };

        buffer.push(byte);

        if buffer.len() > max_bytes {
            return Err(Error::invalid_response("header exceeds max size limit"));
        }

        if found_cr && byte == b'\n' {
            buffer.truncate(buffer.len() - 2);
            return parse_header(&String::from_utf8_lossy(&buffer));
        }

        found_cr = byte == b'\r';
    }
}

/// Split a header line into status code and meta. Meta defaults to empty
/// when the line carries no space.
pub fn parse_header(line: &str) -> Result<(u16, String)> {
    let (code, meta) = match line.split_once(' ') {
        Some((code, meta)) => (code, meta),
        None => (line, ""),
    };
    let code = code
        .parse::<u16>()
        .map_err(|_| Error::InvalidResponse(format!("invalid Gemini status line: {line}")))?;
    Ok((code, meta.to_string()))
}

/// Read the body as UTF-8 text, aborting as soon as the running total
/// exceeds the cap.
pub async fn read_limited_text<R>(input: &mut R, max_bytes: usize) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_limited(input, max_bytes, "response").await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read the body as raw bytes, aborting as soon as the running total
/// exceeds the cap.
pub async fn read_limited_bytes<R>(input: &mut R, max_bytes: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_limited(input, max_bytes, "binary response").await?;
    Ok(bytes.freeze())
}

async fn read_limited<R>(input: &mut R, max_bytes: usize, what: &str) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut output = BytesMut::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut total = 0usize;

    loop {
        let read = input.read(&mut chunk).await?;
        if read == 0 {
            return Ok(output);
        }
        total += read;
        if total > max_bytes {
            return Err(Error::InvalidResponse(format!(
                "{what} too large (limit: {max_bytes} bytes)"
            )));
        }
        output.extend_from_slice(&chunk[..read]);
    }
}
