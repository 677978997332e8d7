//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode commands and parse store replies for the bundled TCP
//! connection, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Lossy Text**: Payloads are decoded as UTF-8, replacing invalid bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::BufRead;

use bytes::{BufMut, BytesMut};
use mkv_common::{Command, Reply};

use crate::error::TransportError;

type RespResult<T> = Result<T, TransportError>;

/// Largest bulk string accepted from the store, matching Redis's default
/// `proto-max-bulk-len` of 512 MiB.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Upper bound on up-front array allocation; longer arrays grow as read.
const ARRAY_PREALLOC: i64 = 1024;

/// Encodes a command as a RESP2 array of bulk strings into `out`.
pub fn encode_command(command: &Command, out: &mut BytesMut) {
    out.put_u8(b'*');
    push_usize(out, command.len());
    out.put_slice(b"\r\n");
    for arg in command.args() {
        out.put_u8(b'$');
        push_usize(out, arg.len());
        out.put_slice(b"\r\n");
        out.put_slice(arg.as_bytes());
        out.put_slice(b"\r\n");
    }
}

/// Reads one RESP2 reply from the buffered reader.
pub fn read_reply<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> RespResult<Reply> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(protocol("empty reply line"));
    }

    match line_buf[0] {
        b'+' => Ok(Reply::SimpleString(lossy(&line_buf[1..]))),
        b'-' => Ok(Reply::Error(lossy(&line_buf[1..]))),
        b':' => Ok(Reply::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf)
        }
        other => Err(protocol(format!("unexpected type byte {:#04x}", other))),
    }
}

fn parse_bulk_len<R: BufRead>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> RespResult<Reply> {
    if len < 0 {
        return Ok(Reply::Null);
    }
    if len > MAX_BULK_LEN {
        return Err(protocol(format!("bulk length {} exceeds {}", len, MAX_BULK_LEN)));
    }
    let len = len as usize;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(protocol("bulk string missing trailing CRLF"));
    }

    line_buf.clear();
    let text = match String::from_utf8(data) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    };
    Ok(Reply::BulkString(text))
}

fn parse_array_len<R: BufRead>(reader: &mut R, len: i64, line_buf: &mut Vec<u8>) -> RespResult<Reply> {
    if len < 0 {
        return Ok(Reply::Null);
    }

    let mut items = Vec::with_capacity(len.min(ARRAY_PREALLOC) as usize);
    for _ in 0..len {
        items.push(read_reply(reader, line_buf)?);
    }
    Ok(Reply::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> RespResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(protocol("line not terminated by CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> RespResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((&b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return Err(protocol("empty integer")),
    };
    if digits.is_empty() {
        return Err(protocol("empty integer"));
    }

    // Negatives accumulate downwards so i64::MIN stays representable.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(protocol("invalid integer digit"));
        }
        let digit = (b - b'0') as i64;
        value = value
            .checked_mul(10)
            .and_then(|v| if negative { v.checked_sub(digit) } else { v.checked_add(digit) })
            .ok_or_else(|| protocol("integer overflow"))?;
    }

    Ok(value)
}

fn push_usize(out: &mut BytesMut, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}

fn lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn protocol(message: impl Into<String>) -> TransportError {
    TransportError::Protocol(message.into())
}
