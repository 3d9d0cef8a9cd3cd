// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Upper bound on `*` recursion so hostile input cannot exhaust the stack.
const MAX_NESTING: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid frame type byte 0x{0:02x}")]
    InvalidType(u8),
    #[error("frame nesting too deep")]
    NestingTooDeep,
}

/// One RESP v2 value.
///
/// A bulk-null (`$-1`) and an array-null (`*-1`) are indistinguishable on
/// the wire and both parse to [`Value::Null`]; `Null` always serializes
/// back as `$-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
    Array(Vec<Value>),
}

impl Value {
    pub fn ok() -> Self {
        Value::Simple("OK".to_string())
    }

    /// An error reply in the `<PREFIX> <message>` convention, e.g.
    /// `ERR unknown command`.
    pub fn error(prefix: &str, message: &str) -> Self {
        Value::Error(format!("{prefix} {message}"))
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::Bulk(data.into())
    }

    pub fn bulk_str(text: &str) -> Self {
        Value::Bulk(Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn int(n: i64) -> Self {
        Value::Integer(n)
    }

    /// Uppercased first element of a command array, when it is a bulk
    /// string. `None` for anything that is not a well-formed command head.
    pub fn command_name(&self) -> Option<String> {
        match self {
            Value::Array(items) => match items.first() {
                Some(Value::Bulk(name)) => {
                    Some(String::from_utf8_lossy(name).to_ascii_uppercase())
                },
                _ => None,
            },
            _ => None,
        }
    }
}

/// Attempts to decode one complete value from the front of `buf`.
///
/// `Ok(Some((value, consumed)))` on success, `Ok(None)` when the buffer
/// holds only a prefix of a frame, `Err` on input that can never become a
/// valid frame. Callers keep unconsumed bytes for the next attempt.
pub fn parse(buf: &[u8]) -> Result<Option<(Value, usize)>, FrameError> {
    parse_nested(buf, 0)
}

fn parse_nested(
    buf: &[u8],
    depth: usize,
) -> Result<Option<(Value, usize)>, FrameError> {
    if depth > MAX_NESTING {
        return Err(FrameError::NestingTooDeep);
    }
    let Some(&tag) = buf.first() else {
        return Ok(None);
    };

    match tag {
        b'+' => Ok(read_line(buf, 1).map(|(line, next)| {
            (Value::Simple(String::from_utf8_lossy(line).into_owned()), next)
        })),
        b'-' => Ok(read_line(buf, 1).map(|(line, next)| {
            (Value::Error(String::from_utf8_lossy(line).into_owned()), next)
        })),
        b':' => Ok(read_line(buf, 1)
            .map(|(line, next)| (Value::Integer(lenient_i64(line)), next))),
        b'$' => {
            let Some((line, next)) = read_line(buf, 1) else {
                return Ok(None);
            };
            let declared = lenient_i64(line);
            if declared < 0 {
                return Ok(Some((Value::Null, next)));
            }
            let len = declared as usize;
            let Some(end) = next.checked_add(len).and_then(|n| n.checked_add(2))
            else {
                return Ok(None);
            };
            if buf.len() < end {
                return Ok(None);
            }
            let payload = Bytes::copy_from_slice(&buf[next..next + len]);
            Ok(Some((Value::Bulk(payload), end)))
        },
        b'*' => {
            let Some((line, mut next)) = read_line(buf, 1) else {
                return Ok(None);
            };
            let declared = lenient_i64(line);
            if declared < 0 {
                return Ok(Some((Value::Null, next)));
            }
            let count = declared as usize;
            let mut items = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                match parse_nested(&buf[next..], depth + 1)? {
                    Some((item, used)) => {
                        items.push(item);
                        next += used;
                    },
                    None => return Ok(None),
                }
            }
            Ok(Some((Value::Array(items), next)))
        },
        other => Err(FrameError::InvalidType(other)),
    }
}

/// Serializes `value` onto `out`. Infallible for any well-formed value.
pub fn encode(value: &Value, out: &mut BytesMut) {
    match value {
        Value::Simple(text) => {
            out.put_u8(b'+');
            out.put_slice(text.as_bytes());
            out.put_slice(b"\r\n");
        },
        Value::Error(text) => {
            out.put_u8(b'-');
            out.put_slice(text.as_bytes());
            out.put_slice(b"\r\n");
        },
        Value::Integer(n) => {
            out.put_slice(format!(":{n}\r\n").as_bytes());
        },
        Value::Bulk(data) => {
            out.put_slice(format!("${}\r\n", data.len()).as_bytes());
            out.put_slice(data);
            out.put_slice(b"\r\n");
        },
        Value::Null => out.put_slice(b"$-1\r\n"),
        Value::Array(items) => {
            out.put_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode(item, out);
            }
        },
    }
}

pub fn encode_to_bytes(value: &Value) -> Bytes {
    let mut out = BytesMut::new();
    encode(value, &mut out);
    out.freeze()
}

/// Bytes of the line starting at `start` up to the next CRLF, plus the
/// offset just past the CRLF. `None` when no full CRLF is buffered yet.
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let mut i = start;
    while i + 1 < buf.len() {
        if buf[i] == b'\r' && buf[i + 1] == b'\n' {
            return Some((&buf[start..i], i + 2));
        }
        i += 1;
    }
    None
}

/// Signed decimal in the `atoll` tradition: optional surrounding garbage is
/// tolerated, parsing stops at the first non-digit, overflow saturates.
pub fn lenient_i64(bytes: &[u8]) -> i64 {
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    let mut negative = false;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        negative = bytes[i] == b'-';
        i += 1;
    }

    let mut acc: i64 = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        let digit = i64::from(bytes[i] - b'0');
        acc = acc.saturating_mul(10).saturating_add(digit);
        i += 1;
    }

    if negative { -acc } else { acc }
}
