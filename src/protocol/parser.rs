use super::types::RespValue;
use crate::error::{LockError, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::io::Cursor;

const MAX_PREALLOCATED_ELEMENTS: i64 = 1024;

/// Outcome of a single parse step that did not produce a value
enum ParseError {
    /// More bytes are needed before a value can be decoded
    Incomplete,
    /// The input is not valid RESP
    Invalid(String),
}

type ParseResult<T> = std::result::Result<T, ParseError>;

/// Incremental RESP reply parser
pub struct RespParser {
    buffer: BytesMut,
}

impl RespParser {
    /// Create a new parser with a given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Get a mutable reference to the buffer
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Try to parse a complete RESP value from the buffer.
    ///
    /// Returns `Ok(None)` while the buffered bytes do not yet form a whole
    /// value; nothing is consumed in that case.
    pub fn parse(&mut self) -> Result<Option<RespValue>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buffer[..]);
        match parse_value(&mut cursor) {
            Ok(value) => {
                let pos = cursor.position() as usize;
                self.buffer.advance(pos);
                Ok(Some(value))
            }
            Err(ParseError::Incomplete) => Ok(None),
            Err(ParseError::Invalid(msg)) => Err(LockError::Protocol(msg)),
        }
    }
}

fn parse_value(cursor: &mut Cursor<&[u8]>) -> ParseResult<RespValue> {
    let pos = cursor.position() as usize;
    let byte = *cursor.get_ref().get(pos).ok_or(ParseError::Incomplete)?;
    cursor.set_position((pos + 1) as u64);

    match byte {
        b'+' => Ok(RespValue::SimpleString(read_line(cursor)?)),
        b'-' => Ok(RespValue::Error(read_line(cursor)?)),
        b':' => Ok(RespValue::Integer(read_length(cursor, "integer")?)),
        b'$' => parse_bulk_string(cursor),
        b'*' => parse_array(cursor),
        b'_' => {
            read_line(cursor)?;
            Ok(RespValue::Null)
        }
        _ => Err(ParseError::Invalid(format!(
            "Invalid RESP type marker: {}",
            byte as char
        ))),
    }
}

fn parse_bulk_string(cursor: &mut Cursor<&[u8]>) -> ParseResult<RespValue> {
    let len = read_length(cursor, "bulk string length")?;
    if len == -1 {
        return Ok(RespValue::BulkString(None));
    }
    if len < 0 {
        return Err(ParseError::Invalid(format!(
            "Invalid bulk string length: {}",
            len
        )));
    }

    let len = len as usize;
    let pos = cursor.position() as usize;
    let data = cursor.get_ref();

    if pos + len + 2 > data.len() {
        return Err(ParseError::Incomplete);
    }
    if &data[pos + len..pos + len + 2] != b"\r\n" {
        return Err(ParseError::Invalid(
            "Bulk string not terminated by CRLF".to_string(),
        ));
    }

    let bytes = Bytes::copy_from_slice(&data[pos..pos + len]);
    cursor.set_position((pos + len + 2) as u64);

    Ok(RespValue::BulkString(Some(bytes)))
}

fn parse_array(cursor: &mut Cursor<&[u8]>) -> ParseResult<RespValue> {
    let len = read_length(cursor, "array length")?;
    if len == -1 {
        return Ok(RespValue::Array(None));
    }
    if len < 0 {
        return Err(ParseError::Invalid(format!("Invalid array length: {}", len)));
    }

    // The length comes from the peer; elements still have to arrive
    let mut array = Vec::with_capacity(len.min(MAX_PREALLOCATED_ELEMENTS) as usize);
    for _ in 0..len {
        array.push(parse_value(cursor)?);
    }

    Ok(RespValue::Array(Some(array)))
}

fn read_length(cursor: &mut Cursor<&[u8]>, what: &str) -> ParseResult<i64> {
    let line = read_line(cursor)?;
    line.parse::<i64>()
        .map_err(|_| ParseError::Invalid(format!("Invalid {}: {}", what, line)))
}

fn read_line(cursor: &mut Cursor<&[u8]>) -> ParseResult<String> {
    let start = cursor.position() as usize;
    let data = cursor.get_ref();

    let end = data[start..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(ParseError::Incomplete)?;

    let line = String::from_utf8_lossy(&data[start..start + end]).to_string();
    cursor.set_position((start + end + 2) as u64);
    Ok(line)
}
