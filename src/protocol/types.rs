use bytes::{BufMut, Bytes, BytesMut};

/// RESP (REdis Serialization Protocol) value types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String: +OK\r\n
    SimpleString(String),

    /// Error: -Error message\r\n
    Error(String),

    /// Integer: :1000\r\n
    Integer(i64),

    /// Bulk String: $6\r\nfoobar\r\n or $-1\r\n for null
    BulkString(Option<Bytes>),

    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n or *-1\r\n for null
    Array(Option<Vec<RespValue>>),

    /// RESP3 Null: _\r\n
    Null,
}

impl RespValue {
    /// Build a request: an array of bulk strings, command name first
    pub fn command<I, B>(args: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RespValue::Array(Some(
            args.into_iter()
                .map(|arg| RespValue::BulkString(Some(arg.into())))
                .collect(),
        ))
    }

    /// Any of the null encodings (`$-1`, `*-1`, `_`)
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            RespValue::Null | RespValue::BulkString(None) | RespValue::Array(None)
        )
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Append the wire encoding of this value to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(i) => {
                buf.put_slice(format!(":{}\r\n", i).as_bytes());
            }
            RespValue::BulkString(None) => buf.put_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                buf.put_slice(format!("${}\r\n", data.len()).as_bytes());
                buf.put_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::Array(None) => buf.put_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                buf.put_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(buf);
                }
            }
            RespValue::Null => buf.put_slice(b"_\r\n"),
        }
    }

    /// Serialize to RESP format bytes
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}
