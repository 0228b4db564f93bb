use crate::error::{LockError, Result};
use crate::protocol::{RespParser, RespValue};
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// A single request/reply connection to one node
pub struct Connection {
    stream: TcpStream,
    parser: RespParser,
    write_buf: BytesMut,
    addr: String,
}

impl Connection {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);

        Ok(Self {
            stream,
            parser: RespParser::new(4096),
            write_buf: BytesMut::with_capacity(1024),
            addr: addr.to_string(),
        })
    }

    /// Send one request and wait for its reply.
    ///
    /// Error replies are returned as `RespValue::Error`; only transport and
    /// decoding failures are `Err`.
    pub async fn request(&mut self, request: &RespValue) -> Result<RespValue> {
        self.write_buf.clear();
        request.encode(&mut self.write_buf);
        self.stream.write_all(&self.write_buf).await?;

        loop {
            if let Some(reply) = self.parser.parse()? {
                return Ok(reply);
            }

            let n = self.stream.read_buf(self.parser.buffer_mut()).await?;
            if n == 0 {
                return Err(LockError::ConnectionClosed(self.addr.clone()));
            }
        }
    }
}
