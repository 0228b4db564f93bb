//! Minimal per-node client used by the lock primitives
//!
//! Each node gets one lazily established connection. Requests on the same
//! node are serialized. A connection goes back into its slot only after a
//! complete reply, so a failed, timed out or cancelled request leaves the
//! slot empty and the next request reconnects.

pub mod connection;
pub mod script;

pub use connection::Connection;
pub use script::Script;

use crate::error::{LockError, Result};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Cloneable handle to one backend node
#[derive(Clone)]
pub struct NodeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    addr: String,
    io_timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl NodeClient {
    pub fn new(addr: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                addr: addr.into(),
                io_timeout,
                connection: Mutex::new(None),
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Execute a command on the node.
    ///
    /// Connecting and the round trip together are bounded by the I/O
    /// timeout. Error replies from the node map to `LockError::Server`.
    pub async fn execute(&self, args: Vec<Bytes>) -> Result<RespValue> {
        let request = RespValue::command(args);
        let addr = &self.inner.addr;
        let mut slot = self.inner.connection.lock().await;

        let result = timeout(self.inner.io_timeout, async {
            let mut conn = match slot.take() {
                Some(conn) => conn,
                None => Connection::connect(addr).await?,
            };
            let reply = conn.request(&request).await?;
            *slot = Some(conn);
            Ok::<_, LockError>(reply)
        })
        .await;

        let reply = match result {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                debug!("Dropping connection to {}: {}", addr, e);
                return Err(e);
            }
            Err(_) => {
                debug!("Request to {} timed out, dropping connection", addr);
                return Err(LockError::Timeout(addr.clone()));
            }
        };

        match reply {
            RespValue::Error(msg) => Err(LockError::Server(msg)),
            reply => Ok(reply),
        }
    }
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("addr", &self.inner.addr)
            .field("io_timeout", &self.inner.io_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_execute_maps_error_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"-ERR unknown command\r\n").await.unwrap();
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"+PONG\r\n").await.unwrap();
        });

        let client = NodeClient::new(addr, Duration::from_secs(1));
        let err = client
            .execute(vec![Bytes::from_static(b"FOO")])
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Server(ref msg) if msg.starts_with("ERR")));

        // The connection survives an error reply
        let reply = client
            .execute(vec![Bytes::from_static(b"PING")])
            .await
            .unwrap();
        assert_eq!(reply, RespValue::SimpleString("PONG".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_request_does_not_leak_its_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // The first connection answers late, later ones at once
        tokio::spawn(async move {
            let mut accepted = 0;
            while let Ok((mut socket, _)) = listener.accept().await {
                let (delay, reply): (u64, &'static [u8]) = if accepted == 0 {
                    (300, b"+FIRST\r\n")
                } else {
                    (0, b"+SECOND\r\n")
                };
                accepted += 1;
                tokio::spawn(async move {
                    let mut buf = [0u8; 256];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        if socket.write_all(reply).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        let client = NodeClient::new(addr, Duration::from_secs(2));
        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            client.execute(vec![Bytes::from_static(b"PING")]),
        )
        .await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let reply = client
            .execute(vec![Bytes::from_static(b"PING")])
            .await
            .unwrap();
        assert_eq!(reply, RespValue::SimpleString("SECOND".to_string()));
    }

    #[tokio::test]
    async fn test_execute_unreachable_node() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let client = NodeClient::new(addr, Duration::from_millis(500));
        let result = client.execute(vec![Bytes::from_static(b"PING")]).await;
        assert!(matches!(
            result,
            Err(LockError::Io(_)) | Err(LockError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_times_out_on_silent_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = NodeClient::new(addr, Duration::from_millis(100));
        let result = client.execute(vec![Bytes::from_static(b"PING")]).await;
        assert!(matches!(result, Err(LockError::Timeout(_))));
    }
}
