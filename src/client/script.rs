use super::NodeClient;
use crate::error::{LockError, Result};
use crate::protocol::RespValue;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::debug;

/// A Lua script addressed by its SHA1 digest
#[derive(Debug, Clone)]
pub struct Script {
    body: &'static str,
    sha: String,
}

impl Script {
    pub fn new(body: &'static str) -> Self {
        Self {
            body,
            sha: Self::calculate_sha1(body),
        }
    }

    /// Calculate SHA1 hash of a script
    fn calculate_sha1(script: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(script.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn body(&self) -> &'static str {
        self.body
    }

    /// Run the script on a node with `EVALSHA`, falling back to `EVAL` when
    /// the node does not have it cached yet.
    pub async fn invoke(
        &self,
        client: &NodeClient,
        keys: &[&str],
        args: &[&str],
    ) -> Result<RespValue> {
        let sha = Bytes::copy_from_slice(self.sha.as_bytes());
        match client.execute(self.request("EVALSHA", sha, keys, args)).await {
            Err(LockError::Server(msg)) if msg.starts_with("NOSCRIPT") => {
                debug!("Script {} not cached on {}, sending body", self.sha, client.addr());
                let body = Bytes::from_static(self.body.as_bytes());
                client.execute(self.request("EVAL", body, keys, args)).await
            }
            other => other,
        }
    }

    fn request(
        &self,
        command: &'static str,
        script: Bytes,
        keys: &[&str],
        args: &[&str],
    ) -> Vec<Bytes> {
        let mut request = Vec::with_capacity(3 + keys.len() + args.len());
        request.push(Bytes::from_static(command.as_bytes()));
        request.push(script);
        request.push(Bytes::from(keys.len().to_string()));
        request.extend(keys.iter().map(|k| Bytes::copy_from_slice(k.as_bytes())));
        request.extend(args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())));
        request
    }
}
