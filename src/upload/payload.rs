use crate::remote::ObjectBody;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Version stamped into every object header written by the rotation pipeline.
pub const HEADER_VERSION: u32 = 1;

/// First line of every object uploaded from a staged file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectHeader {
    pub service: String,
    pub instance: String,
    /// Rotation interval in milliseconds.
    pub interval: u64,
    /// Live log file the data was rotated from.
    pub location: String,
    pub log_type: String,
    pub version: u32,
}

impl ObjectHeader {
    /// The header serialized as one JSON line, newline included.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Something the backoff uploader can read from the start once per attempt.
#[async_trait]
pub trait Payload: Send + Sync {
    async fn open(&self) -> io::Result<ObjectBody>;

    /// Total byte length, when known up front.
    fn size_hint(&self) -> Option<u64>;
}

/// A staged file with a header line prepended.
pub struct StagedPayload {
    header: Arc<[u8]>,
    path: PathBuf,
    file_len: u64,
}

impl StagedPayload {
    pub async fn new(path: &Path, header_line: String) -> io::Result<Self> {
        let file_len = tokio::fs::metadata(path).await?.len();
        Ok(Self {
            header: Arc::from(header_line.into_bytes()),
            path: path.to_path_buf(),
            file_len,
        })
    }
}

#[async_trait]
impl Payload for StagedPayload {
    async fn open(&self) -> io::Result<ObjectBody> {
        let file = tokio::fs::File::open(&self.path).await?;
        let header = Cursor::new(self.header.clone());
        Ok(Box::new(header.chain(file)))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.header.len() as u64 + self.file_len)
    }
}

/// An in-memory buffer, used for time buckets.
#[derive(Clone)]
pub struct BytesPayload(Arc<[u8]>);

impl BytesPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[async_trait]
impl Payload for BytesPayload {
    async fn open(&self) -> io::Result<ObjectBody> {
        Ok(Box::new(Cursor::new(self.0.clone())))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.0.len() as u64)
    }
}
