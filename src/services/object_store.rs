//! src/services/object_store.rs
//!
//! Object storage for journal images. `ObjectStore` is the seam the media
//! sync and reconciliation code talk to; `FsObjectStore` keeps payloads on
//! local disk beneath `base_path/{key}` and supports resumable uploads
//! through part files under `base_path/.sessions/`.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose};
use futures::{StreamExt, pin_mut};
use md5::Context;
use serde::Serialize;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The transfer stopped part-way; retrying with `resume_token` continues it.
    #[error("upload of `{key}` interrupted: {source}")]
    Interrupted {
        key: String,
        resume_token: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("source `{0}` does not exist")]
    SourceMissing(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
    pub etag: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Transfer the file at `local_uri` to `key`, continuing the session
    /// named by `resume_token` when one is given.
    async fn upload(
        &self,
        key: &str,
        local_uri: &str,
        resume_token: Option<&str>,
    ) -> ObjectStoreResult<StoredObject>;

    /// Remove `key`. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> ObjectStoreResult<()>;

    /// Keys directly beneath `prefix`, sorted.
    async fn list(&self, prefix: &str) -> ObjectStoreResult<Vec<String>>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const SESSIONS_DIR: &str = ".sessions";

#[derive(Clone, Debug)]
pub struct FsObjectStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl FsObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    fn session_path(&self, session_id: &Uuid) -> PathBuf {
        self.base_path
            .join(SESSIONS_DIR)
            .join(format!("{}.part", session_id))
    }

    /// Recursively remove empty directories up to `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(
        &self,
        key: &str,
        local_uri: &str,
        resume_token: Option<&str>,
    ) -> ObjectStoreResult<StoredObject> {
        ensure_key_safe(key)?;

        let source_path = local_path(local_uri);
        let mut source = File::open(&source_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::SourceMissing(local_uri.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        let source_len = source.metadata().await?.len();

        let session_id = match resume_token
            .filter(|token| !token.is_empty())
            .map(decode_resume_token)
        {
            Some(Some(id)) => id,
            Some(None) => {
                warn!("ignoring malformed resume token for `{}`", key);
                Uuid::new_v4()
            }
            None => Uuid::new_v4(),
        };
        let token = encode_resume_token(&session_id);
        let part_path = self.session_path(&session_id);
        if let Some(parent) = part_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut part = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&part_path)
            .await?;
        let mut offset = part.metadata().await?.len();
        if offset > source_len {
            debug!("stale session {} for `{}`, restarting", session_id, key);
            part.set_len(0).await?;
            offset = 0;
        } else if offset > 0 {
            debug!("resuming `{}` at byte {}", key, offset);
        }
        source.seek(SeekFrom::Start(offset)).await?;

        let interrupted = |source: io::Error| ObjectStoreError::Interrupted {
            key: key.to_string(),
            resume_token: token.clone(),
            source,
        };

        let stream = ReaderStream::new(source);
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = chunk_res.map_err(interrupted)?;
            part.write_all(&chunk).await.map_err(interrupted)?;
        }
        part.flush().await.map_err(interrupted)?;
        part.sync_all().await.map_err(interrupted)?;
        drop(part);

        let file_path = self.object_path(key);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(err) = fs::rename(&part_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&part_path, &file_path).await?;
            } else {
                return Err(interrupted(err));
            }
        }

        let (size_bytes, etag) = digest_file(&file_path).await?;
        debug!("stored `{}` ({} bytes, etag {})", key, size_bytes, etag);
        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag,
        })
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> ObjectStoreResult<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        ensure_key_safe(prefix)?;

        let mut dir = match fs::read_dir(self.object_path(prefix)).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ObjectStoreError::Io(err)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                keys.push(format!("{}/{}", prefix, name));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Reject keys that could escape the store root.
fn ensure_key_safe(key: &str) -> ObjectStoreResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key.starts_with(SESSIONS_DIR)
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Resolve a `file://` URI or a plain path to a filesystem path.
fn local_path(local_uri: &str) -> PathBuf {
    PathBuf::from(local_uri.strip_prefix("file://").unwrap_or(local_uri))
}

async fn digest_file(path: &Path) -> io::Result<(u64, String)> {
    let stream = ReaderStream::new(File::open(path).await?);
    pin_mut!(stream);
    let mut size = 0u64;
    let mut digest = Context::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        digest.consume(&chunk);
    }
    Ok((size, format!("{:x}", digest.compute())))
}

pub fn encode_resume_token(session_id: &Uuid) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(session_id.as_bytes())
}

fn decode_resume_token(token: &str) -> Option<Uuid> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| Uuid::from_slice(&bytes).ok())
}
