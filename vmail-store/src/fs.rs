use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::prelude::*;
use tokio::io::AsyncWriteExt;

use super::*;

/// Root directory of each namespace.
#[derive(Debug, Clone)]
pub struct FsRoots {
    pub relay: PathBuf,
    pub mailbox: PathBuf,
    pub mailbox_data: PathBuf,
}

impl FsRoots {
    fn root(&self, namespace: Namespace) -> &Path {
        match namespace {
            Namespace::Relay => self.relay.as_path(),
            Namespace::Mailbox => self.mailbox.as_path(),
            Namespace::MailboxData => self.mailbox_data.as_path(),
        }
    }
}

pub struct FsStore {
    roots: FsRoots,
    timeout: Duration,
    strict_delete: bool,
}

impl FsStore {
    pub fn new(roots: FsRoots, timeout: Duration) -> Self {
        Self {
            roots,
            timeout,
            strict_delete: false,
        }
    }

    /// Deleting an absent key fails with `NotFound` instead of succeeding.
    pub fn strict(mut self, strict_delete: bool) -> Self {
        self.strict_delete = strict_delete;
        self
    }

    /// Creates the three root directories if needed.
    pub async fn init(&self) -> Result<(), StoreError> {
        for namespace in [Namespace::Relay, Namespace::Mailbox, Namespace::MailboxData] {
            let root = self.roots.root(namespace);
            self.bounded(namespace, "", tokio::fs::create_dir_all(root))
                .await?;
            if namespace != Namespace::MailboxData {
                let swept = self
                    .bounded(namespace, "", sweep_temporary(root))
                    .await?;
                if swept > 0 {
                    tracing::info!(namespace=%namespace, swept, "removed stale temporary files");
                }
            }
            tracing::debug!(namespace=%namespace, root=%root.display(), "namespace ready");
        }
        Ok(())
    }

    pub fn path(&self, namespace: Namespace, key: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .roots
            .root(namespace)
            .join(stored_name(namespace, key)?))
    }

    async fn bounded<T>(
        &self,
        namespace: Namespace,
        key: &str,
        op: impl Future<Output = std::io::Result<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, op).await {
            Err(_) => Err(StoreError::Timeout {
                namespace,
                key: key.to_string(),
                timeout: self.timeout,
            }),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                namespace,
                key: key.to_string(),
            }),
            Ok(Err(source)) => Err(StoreError::Io {
                namespace,
                key: key.to_string(),
                source,
            }),
            Ok(Ok(v)) => Ok(v),
        }
    }

    fn tolerate_missing(&self, res: Result<(), StoreError>) -> Result<(), StoreError> {
        match res {
            Err(StoreError::NotFound { .. }) if !self.strict_delete => Ok(()),
            other => other,
        }
    }
}

/// Hidden sibling of `target` used while writing it. Stored names never
/// start with a dot, so these never collide with a document.
fn temporary_path(target: &Path) -> PathBuf {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut suffix = [0u8; 8];
    thread_rng().fill(&mut suffix);
    dir.join(format!(".{}.{}.tmp", file_name, hex::encode(suffix)))
}

fn is_temporary(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Writes `content` to `tmp`, flushes it to disk, then renames it over
/// `target`.
async fn write_atomic(tmp: &Path, target: &Path, content: &str) -> std::io::Result<()> {
    let res = async {
        let mut file = tokio::fs::File::create(tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(tmp, target).await
    }
    .await;

    if res.is_err() {
        let _ = tokio::fs::remove_file(tmp).await;
    }
    res
}

/// Removes temporary files left by writes that were cut short.
async fn sweep_temporary(root: &Path) -> std::io::Result<usize> {
    let mut swept = 0;
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !is_temporary(&entry.file_name().to_string_lossy()) {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => swept += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => (),
            Err(e) => return Err(e),
        }
    }
    Ok(swept)
}

#[async_trait]
impl ConfigStore for FsStore {
    async fn put(&self, doc: Document, key: &str, content: &str) -> Result<(), StoreError> {
        let namespace = doc.namespace();
        let path = self.path(namespace, key)?;
        let tmp = temporary_path(&path);
        tracing::debug!(namespace=%namespace, path=%path.display(), "put");
        let res = self
            .bounded(namespace, key, write_atomic(&tmp, &path, content))
            .await;

        // the write was dropped midway, its temporary file may remain
        if let Err(StoreError::Timeout { .. }) = &res {
            tracing::warn!(namespace=%namespace, path=%tmp.display(), "write timed out");
            let _ = tokio::time::timeout(self.timeout, tokio::fs::remove_file(&tmp)).await;
        }
        res
    }

    async fn delete(&self, doc: Document, key: &str) -> Result<(), StoreError> {
        let namespace = doc.namespace();
        let path = self.path(namespace, key)?;
        tracing::debug!(namespace=%namespace, path=%path.display(), "delete");
        let res = self
            .bounded(namespace, key, tokio::fs::remove_file(&path))
            .await;
        self.tolerate_missing(res)
    }

    async fn read(&self, doc: Document, key: &str) -> Result<Option<String>, StoreError> {
        let namespace = doc.namespace();
        let path = self.path(namespace, key)?;
        match self
            .bounded(namespace, key, tokio::fs::read_to_string(&path))
            .await
        {
            Ok(content) => Ok(Some(content)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn make_directory(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(Namespace::MailboxData, key)?;
        tracing::debug!(path=%path.display(), "make directory");
        self.bounded(Namespace::MailboxData, key, tokio::fs::create_dir_all(&path))
            .await
    }

    async fn delete_directory(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path(Namespace::MailboxData, key)?;
        tracing::debug!(path=%path.display(), "delete directory");
        let res = self
            .bounded(
                Namespace::MailboxData,
                key,
                tokio::fs::remove_dir_all(&path),
            )
            .await;
        self.tolerate_missing(res)
    }

    async fn directory_exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path(Namespace::MailboxData, key)?;
        match self
            .bounded(Namespace::MailboxData, key, tokio::fs::metadata(&path))
            .await
        {
            Ok(meta) => Ok(meta.is_dir()),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
