use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Semaphore;

use super::*;

/// One call received by a [`MemStore`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Put(Namespace, String),
    Delete(Namespace, String),
    MakeDirectory(String),
    DeleteDirectory(String),
}

#[derive(Default)]
struct MemState {
    docs: BTreeMap<(Namespace, String), String>,
    dirs: BTreeSet<String>,
    calls: Vec<StoreCall>,
    failures: Vec<(Namespace, String)>,
}

/// In-memory store, used by tests and dry runs.
///
/// Besides storing documents it records every mutating call, can be told to
/// fail on a given namespace/key, to hold writes on a key until released,
/// or to sleep before each operation.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    latency: Option<Duration>,
    strict_delete: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict(mut self, strict_delete: bool) -> Self {
        self.strict_delete = strict_delete;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every subsequent mutation of `key` in `namespace` fails with an I/O error.
    pub fn fail_on(&self, namespace: Namespace, key: &str) {
        self.state().failures.push((namespace, key.to_string()));
    }

    /// Mutations of `key` block until the returned semaphore receives a permit.
    pub fn hold(&self, key: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates().insert(key.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn document(&self, doc: Document, key: &str) -> Option<String> {
        self.state()
            .docs
            .get(&(doc.namespace(), key.to_string()))
            .cloned()
    }

    pub fn documents(&self, doc: Document) -> BTreeMap<String, String> {
        self.state()
            .docs
            .iter()
            .filter(|((ns, _), _)| *ns == doc.namespace())
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn directories(&self) -> BTreeSet<String> {
        self.state().dirs.clone()
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn gates(&self) -> MutexGuard<'_, HashMap<String, Arc<Semaphore>>> {
        self.gates.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Latency, gate and injected failure, in that order.
    async fn enter(&self, namespace: Namespace, key: &str, call: StoreCall) -> Result<(), StoreError> {
        stored_name(namespace, key)?;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let gate = self.gates().get(key).cloned();
        if let Some(gate) = gate {
            // a closed gate means the holder gave up, let everything through
            let _ = gate.acquire().await;
        }

        let mut state = self.state();
        state.calls.push(call);
        if state
            .failures
            .iter()
            .any(|(ns, k)| *ns == namespace && k == key)
        {
            return Err(StoreError::Io {
                namespace,
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
            });
        }
        Ok(())
    }

    fn missing(&self, namespace: Namespace, key: &str) -> Result<(), StoreError> {
        if self.strict_delete {
            Err(StoreError::NotFound {
                namespace,
                key: key.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ConfigStore for MemStore {
    async fn put(&self, doc: Document, key: &str, content: &str) -> Result<(), StoreError> {
        let ns = doc.namespace();
        self.enter(ns, key, StoreCall::Put(ns, key.to_string()))
            .await?;
        self.state()
            .docs
            .insert((ns, key.to_string()), content.to_string());
        Ok(())
    }

    async fn delete(&self, doc: Document, key: &str) -> Result<(), StoreError> {
        let ns = doc.namespace();
        self.enter(ns, key, StoreCall::Delete(ns, key.to_string()))
            .await?;
        let removed = self.state().docs.remove(&(ns, key.to_string()));
        match removed {
            Some(_) => Ok(()),
            None => self.missing(ns, key),
        }
    }

    async fn read(&self, doc: Document, key: &str) -> Result<Option<String>, StoreError> {
        stored_name(doc.namespace(), key)?;
        Ok(self.document(doc, key))
    }

    async fn make_directory(&self, key: &str) -> Result<(), StoreError> {
        self.enter(
            Namespace::MailboxData,
            key,
            StoreCall::MakeDirectory(key.to_string()),
        )
        .await?;
        self.state().dirs.insert(key.to_string());
        Ok(())
    }

    async fn delete_directory(&self, key: &str) -> Result<(), StoreError> {
        self.enter(
            Namespace::MailboxData,
            key,
            StoreCall::DeleteDirectory(key.to_string()),
        )
        .await?;
        let removed = self.state().dirs.remove(key);
        match removed {
            true => Ok(()),
            false => self.missing(Namespace::MailboxData, key),
        }
    }

    async fn directory_exists(&self, key: &str) -> Result<bool, StoreError> {
        stored_name(Namespace::MailboxData, key)?;
        Ok(self.state().dirs.contains(key))
    }
}
