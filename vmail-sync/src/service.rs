use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use vmail_account::{Account, AccountError, Address, ArcHasher, Credential, ForwardingRule};
use vmail_render::{ConfigRenderer, RenderedConfig};
use vmail_store::{ArcStore, Document, StoreError};

use crate::locks::AddressLocks;
use crate::reload::{ArcReload, ReloadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// The sub-steps of an operation that touch the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    WriteRelay,
    WriteMailbox,
    MakeMailboxDirectory,
    DeleteRelay,
    DeleteMailbox,
    DeleteMailboxDirectory,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WriteRelay => "write relay document",
            Self::WriteMailbox => "write mailbox document",
            Self::MakeMailboxDirectory => "create mailbox directory",
            Self::DeleteRelay => "delete relay document",
            Self::DeleteMailbox => "delete mailbox document",
            Self::DeleteMailboxDirectory => "delete mailbox directory",
        })
    }
}

#[derive(Debug, Error)]
#[error("{step} failed: {error}")]
pub struct StepFailure {
    pub step: Step,
    #[source]
    pub error: StoreError,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("credential is empty or shorter than {min_length} characters")]
    WeakOrEmptyCredential { min_length: usize },
    #[error("unable to hash credential: {0}")]
    Hashing(String),
    /// `reload` is set when the services were reloaded after the failed
    /// steps and that reload failed too.
    #[error("{}", describe_store_failure(failures, reload.as_ref()))]
    StoreWriteFailed {
        failures: Vec<StepFailure>,
        reload: Option<ReloadError>,
    },
    #[error("services were not reloaded: {0}")]
    ReloadFailed(#[source] ReloadError),
    #[error("sync of {address} was aborted: {reason}")]
    Aborted { address: String, reason: String },
}

impl SyncError {
    /// Store steps that failed, in the order they were attempted.
    pub fn failed_steps(&self) -> Vec<Step> {
        match self {
            Self::StoreWriteFailed { failures, .. } => failures.iter().map(|f| f.step).collect(),
            _ => vec![],
        }
    }

    /// Reload failure carried next to failed store steps.
    pub fn reload_error(&self) -> Option<&ReloadError> {
        match self {
            Self::StoreWriteFailed { reload, .. } => reload.as_ref(),
            Self::ReloadFailed(e) => Some(e),
            _ => None,
        }
    }
}

fn describe_store_failure(failures: &[StepFailure], reload: Option<&ReloadError>) -> String {
    let steps = failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    match reload {
        Some(e) => format!("{}; services were not reloaded: {}", steps, e),
        None => steps,
    }
}

impl From<AccountError> for SyncError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::InvalidAddress(a) => Self::InvalidAddress(a),
            AccountError::WeakOrEmptyCredential { min_length } => {
                Self::WeakOrEmptyCredential { min_length }
            }
            AccountError::MalformedHash => Self::Hashing("malformed hash".into()),
            AccountError::Hashing(msg) => Self::Hashing(msg),
        }
    }
}

/// Result of an operation whose store steps all succeeded.
///
/// A failed reload does not fail the operation: the documents are on disk
/// and will be picked up at the next reload, which an operator can trigger
/// with [`AccountSyncService::reload_only`].
#[derive(Debug)]
pub struct SyncReport {
    pub address: String,
    pub operation: Operation,
    pub reload: Result<(), ReloadError>,
}

impl SyncReport {
    pub fn is_degraded(&self) -> bool {
        self.reload.is_err()
    }
}

/// Applies account lifecycle events to the mail services' configuration.
///
/// Operations on the same address are serialized; operations on distinct
/// addresses run concurrently. Once validation and hashing are done the
/// rest of an operation runs in its own task, so it completes even if the
/// caller stops waiting for it.
#[derive(Clone)]
pub struct AccountSyncService {
    inner: Arc<Inner>,
}

struct Inner {
    hasher: ArcHasher,
    renderer: ConfigRenderer,
    store: ArcStore,
    reload: ArcReload,
    locks: AddressLocks,
}

impl AccountSyncService {
    pub fn new(
        hasher: ArcHasher,
        renderer: ConfigRenderer,
        store: ArcStore,
        reload: ArcReload,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                hasher,
                renderer,
                store,
                reload,
                locks: AddressLocks::default(),
            }),
        }
    }

    pub fn store(&self) -> &ArcStore {
        &self.inner.store
    }

    /// Writes both documents, creates the mailbox directory, reloads.
    pub async fn on_create(&self, account: Account) -> Result<SyncReport, SyncError> {
        self.write(Operation::Create, account).await
    }

    /// Rewrites both documents and reloads. The mailbox directory is left
    /// untouched.
    pub async fn on_update(&self, account: Account) -> Result<SyncReport, SyncError> {
        self.write(Operation::Update, account).await
    }

    /// Removes both documents and the mailbox directory, then reloads.
    ///
    /// The address is not validated beyond being non-empty, so leftovers of
    /// a malformed record can still be cleaned up. Every removal is
    /// attempted; all failures are returned together.
    pub async fn on_delete(&self, address: &str) -> Result<SyncReport, SyncError> {
        if address.is_empty() {
            return Err(SyncError::InvalidAddress(address.to_string()));
        }
        tracing::info!(address = address, op = %Operation::Delete, "sync");

        let inner = self.inner.clone();
        let key = address.to_string();
        tokio::spawn(async move { inner.delete(key).await })
            .await
            .map_err(|e| SyncError::Aborted {
                address: address.to_string(),
                reason: e.to_string(),
            })?
    }

    /// Runs the reload trigger alone.
    pub async fn reload_only(&self) -> Result<(), SyncError> {
        self.inner.reload().await.map_err(SyncError::ReloadFailed)
    }

    /// Validates, hashes and renders without touching the store.
    pub async fn preview(&self, account: &Account) -> Result<RenderedConfig, SyncError> {
        let address = account.validate()?;
        let hash = self.hash(&account.credential).await?;
        Ok(self
            .inner
            .renderer
            .render(address.as_str(), &hash, &account.forwarding_rules)?)
    }

    async fn write(&self, op: Operation, account: Account) -> Result<SyncReport, SyncError> {
        let address = account.validate()?;
        tracing::info!(address = %address, op = %op, "sync");
        let hash = self.hash(&account.credential).await?;

        let inner = self.inner.clone();
        let forwarding_rules = account.forwarding_rules;
        let key = address.to_string();
        tokio::spawn(async move { inner.write(op, address, hash, forwarding_rules).await })
            .await
            .map_err(|e| SyncError::Aborted {
                address: key,
                reason: e.to_string(),
            })?
    }

    /// CPU bound, runs on the blocking pool.
    async fn hash(&self, credential: &Credential) -> Result<String, SyncError> {
        let hasher = self.inner.hasher.clone();
        let credential = credential.clone();
        tokio::task::spawn_blocking(move || hasher.hash(credential.expose()))
            .await
            .map_err(|e| SyncError::Hashing(e.to_string()))?
            .map_err(SyncError::from)
    }
}

impl Inner {
    async fn write(
        &self,
        op: Operation,
        address: Address,
        hash: String,
        forwarding_rules: Vec<ForwardingRule>,
    ) -> Result<SyncReport, SyncError> {
        let key = address.as_str();
        let rendered = self.renderer.render(key, &hash, &forwarding_rules)?;

        {
            let _guard = self.locks.lock(key).await;
            tracing::debug!(address = key, op = %op, "lock acquired");

            step(Step::WriteRelay, key, self.store.put(Document::Relay, key, &rendered.relay).await)?;
            step(
                Step::WriteMailbox,
                key,
                self.store.put(Document::Mailbox, key, &rendered.mailbox).await,
            )?;
            if op == Operation::Create {
                step(
                    Step::MakeMailboxDirectory,
                    key,
                    self.store.make_directory(key).await,
                )?;
            }
        }

        let reload = self.reload().await;
        tracing::info!(address = key, op = %op, reloaded = reload.is_ok(), "sync done");
        Ok(SyncReport {
            address: key.to_string(),
            operation: op,
            reload,
        })
    }

    async fn delete(&self, key: String) -> Result<SyncReport, SyncError> {
        let mut failures = vec![];
        {
            let _guard = self.locks.lock(&key).await;
            tracing::debug!(address = %key, op = %Operation::Delete, "lock acquired");

            let relay = self.store.delete(Document::Relay, &key).await;
            collect(&mut failures, Step::DeleteRelay, &key, relay);
            let mailbox = self.store.delete(Document::Mailbox, &key).await;
            collect(&mut failures, Step::DeleteMailbox, &key, mailbox);
            let dir = self.store.delete_directory(&key).await;
            collect(&mut failures, Step::DeleteMailboxDirectory, &key, dir);
        }

        // some removals may have succeeded, the services must see them
        let reload = self.reload().await;

        if !failures.is_empty() {
            return Err(SyncError::StoreWriteFailed {
                failures,
                reload: reload.err(),
            });
        }
        tracing::info!(address = %key, op = %Operation::Delete, reloaded = reload.is_ok(), "sync done");
        Ok(SyncReport {
            address: key,
            operation: Operation::Delete,
            reload,
        })
    }

    async fn reload(&self) -> Result<(), ReloadError> {
        let res = self.reload.reload().await;
        if let Err(e) = &res {
            tracing::warn!(err = %e, "configuration written but services not reloaded");
        }
        res
    }
}

fn step(step: Step, key: &str, res: Result<(), StoreError>) -> Result<(), SyncError> {
    res.map_err(|error| {
        tracing::error!(address = key, step = %step, err = %error, "store step failed, stopping");
        SyncError::StoreWriteFailed {
            failures: vec![StepFailure { step, error }],
            reload: None,
        }
    })
}

fn collect(failures: &mut Vec<StepFailure>, step: Step, key: &str, res: Result<(), StoreError>) {
    if let Err(error) = res {
        tracing::error!(address = key, step = %step, err = %error, "cleanup step failed, continuing");
        failures.push(StepFailure { step, error });
    }
}
