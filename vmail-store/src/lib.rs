/*
 * Three logically independent namespaces live behind this abstraction:
 *  - relay:        one Postfix document per account, `<address>.cf`
 *  - mailbox:      one Dovecot document per account, `<address>.conf`
 *  - mailbox data: one maildir per account, `<address>/`
 *
 * Documents are replaced atomically: a reader sees either the previous
 * version or the new one, never a truncated file.
 */

pub mod fs;
pub mod in_memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

pub use fs::{FsRoots, FsStore};
pub use in_memory::MemStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Relay,
    Mailbox,
    MailboxData,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Relay => "relay",
            Self::Mailbox => "mailbox",
            Self::MailboxData => "mailbox-data",
        })
    }
}

/// The namespaces holding text documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Document {
    Relay,
    Mailbox,
}

impl Document {
    pub fn namespace(self) -> Namespace {
        match self {
            Self::Relay => Namespace::Relay,
            Self::Mailbox => Namespace::Mailbox,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Relay => "cf",
            Self::Mailbox => "conf",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{namespace}/{key}: not found")]
    NotFound { namespace: Namespace, key: String },
    #[error("{namespace}: invalid key {key:?}")]
    InvalidKey { namespace: Namespace, key: String },
    #[error("{namespace}/{key}: operation timed out after {timeout:?}")]
    Timeout {
        namespace: Namespace,
        key: String,
        timeout: Duration,
    },
    #[error("{namespace}/{key}: {source}")]
    Io {
        namespace: Namespace,
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::NotFound { namespace, .. }
            | Self::InvalidKey { namespace, .. }
            | Self::Timeout { namespace, .. }
            | Self::Io { namespace, .. } => *namespace,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::NotFound { key, .. }
            | Self::InvalidKey { key, .. }
            | Self::Timeout { key, .. }
            | Self::Io { key, .. } => key.as_str(),
        }
    }
}

pub type ArcStore = Arc<dyn ConfigStore + Send + Sync>;

/// Keys are account addresses. `delete` and `delete_directory` succeed when
/// the key is already absent, unless the store was built in strict mode.
#[async_trait]
pub trait ConfigStore {
    async fn put(&self, doc: Document, key: &str, content: &str) -> Result<(), StoreError>;
    async fn delete(&self, doc: Document, key: &str) -> Result<(), StoreError>;
    async fn read(&self, doc: Document, key: &str) -> Result<Option<String>, StoreError>;

    async fn make_directory(&self, key: &str) -> Result<(), StoreError>;
    async fn delete_directory(&self, key: &str) -> Result<(), StoreError>;
    async fn directory_exists(&self, key: &str) -> Result<bool, StoreError>;
}

// Everything a path component must not contain verbatim. `%` is escaped so
// the mapping stays injective.
const KEY_ESCAPE: &AsciiSet = &CONTROLS.add(b'/').add(b'\\').add(b'%');

/// Maps a key to its stored name inside `namespace`.
///
/// Injective: two distinct keys never share a stored name. A leading dot is
/// escaped too, which keeps `.` and `..` out and leaves names starting with
/// a dot free for temporary files.
pub fn stored_name(namespace: Namespace, key: &str) -> Result<String, StoreError> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey {
            namespace,
            key: key.to_string(),
        });
    }

    let mut name = utf8_percent_encode(key, KEY_ESCAPE).to_string();
    if name.starts_with('.') {
        name.replace_range(..1, "%2E");
    }

    Ok(match namespace {
        Namespace::Relay => format!("{}.{}", name, Document::Relay.extension()),
        Namespace::Mailbox => format!("{}.{}", name, Document::Mailbox.extension()),
        Namespace::MailboxData => name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_per_namespace() {
        let k = "alice@example.com";
        assert_eq!(
            stored_name(Namespace::Relay, k).unwrap(),
            "alice@example.com.cf"
        );
        assert_eq!(
            stored_name(Namespace::Mailbox, k).unwrap(),
            "alice@example.com.conf"
        );
        assert_eq!(
            stored_name(Namespace::MailboxData, k).unwrap(),
            "alice@example.com"
        );
    }

    #[test]
    fn names_stay_inside_namespace() {
        for k in ["../../etc/passwd", "..", ".", "a/b", "a\\b", ".hidden"] {
            let name = stored_name(Namespace::MailboxData, k).unwrap();
            assert!(!name.contains('/'), "{:?} -> {:?}", k, name);
            assert!(!name.contains('\\'), "{:?} -> {:?}", k, name);
            assert!(!name.starts_with('.'), "{:?} -> {:?}", k, name);
        }
    }

    #[test]
    fn injective() {
        let keys = [
            "a/b", "a%2Fb", "a%252Fb", ".x", "%2Ex", "%252Ex", "x", "a\\b", "a%5Cb",
        ];
        let names: HashSet<_> = keys
            .iter()
            .map(|k| stored_name(Namespace::Relay, k).unwrap())
            .collect();
        assert_eq!(names.len(), keys.len());
    }

    #[test]
    fn empty_key() {
        assert!(matches!(
            stored_name(Namespace::MailboxData, ""),
            Err(StoreError::InvalidKey { .. })
        ));
    }
}
