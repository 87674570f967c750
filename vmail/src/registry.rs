use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use vmail_account::ForwardingRule;

use crate::config::{read_config, write_config};

/// What is kept about an account between two invocations. The credential
/// is not part of it: only its hash exists, inside the generated documents.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountEntry {
    #[serde(default)]
    pub forwarding_rules: Vec<ForwardingRule>,
}

pub type AccountList = BTreeMap<String, AccountEntry>;

/// Minimal stand-in for the application database: a TOML file keyed by
/// address.
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<AccountList> {
        if !self.path.exists() {
            tracing::debug!(path=%self.path.display(), "no registry yet");
            return Ok(AccountList::new());
        }
        read_config(self.path.clone())
            .context(format!("'{:?}' must be an account registry", self.path))
    }

    pub fn save(&self, accounts: &AccountList) -> Result<()> {
        write_config(self.path.clone(), accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = Registry::new(tmp.path().join("accounts.toml"));
        assert!(reg.load().unwrap().is_empty());
    }

    #[test]
    fn save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let reg = Registry::new(tmp.path().join("accounts.toml"));

        let mut list = AccountList::new();
        list.insert("alice@example.com".into(), AccountEntry::default());
        list.insert(
            "bob@example.com".into(),
            AccountEntry {
                forwarding_rules: vec![
                    ForwardingRule::new("carol@other.com"),
                    ForwardingRule::new("dave@third.org"),
                ],
            },
        );
        reg.save(&list).unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("accounts.toml")).unwrap();
        assert!(raw.contains("carol@other.com"));
        assert_eq!(reg.load().unwrap(), list);
    }
}
