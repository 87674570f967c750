use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use vmail_render::{MailboxSettings, RelaySettings};
use vmail_sync::ReloadConfig;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Registry of managed accounts
    pub accounts: PathBuf,
    pub store: StoreConfig,

    #[serde(default)]
    pub credential: CredentialConfig,
    #[serde(default)]
    pub reload: ReloadConfig,

    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub mailbox: MailboxSettings,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoreConfig {
    pub relay_dir: PathBuf,
    pub mailbox_dir: PathBuf,
    pub mailbox_data_dir: PathBuf,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    #[serde(default)]
    pub strict_delete: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CredentialConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
        }
    }
}

fn default_io_timeout_secs() -> u64 {
    10
}

fn default_min_length() -> usize {
    8
}

/// Throw-away setup for local experiments: everything lives under `root`
/// and nothing gets reloaded.
pub fn dev_config(root: &Path) -> Config {
    Config {
        accounts: root.join("accounts.toml"),
        store: StoreConfig {
            relay_dir: root.join("postfix"),
            mailbox_dir: root.join("dovecot"),
            mailbox_data_dir: root.join("mail"),
            io_timeout_secs: default_io_timeout_secs(),
            strict_delete: false,
        },
        credential: CredentialConfig { min_length: 1 },
        reload: ReloadConfig {
            services: vec![],
            ..ReloadConfig::default()
        },
        relay: RelaySettings::default(),
        mailbox: MailboxSettings {
            mail_base: root.join("mail").to_string_lossy().to_string(),
            ..MailboxSettings::default()
        },
    }
}

pub fn read_config<T: DeserializeOwned>(config_file: PathBuf) -> Result<T> {
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(config_file.as_path())?;

    let mut config = String::new();
    file.read_to_string(&mut config)?;

    Ok(toml::from_str(&config)?)
}

/// Replaces `config_file` through a temporary sibling and a rename.
pub fn write_config<T: Serialize>(config_file: PathBuf, config: &T) -> Result<()> {
    let content = toml::to_string(config)?;
    let dir = match config_file.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).context(format!("create {:?}", dir))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(&config_file)
        .context(format!("replace {:?}", config_file))?;
    Ok(())
}
