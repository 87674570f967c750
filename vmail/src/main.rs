mod account;
mod config;
mod registry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vmail_account::{Argon2Hasher, CredentialHasher};
use vmail_render::ConfigRenderer;
use vmail_store::{FsRoots, FsStore};
use vmail_sync::{AccountSyncService, MultiReload};

use account::{account_management, read_password};
use config::*;
use registry::Registry;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// A special mode dedicated to developers, NOT INTENDED FOR PRODUCTION
    #[clap(long)]
    dev: bool,

    #[clap(short, long, env = "VMAIL_CONFIG", default_value = "vmail.toml")]
    /// Path to the main configuration file
    config_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage email accounts and their mail server configuration
    #[clap(subcommand)]
    Account(AccountManagement),

    /// Ask the mail servers to reload their configuration
    Reload,

    /// Specific tooling, should not be part of a normal workflow
    #[clap(subcommand)]
    Tools(ToolsCommand),
}

#[derive(Subcommand, Debug)]
enum ToolsCommand {
    /// Print the hash that would be written for a password
    PasswordHash {
        #[clap(env = "VMAIL_PASSWORD")]
        maybe_password: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum AccountManagement {
    /// Add an account, write its configuration and create its mailbox
    Add {
        #[clap(short, long)]
        address: String,
        /// Forward incoming mail to this address too (repeatable)
        #[clap(short, long)]
        forward: Vec<String>,
        #[clap(env = "VMAIL_PASSWORD", hide_env_values = true)]
        maybe_password: Option<String>,
    },
    /// Change the password and forwarding rules of an account
    Update {
        #[clap(short, long)]
        address: String,
        /// Replaces the current forwarding rules (repeatable)
        #[clap(short, long)]
        forward: Vec<String>,
        /// Keep the registered forwarding rules, ignore --forward
        #[clap(long)]
        keep_forwards: bool,
        #[clap(env = "VMAIL_PASSWORD", hide_env_values = true)]
        maybe_password: Option<String>,
    },
    /// Delete an account, its configuration and its mailbox
    Delete {
        #[clap(short, long)]
        address: String,
    },
    /// List registered accounts
    List,
    /// Show what exists on disk for an account
    Show {
        #[clap(short, long)]
        address: String,
    },
    /// Print the documents an account would get, without writing anything
    Render {
        #[clap(short, long)]
        address: String,
        #[clap(short, long)]
        forward: Vec<String>,
        #[clap(env = "VMAIL_PASSWORD", hide_env_values = true)]
        maybe_password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var(
            "RUST_LOG",
            "main=info,vmail=info,vmail_sync=info,vmail_store=info",
        )
    }

    // Abort on panic, a half-applied sync must not go unnoticed
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{}", panic_info);
        eprintln!("{:?}", backtrace::Backtrace::new());
        std::process::abort();
    }));

    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = if args.dev {
        let root = std::env::temp_dir().join("vmail-dev");
        tracing::warn!(root=%root.display(), "dev mode, nothing is reloaded");
        dev_config(&root)
    } else {
        read_config(args.config_file.clone())
            .context(format!("'{:?}' must be a vmail configuration file", args.config_file))?
    };

    match &args.command {
        Command::Account(cmd) => {
            let sync = sync_service(&config).await?;
            let registry = Registry::new(config.accounts.clone());
            account_management(cmd, &sync, &registry).await?;
        }
        Command::Reload => {
            let sync = sync_service(&config).await?;
            sync.reload_only().await?;
            println!("mail servers reloaded");
        }
        Command::Tools(ToolsCommand::PasswordHash { maybe_password }) => {
            let password = read_password(maybe_password.clone())?;
            let hasher = Argon2Hasher::with_min_length(config.credential.min_length);
            println!("{}", hasher.hash(&password)?);
        }
    }

    Ok(())
}

async fn sync_service(config: &Config) -> Result<AccountSyncService> {
    let store = FsStore::new(
        FsRoots {
            relay: config.store.relay_dir.clone(),
            mailbox: config.store.mailbox_dir.clone(),
            mailbox_data: config.store.mailbox_data_dir.clone(),
        },
        Duration::from_secs(config.store.io_timeout_secs),
    )
    .strict(config.store.strict_delete);
    store
        .init()
        .await
        .context("unable to prepare configuration directories")?;

    let reload = MultiReload::from_config(&config.reload).context("invalid reload configuration")?;
    tracing::debug!(
        services = ?reload.service_names().collect::<Vec<_>>(),
        "reload trigger ready"
    );

    Ok(AccountSyncService::new(
        Arc::new(Argon2Hasher::with_min_length(config.credential.min_length)),
        ConfigRenderer::new(config.relay.clone(), config.mailbox.clone()),
        Arc::new(store),
        Arc::new(reload),
    ))
}
