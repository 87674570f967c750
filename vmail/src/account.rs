use anyhow::{bail, Context, Result};

use vmail_account::{Account, Address, ForwardingRule};
use vmail_store::Document;
use vmail_sync::{AccountSyncService, SyncReport};

use crate::registry::{AccountEntry, Registry};
use crate::AccountManagement;

pub async fn account_management(
    cmd: &AccountManagement,
    sync: &AccountSyncService,
    registry: &Registry,
) -> Result<()> {
    let mut accounts = registry.load()?;

    match cmd {
        AccountManagement::Add {
            address,
            forward,
            maybe_password,
        } => {
            tracing::debug!(address = %address, "will-create");
            Address::parse(address)?;
            if accounts.contains_key(address) {
                bail!("account {} already exists, use `update`", address);
            }

            let password = read_password(maybe_password.clone())?;
            let forwarding_rules = rules(forward);
            let report = sync
                .on_create(Account::new(
                    address.clone(),
                    password,
                    forwarding_rules.clone(),
                ))
                .await
                .context(format!("unable to create account {}", address))?;

            accounts.insert(address.clone(), AccountEntry { forwarding_rules });
            registry.save(&accounts)?;
            summary(&report);
        }
        AccountManagement::Update {
            address,
            forward,
            keep_forwards,
            maybe_password,
        } => {
            tracing::debug!(address = %address, "will-update");
            let entry = accounts
                .get(address)
                .context(format!("account {} does not exist", address))?;
            let forwarding_rules = match *keep_forwards {
                true => entry.forwarding_rules.clone(),
                false => rules(forward),
            };

            let password = read_password(maybe_password.clone())?;
            let report = sync
                .on_update(Account::new(
                    address.clone(),
                    password,
                    forwarding_rules.clone(),
                ))
                .await
                .context(format!("unable to update account {}", address))?;

            accounts.insert(address.clone(), AccountEntry { forwarding_rules });
            registry.save(&accounts)?;
            summary(&report);
        }
        AccountManagement::Delete { address } => {
            tracing::debug!(address = %address, "will-delete");
            if !accounts.contains_key(address) {
                tracing::warn!(address = %address, "not in the registry, cleaning up anyway");
            }

            let report = match sync.on_delete(address).await {
                Ok(report) => report,
                Err(e) => {
                    if let Some(reload) = e.reload_error() {
                        tracing::warn!(address = %address, err = %reload, "degraded");
                        eprintln!(
                            "{}: services were not reloaded either ({}). Run `vmail reload` once the cleanup succeeds.",
                            address, reload
                        );
                    }
                    return Err(e).context(format!("unable to delete account {}", address));
                }
            };

            accounts.remove(address);
            registry.save(&accounts)?;
            summary(&report);
        }
        AccountManagement::List => {
            for (address, entry) in accounts.iter() {
                let forwards = entry
                    .forwarding_rules
                    .iter()
                    .map(|r| r.destination.as_str())
                    .collect::<Vec<_>>();
                match forwards.is_empty() {
                    true => println!("{}", address),
                    false => println!("{} -> {}", address, forwards.join(", ")),
                }
            }
        }
        AccountManagement::Show { address } => {
            let entry = accounts
                .get(address)
                .context(format!("account {} does not exist", address))?;
            let store = sync.store();
            let relay = store.read(Document::Relay, address).await?;
            let mailbox = store.read(Document::Mailbox, address).await?;
            let maildir = store.directory_exists(address).await?;

            println!("address:          {}", address);
            for rule in entry.forwarding_rules.iter() {
                println!("forwards to:      {}", rule.destination);
            }
            println!("relay document:   {}", present(relay.is_some()));
            println!("mailbox document: {}", present(mailbox.is_some()));
            println!("mailbox data:     {}", present(maildir));
        }
        AccountManagement::Render {
            address,
            forward,
            maybe_password,
        } => {
            let password = read_password(maybe_password.clone())?;
            let rendered = sync
                .preview(&Account::new(address.clone(), password, rules(forward)))
                .await?;
            println!("==> relay ({}.cf)\n{}", address, rendered.relay);
            println!("==> mailbox ({}.conf)\n{}", address, rendered.mailbox);
        }
    };

    Ok(())
}

pub fn read_password(maybe_password: Option<String>) -> Result<String> {
    Ok(match maybe_password {
        Some(pwd) => pwd,
        None => {
            let password = rpassword::prompt_password("Enter password: ")?;
            let password_confirm = rpassword::prompt_password("Confirm password: ")?;
            if password != password_confirm {
                bail!("Passwords don't match.");
            }
            password
        }
    })
}

fn rules(forward: &[String]) -> Vec<ForwardingRule> {
    forward.iter().map(ForwardingRule::new).collect()
}

fn present(b: bool) -> &'static str {
    if b {
        "present"
    } else {
        "missing"
    }
}

fn summary(report: &SyncReport) {
    match &report.reload {
        Ok(()) => println!("{} {}: done", report.operation, report.address),
        Err(e) => {
            tracing::warn!(address = %report.address, err = %e, "degraded");
            println!(
                "{} {}: configuration written, but reload failed ({}). Run `vmail reload` to retry.",
                report.operation, report.address, e
            );
        }
    }
}
