use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use vmail_account::{Account, Argon2Hasher, CredentialHasher, ForwardingRule};
use vmail_render::ConfigRenderer;
use vmail_store::{Document, FsRoots, FsStore, MemStore};
use vmail_sync::testing::CountingReload;
use vmail_sync::{AccountSyncService, CommandReload, MultiReload};

fn roots(dir: &Path) -> FsRoots {
    FsRoots {
        relay: dir.join("postfix"),
        mailbox: dir.join("dovecot"),
        mailbox_data: dir.join("mail"),
    }
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

async fn fs_service(dir: &Path, reload: vmail_sync::ArcReload) -> AccountSyncService {
    let store = FsStore::new(roots(dir), Duration::from_secs(5));
    store.init().await.unwrap();
    AccountSyncService::new(
        Arc::new(Argon2Hasher::default()),
        ConfigRenderer::default(),
        Arc::new(store),
        reload,
    )
}

fn credential_line<'a>(doc: &'a str, address: &str) -> &'a str {
    doc.lines()
        .last()
        .and_then(|l| l.strip_prefix(&format!("{}:", address)))
        .expect("document ends with the credential line")
}

#[tokio::test]
async fn account_lifecycle_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let journal = tmp.path().join("reloads");
    let reload = MultiReload::new(Duration::from_secs(5)).with_service(
        "journal",
        Arc::new(CommandReload::new(format!("echo reload >> {}", journal.display()))),
    );
    let sync = fs_service(tmp.path(), Arc::new(reload)).await;

    // create
    let report = sync
        .on_create(Account::new("alice@example.com", "hunter2", vec![]))
        .await
        .unwrap();
    assert!(!report.is_degraded());
    assert_eq!(listing(&tmp.path().join("postfix")), vec!["alice@example.com.cf"]);
    assert_eq!(listing(&tmp.path().join("dovecot")), vec!["alice@example.com.conf"]);
    assert_eq!(listing(&tmp.path().join("mail")), vec!["alice@example.com"]);
    assert_eq!(std::fs::read_to_string(&journal).unwrap(), "reload\n");

    let relay = std::fs::read_to_string(tmp.path().join("postfix/alice@example.com.cf")).unwrap();
    assert!(relay
        .lines()
        .any(|l| l == "alice@example.com example.com/alice@example.com/"));
    assert!(!relay.contains("# Forwarding"));
    assert!(!relay.contains("hunter2"));
    let hash = credential_line(&relay, "alice@example.com");
    assert!(Argon2Hasher::default().verify("hunter2", hash).unwrap());

    // a message lands in the maildir
    let maildir = tmp.path().join("mail/alice@example.com");
    std::fs::create_dir_all(maildir.join("new")).unwrap();
    std::fs::write(maildir.join("new/1.eml"), "Subject: hi\r\n\r\nhi\r\n").unwrap();

    // update: new password, one forward, maildir untouched
    sync.on_update(Account::new(
        "alice@example.com",
        "correct horse",
        vec![ForwardingRule::new("carol@other.com")],
    ))
    .await
    .unwrap();
    let relay = std::fs::read_to_string(tmp.path().join("postfix/alice@example.com.cf")).unwrap();
    let mailbox =
        std::fs::read_to_string(tmp.path().join("dovecot/alice@example.com.conf")).unwrap();
    assert!(relay.contains("alice@example.com carol@other.com\n"));
    assert!(mailbox.contains("redirect :copy \"carol@other.com\";\n"));
    let hash = credential_line(&mailbox, "alice@example.com");
    assert!(Argon2Hasher::default().verify("correct horse", hash).unwrap());
    assert!(!Argon2Hasher::default().verify("hunter2", hash).unwrap());
    assert!(maildir.join("new/1.eml").exists());
    assert_eq!(std::fs::read_to_string(&journal).unwrap(), "reload\nreload\n");

    // delete, twice
    sync.on_delete("alice@example.com").await.unwrap();
    sync.on_delete("alice@example.com").await.unwrap();
    assert!(listing(&tmp.path().join("postfix")).is_empty());
    assert!(listing(&tmp.path().join("dovecot")).is_empty());
    assert!(listing(&tmp.path().join("mail")).is_empty());
}

#[tokio::test]
async fn forwarding_account() {
    let tmp = tempfile::tempdir().unwrap();
    let sync = fs_service(tmp.path(), Arc::new(CountingReload::default())).await;

    sync.on_create(Account::new(
        "bob@example.com",
        "s3cret",
        vec![ForwardingRule::new("carol@other.com")],
    ))
    .await
    .unwrap();

    let store = sync.store();
    let mailbox = store
        .read(Document::Mailbox, "bob@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(mailbox
        .lines()
        .any(|l| l == "redirect :copy \"carol@other.com\";"));

    let relay = store
        .read(Document::Relay, "bob@example.com")
        .await
        .unwrap()
        .unwrap();
    let hash = credential_line(&relay, "bob@example.com");
    assert!(Argon2Hasher::default().verify("s3cret", hash).unwrap());
    assert!(!Argon2Hasher::default().verify("s3creT", hash).unwrap());
}

#[tokio::test]
async fn failed_reload_keeps_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let reload = MultiReload::new(Duration::from_secs(5))
        .with_service("postfix", Arc::new(CommandReload::new("exit 1")))
        .with_service("dovecot", Arc::new(CommandReload::new("true")));
    let sync = fs_service(tmp.path(), Arc::new(reload)).await;

    let report = sync
        .on_create(Account::new("alice@example.com", "hunter2", vec![]))
        .await
        .unwrap();
    assert!(report.is_degraded());
    assert!(tmp.path().join("postfix/alice@example.com.cf").exists());
    assert!(tmp.path().join("dovecot/alice@example.com.conf").exists());
    assert!(sync.reload_only().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_addresses_do_not_wait_for_each_other() {
    let store = Arc::new(MemStore::new());
    let sync = AccountSyncService::new(
        Arc::new(Argon2Hasher::default()),
        ConfigRenderer::default(),
        store.clone(),
        Arc::new(CountingReload::default()),
    );

    // alice's writes are held until we let them through
    let gate = store.hold("alice@example.com");
    let s = sync.clone();
    let alice = tokio::spawn(async move {
        s.on_update(Account::new("alice@example.com", "pw-alice", vec![]))
            .await
    });

    tokio::time::timeout(
        Duration::from_secs(30),
        sync.on_update(Account::new("bob@example.com", "pw-bob", vec![])),
    )
    .await
    .expect("bob must not be blocked by alice")
    .unwrap();
    assert!(store.document(Document::Relay, "bob@example.com").is_some());
    assert!(store.document(Document::Relay, "alice@example.com").is_none());

    gate.add_permits(1);
    alice.await.unwrap().unwrap();
    assert!(store.document(Document::Relay, "alice@example.com").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_address_updates_never_interleave() {
    let store = Arc::new(MemStore::new().with_latency(Duration::from_millis(5)));
    let sync = AccountSyncService::new(
        Arc::new(Argon2Hasher::default()),
        ConfigRenderer::default(),
        store.clone(),
        Arc::new(CountingReload::default()),
    );

    let destinations = ["one@other.com", "two@other.com", "three@other.com", "four@other.com"];
    let tasks: Vec<_> = destinations
        .iter()
        .map(|d| {
            let s = sync.clone();
            let account = Account::new(
                "alice@example.com",
                "hunter2",
                vec![ForwardingRule::new(*d)],
            );
            tokio::spawn(async move { s.on_update(account).await })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let relay = store.document(Document::Relay, "alice@example.com").unwrap();
    let mailbox = store
        .document(Document::Mailbox, "alice@example.com")
        .unwrap();
    let winners: Vec<&str> = destinations
        .iter()
        .copied()
        .filter(|d| relay.contains(&format!("alice@example.com {}\n", d)))
        .collect();
    assert_eq!(winners.len(), 1);
    assert!(mailbox.contains(&format!("redirect :copy \"{}\";", winners[0])));
    assert_eq!(
        credential_line(&relay, "alice@example.com"),
        credential_line(&mailbox, "alice@example.com")
    );

    // the relay and mailbox writes of one update are always adjacent
    let calls = store.calls();
    assert_eq!(calls.len(), 2 * destinations.len());
    for pair in calls.chunks(2) {
        assert!(matches!(
            (&pair[0], &pair[1]),
            (
                vmail_store::in_memory::StoreCall::Put(vmail_store::Namespace::Relay, _),
                vmail_store::in_memory::StoreCall::Put(vmail_store::Namespace::Mailbox, _)
            )
        ));
    }
}
