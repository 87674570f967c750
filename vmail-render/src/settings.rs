use serde::{Deserialize, Serialize};

/// Postfix side parameters. Every value has a default so a configuration
/// file only needs to list what it overrides.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RelaySettings {
    pub virtual_mailbox_base: String,
    pub virtual_mailbox_maps: String,
    pub virtual_minimum_uid: u32,
    pub uid: u32,
    pub gid: u32,

    pub sasl_type: String,
    pub sasl_path: String,
    pub recipient_restrictions: Vec<String>,

    pub tls_cert_file: String,
    pub tls_key_file: String,
    pub tls_auth_only: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            virtual_mailbox_base: "/var/mail".into(),
            virtual_mailbox_maps: "hash:/etc/postfix/vmailbox".into(),
            virtual_minimum_uid: 100,
            uid: 5000,
            gid: 5000,
            sasl_type: "dovecot".into(),
            sasl_path: "private/auth".into(),
            recipient_restrictions: vec![
                "permit_sasl_authenticated".into(),
                "permit_mynetworks".into(),
                "reject_unauth_destination".into(),
            ],
            tls_cert_file: default_cert_file(),
            tls_key_file: default_key_file(),
            tls_auth_only: true,
        }
    }
}

/// Dovecot side parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MailboxSettings {
    /// Root of the maildirs, the same directory as the mailbox data namespace.
    pub mail_base: String,
    pub uid: u32,
    pub gid: u32,

    pub auth_mechanisms: Vec<String>,
    pub password_scheme: String,

    pub ssl_cert_file: String,
    pub ssl_key_file: String,
}

impl Default for MailboxSettings {
    fn default() -> Self {
        Self {
            mail_base: "/var/mail".into(),
            uid: 5000,
            gid: 5000,
            auth_mechanisms: vec!["plain".into(), "login".into()],
            password_scheme: "ARGON2ID".into(),
            ssl_cert_file: default_cert_file(),
            ssl_key_file: default_key_file(),
        }
    }
}

fn default_cert_file() -> String {
    "/etc/ssl/certs/ssl-cert-snakeoil.pem".into()
}

fn default_key_file() -> String {
    "/etc/ssl/private/ssl-cert-snakeoil.key".into()
}
